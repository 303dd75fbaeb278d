use streamcall_core::{CallError, ErrorCode};

/// Failure of a client call.
///
/// `Remote` is an error record sent by the server (for example a producer
/// failure). `Transport` covers everything where no terminal record was
/// received: connection drops, unreadable bodies, and exchanges that ended
/// early. The two are kept apart so callers can tell a clean server-side
/// failure from a lost connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Input rejected locally before any request was sent.
    #[error("invalid input: {0}")]
    InvalidInput(CallError),
    /// The server answered with an error record.
    #[error("call failed: {0}")]
    Remote(CallError),
    /// The exchange ended without a terminal record.
    #[error("transport error: {0}")]
    Transport(String),
    /// The caller cancelled the call.
    #[error("call cancelled")]
    Cancelled,
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
}

impl ClientError {
    /// Code category of the failure, when one applies.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::InvalidInput(err) | Self::Remote(err) => Some(err.code),
            Self::Cancelled => Some(ErrorCode::Cancelled),
            Self::Transport(_) => Some(ErrorCode::Unavailable),
            Self::Config(_) => None,
        }
    }

    pub(crate) fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }
}
