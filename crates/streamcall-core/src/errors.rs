use std::fmt;

/// Machine-readable failure category carried by every error record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    /// The call input was rejected before any producer work.
    InvalidArgument,
    /// The producer or the server failed while serving the call.
    Internal,
    /// The producer's upstream could not be reached.
    Unavailable,
    /// The call was cancelled before a terminal record was produced.
    Cancelled,
}

impl ErrorCode {
    /// Returns the wire spelling of the code (for example `invalid-argument`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid-argument",
            Self::Internal => "internal",
            Self::Unavailable => "unavailable",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed call failure: a human-readable message plus a code category.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct CallError {
    pub code: ErrorCode,
    pub message: String,
}

impl CallError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

/// Errors returned by a fragment producer before they are normalized into an
/// error record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProducerError {
    /// The producer reported an application-level failure (status, quota, etc.).
    #[error("producer error ({producer}): {message}")]
    Provider {
        producer: String,
        message: String,
        status_code: Option<u16>,
    },
    /// The producer's own upstream connection failed.
    #[error("producer transport error ({producer}): {message}")]
    Transport { producer: String, message: String },
    /// The producer's upstream response was malformed.
    #[error("producer protocol error ({producer}): {message}")]
    Protocol { producer: String, message: String },
}

impl ProducerError {
    /// Creates a provider-level error.
    pub fn provider(
        producer: impl Into<String>,
        message: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        Self::Provider {
            producer: producer.into(),
            message: message.into(),
            status_code,
        }
    }

    /// Creates a transport-level error.
    pub fn transport(producer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            producer: producer.into(),
            message: message.into(),
        }
    }

    /// Creates a protocol-level error.
    pub fn protocol(producer: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            producer: producer.into(),
            message: message.into(),
        }
    }

    /// Returns the human-readable message for this error.
    pub fn message(&self) -> &str {
        match self {
            Self::Provider { message, .. }
            | Self::Transport { message, .. }
            | Self::Protocol { message, .. } => message,
        }
    }
}

impl From<&ProducerError> for CallError {
    fn from(err: &ProducerError) -> Self {
        let code = match err {
            ProducerError::Transport { .. } => ErrorCode::Unavailable,
            ProducerError::Provider { .. } | ProducerError::Protocol { .. } => ErrorCode::Internal,
        };
        CallError::new(code, err.message())
    }
}

impl From<ProducerError> for CallError {
    fn from(err: ProducerError) -> Self {
        CallError::from(&err)
    }
}

/// Decoder failures for a single newline-delimited record.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The record was not valid UTF-8.
    #[error("record is not valid utf-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    /// The record was not valid JSON.
    #[error("invalid record json: {0}")]
    Json(#[from] serde_json::Error),
    /// Valid JSON whose envelope key is none of `message`, `result`, `error`.
    #[error("unknown record kind: {0}")]
    UnknownRecord(String),
}
