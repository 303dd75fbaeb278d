use crate::errors::{CallError, ErrorCode};

/// HTTP path of the generate call.
pub const GENERATE_PATH: &str = "/v1/calls/generate";

/// Inbound call input: `{"prompt": "<text>"}`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CallRequest {
    pub prompt: String,
}

impl CallRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }

    /// Reads a call request from an untyped JSON body.
    ///
    /// A missing prompt, a non-string prompt and a blank prompt are all
    /// reported as `invalid-argument` instead of a generic decode failure.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, CallError> {
        match value.get("prompt") {
            None | Some(serde_json::Value::Null) => {
                Err(CallError::invalid_argument("prompt is required"))
            }
            Some(serde_json::Value::String(prompt)) => Ok(Self::new(prompt.clone())),
            Some(_) => Err(CallError::invalid_argument("prompt must be a string")),
        }
    }

    /// Checks the prompt and assigns a call id.
    pub fn validate(self) -> Result<ValidatedRequest, CallError> {
        if self.prompt.trim().is_empty() {
            return Err(CallError::invalid_argument("prompt must not be empty"));
        }
        Ok(ValidatedRequest {
            call_id: uuid::Uuid::new_v4(),
            prompt: self.prompt,
        })
    }
}

/// A call request that passed validation. Only this type reaches a producer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedRequest {
    call_id: uuid::Uuid,
    prompt: String,
}

impl ValidatedRequest {
    pub fn call_id(&self) -> uuid::Uuid {
        self.call_id
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }
}

/// Delivery mode negotiated once per call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeliveryMode {
    /// One record, sent after the producer has finished.
    Single,
    /// Fragment records flushed as produced, then one terminal record.
    Incremental,
}

impl DeliveryMode {
    /// Maps the client's "accepts incremental delivery" flag to a mode.
    pub fn from_capability(accepts_incremental: bool) -> Self {
        if accepts_incremental {
            Self::Incremental
        } else {
            Self::Single
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Incremental => "incremental",
        }
    }
}

/// Incremental slice of the eventual completion.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FragmentEvent {
    pub partial: String,
}

/// Terminal success event carrying the full completion text.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResultEvent {
    pub completion: String,
}

/// Terminal failure event.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ErrorEvent {
    pub message: String,
    pub code: ErrorCode,
}

impl From<CallError> for ErrorEvent {
    fn from(err: CallError) -> Self {
        Self {
            message: err.message,
            code: err.code,
        }
    }
}

impl From<ErrorEvent> for CallError {
    fn from(event: ErrorEvent) -> Self {
        CallError::new(event.code, event.message)
    }
}

/// One wire record. Serializes to exactly one of
/// `{"message":{"partial":..}}`, `{"result":{"completion":..}}` or
/// `{"error":{"message":..,"code":..}}`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Record {
    Message(FragmentEvent),
    Result(ResultEvent),
    Error(ErrorEvent),
}

impl Record {
    pub fn fragment(partial: impl Into<String>) -> Self {
        Self::Message(FragmentEvent {
            partial: partial.into(),
        })
    }

    pub fn result(completion: impl Into<String>) -> Self {
        Self::Result(ResultEvent {
            completion: completion.into(),
        })
    }

    pub fn error(err: CallError) -> Self {
        Self::Error(err.into())
    }

    /// True for the result and error records that end a call.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result(_) | Self::Error(_))
    }
}
