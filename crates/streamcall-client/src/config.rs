use std::time::Duration;

use streamcall_core::GENERATE_PATH;

use crate::errors::ClientError;

/// Configuration for [`crate::StreamCallClient`].
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Server base URL, for example `http://127.0.0.1:8787`.
    pub base_url: String,
    /// Path of the generate call.
    pub path: String,
    /// Optional whole-exchange timeout enforced by the HTTP transport.
    pub timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            path: GENERATE_PATH.to_string(),
            timeout: None,
        }
    }

    /// Builds a config from `STREAMCALL_URL` and `STREAMCALL_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ClientError> {
        let base_url = std::env::var("STREAMCALL_URL").unwrap_or_default();
        if base_url.trim().is_empty() {
            return Err(ClientError::Config("missing STREAMCALL_URL".into()));
        }
        let mut config = Self::new(base_url);
        if let Ok(raw) = std::env::var("STREAMCALL_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|e| {
                ClientError::Config(format!("invalid STREAMCALL_TIMEOUT_SECS {raw:?}: {e}"))
            })?;
            config.timeout = Some(Duration::from_secs(secs));
        }
        Ok(config)
    }

    /// Overrides the call path.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Sets a whole-exchange timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn call_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.path.trim_start_matches('/')
        )
    }
}
