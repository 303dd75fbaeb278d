use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use streamcall_core::{DEFAULT_EVENT_BUFFER, Dispatcher, FragmentProducer, ScriptedProducer};

use crate::openai::{OpenAiConfig, OpenAiProducer};

/// Invalid or incomplete server configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("producer setup failed: {0}")]
    Producer(String),
}

/// Which fragment producer serves calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ProducerKind {
    /// Replays a fixed corporate-speak answer with a per-fragment delay.
    Scripted,
    /// Streams from an OpenAI-compatible chat completions endpoint.
    Openai,
}

/// Server settings. Every flag falls back to an environment variable, and a
/// `.env` file is loaded into the environment before parsing.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "streamcall-server", about = "Serve text generation as one record or as a record stream")]
pub struct ServerConfig {
    /// Address to bind.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST), env = "STREAMCALL_HOST")]
    pub host: IpAddr,

    /// Port to listen on.
    #[arg(long, default_value_t = 8787, env = "STREAMCALL_PORT")]
    pub port: u16,

    /// Fragment producer backing the generate call.
    #[arg(long, value_enum, default_value_t = ProducerKind::Scripted, env = "STREAMCALL_PRODUCER")]
    pub producer: ProducerKind,

    /// Delay before each scripted fragment, in milliseconds.
    #[arg(long, default_value_t = 150, env = "STREAMCALL_FRAGMENT_DELAY_MS")]
    pub fragment_delay_ms: u64,

    /// Bounded record buffer between the producer and the HTTP body.
    #[arg(long, default_value_t = DEFAULT_EVENT_BUFFER, env = "STREAMCALL_EVENT_BUFFER")]
    pub event_buffer: usize,

    /// API key for the `openai` producer.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint.
    #[arg(long, default_value = "https://api.openai.com", env = "OPENAI_BASE_URL")]
    pub openai_base_url: String,

    /// Chat model used by the `openai` producer.
    #[arg(long, default_value = "gpt-4o-mini", env = "OPENAI_MODEL")]
    pub openai_model: String,

    /// System instruction sent ahead of every prompt. Defaults to the
    /// corporate-jargon rewrite instruction.
    #[arg(long, env = "OPENAI_SYSTEM_PROMPT")]
    pub system_prompt: Option<String>,
}

/// `.env` files consulted at startup, in load order. dotenvy never
/// overrides a variable that is already set, so earlier files win.
fn dotenv_candidates(manifest_dir: &Path, cwd: &Path) -> Vec<PathBuf> {
    let mut candidates = vec![manifest_dir.join(".env")];
    let local = cwd.join(".env");
    if !candidates.contains(&local) {
        candidates.push(local);
    }
    candidates
}

fn load_existing(candidates: Vec<PathBuf>) -> Vec<PathBuf> {
    candidates
        .into_iter()
        .filter(|path| path.is_file())
        .filter(|path| dotenvy::from_path(path).is_ok())
        .collect()
}

/// Loads `.env` from the crate directory and the working directory and
/// returns the files that were applied. Missing files are skipped.
pub fn load_dotenv() -> Vec<PathBuf> {
    let cwd = std::env::current_dir().unwrap_or_default();
    load_existing(dotenv_candidates(
        Path::new(env!("CARGO_MANIFEST_DIR")),
        &cwd,
    ))
}

impl ServerConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_buffer == 0 {
            return Err(ConfigError::Invalid(
                "event_buffer must be greater than 0".into(),
            ));
        }
        if self.producer == ProducerKind::Openai
            && self
                .openai_api_key
                .as_deref()
                .is_none_or(|key| key.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "OPENAI_API_KEY is required for the openai producer".into(),
            ));
        }
        if self.openai_model.trim().is_empty() {
            return Err(ConfigError::Invalid("openai_model must not be empty".into()));
        }
        Ok(())
    }

    /// Builds the configured producer.
    pub fn build_producer(&self) -> Result<Arc<dyn FragmentProducer>, ConfigError> {
        self.validate()?;
        match self.producer {
            ProducerKind::Scripted => Ok(Arc::new(
                ScriptedProducer::default().fragment_delay(Duration::from_millis(self.fragment_delay_ms)),
            )),
            ProducerKind::Openai => {
                let mut config = OpenAiConfig::new(self.openai_api_key.clone().unwrap_or_default())
                    .base_url(self.openai_base_url.clone())
                    .model(self.openai_model.clone());
                if let Some(system_prompt) = &self.system_prompt {
                    config = config.system_prompt(system_prompt.clone());
                }
                Ok(Arc::new(OpenAiProducer::new(config)?))
            }
        }
    }

    /// Builds a dispatcher around the configured producer.
    pub fn build_dispatcher(&self) -> Result<Dispatcher, ConfigError> {
        Ok(Dispatcher::new(self.build_producer()?).event_buffer(self.event_buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser as _;

    fn parse(args: &[&str]) -> ServerConfig {
        let mut argv = vec!["streamcall-server"];
        argv.extend_from_slice(args);
        ServerConfig::try_parse_from(argv).expect("parse args")
    }

    #[test]
    fn flags_override_defaults() {
        let config = parse(&["--port", "9000", "--fragment-delay-ms", "0", "--event-buffer", "8"]);
        assert_eq!(config.socket_addr().port(), 9000);
        assert_eq!(config.fragment_delay_ms, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_event_buffer_is_rejected() {
        let config = parse(&["--event-buffer", "0"]);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(msg)) if msg.contains("event_buffer")));
    }

    #[test]
    fn openai_producer_requires_api_key() {
        let mut config = parse(&["--producer", "openai"]);
        config.openai_api_key = Some("  ".into());
        assert!(config.build_producer().is_err());

        config.openai_api_key = Some("sk-test".into());
        let producer = config.build_producer().expect("producer");
        assert_eq!(producer.id(), "openai");
    }

    #[test]
    fn scripted_dispatcher_builds() {
        let config = parse(&["--producer", "scripted"]);
        let dispatcher = config.build_dispatcher().expect("dispatcher");
        assert_eq!(dispatcher.producer_id(), "scripted");
    }

    #[test]
    fn dotenv_candidates_prefer_crate_dir_and_skip_duplicates() {
        let crate_dir = Path::new("/srv/streamcall");
        assert_eq!(
            dotenv_candidates(crate_dir, Path::new("/home/me")),
            vec![crate_dir.join(".env"), PathBuf::from("/home/me/.env")]
        );
        assert_eq!(
            dotenv_candidates(crate_dir, crate_dir),
            vec![crate_dir.join(".env")]
        );
    }

    #[test]
    fn missing_dotenv_files_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let candidates = dotenv_candidates(&dir.path().join("crate"), dir.path());
        assert!(load_existing(candidates).is_empty());
    }

    #[test]
    fn system_prompt_flag_is_optional() {
        assert_eq!(parse(&[]).system_prompt, None);
        let config = parse(&["--system-prompt", "Answer in haiku."]);
        assert_eq!(config.system_prompt.as_deref(), Some("Answer in haiku."));
    }
}
