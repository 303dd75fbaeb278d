//! Process-wide tracing setup shared by the server, the demo and tests.
//!
//! Settings come from the environment:
//! - `STREAMCALL_OBSERVABILITY_ENABLED`: `false`/`off`/`0` disables logging (default on).
//! - `STREAMCALL_LOG_LEVEL`: filter directive, takes precedence over `RUST_LOG`.
//! - `STREAMCALL_JSON_LOG_PATH`: write JSON lines to this file instead of stderr.
//! - `RUST_LOG`: standard filter fallback.
//!
//! Console output goes to stderr so stdout stays free for program output.

use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

const DEFAULT_LOG_FILE: &str = "streamcall.logs.jsonl";

static INSTALLED: OnceCell<()> = OnceCell::new();

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    Stderr,
    JsonFile(PathBuf),
}

/// Logging settings resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub enabled: bool,
    /// Explicit filter directive from `STREAMCALL_LOG_LEVEL`.
    pub level: Option<String>,
    pub sink: LogSink,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = lookup("STREAMCALL_OBSERVABILITY_ENABLED")
            .and_then(|raw| parse_switch(&raw))
            .unwrap_or(true);
        let level = lookup("STREAMCALL_LOG_LEVEL").filter(|raw| !raw.trim().is_empty());
        let sink = match lookup("STREAMCALL_JSON_LOG_PATH") {
            Some(path) if !path.trim().is_empty() => LogSink::JsonFile(PathBuf::from(path)),
            _ => LogSink::Stderr,
        };
        Self {
            enabled,
            level,
            sink,
        }
    }

    fn filter(&self, default_level: &str) -> EnvFilter {
        self.level
            .as_deref()
            .and_then(|level| EnvFilter::try_new(level).ok())
            .or_else(|| EnvFilter::try_from_default_env().ok())
            .unwrap_or_else(|| EnvFilter::new(default_level))
    }
}

fn parse_switch(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

/// Splits a log file path into the directory the appender writes to and the
/// file name inside it.
fn split_log_path(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_string();
    (dir, file)
}

/// Installs the global subscriber at `info` unless the environment says
/// otherwise. Later calls are no-ops.
pub fn init_observability() {
    init_observability_with_default("info");
}

/// Like [`init_observability`] with a caller-chosen fallback level.
pub fn init_observability_with_default(default_level: &str) {
    INSTALLED.get_or_init(|| install(&LogSettings::from_env(), default_level));
}

fn install(settings: &LogSettings, default_level: &str) {
    if !settings.enabled {
        return;
    }
    let filter = settings.filter(default_level);
    let registry = tracing_subscriber::registry().with(filter);

    // try_init fails when a test harness or embedding app already set a
    // global subscriber; theirs wins.
    let _ = match &settings.sink {
        LogSink::Stderr => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogSink::JsonFile(path) => {
            let (dir, file) = split_log_path(path);
            let _ = std::fs::create_dir_all(&dir);
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_span_list(true)
                        .with_target(false)
                        .with_writer(tracing_appender::rolling::never(dir, file)),
                )
                .try_init()
        }
    };
}
