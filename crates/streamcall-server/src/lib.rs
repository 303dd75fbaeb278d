//! HTTP transport for the streamcall protocol.
//!
//! `POST /v1/calls/generate` with body `{"prompt": "..."}` answers with one
//! JSON record, or, when the request carries `Accept: application/x-ndjson`,
//! with a chunked body of newline-delimited records flushed as the
//! dispatcher yields them.

/// Server configuration (CLI flags, environment, `.env`).
pub mod config;
/// Router, handlers and the serve loop.
pub mod http;
/// Producer backed by an OpenAI-compatible chat completions endpoint.
pub mod openai;

pub use config::{ConfigError, ProducerKind, ServerConfig};
pub use http::{AppState, ServerError, build_router, serve, spawn_local};
pub use openai::{OpenAiConfig, OpenAiProducer};
