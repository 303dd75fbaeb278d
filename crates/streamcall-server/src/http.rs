use std::convert::Infallible;
use std::net::SocketAddr;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use futures::StreamExt as _;
use streamcall_core::{
    CallError, CallRequest, DeliveryMode, Dispatched, Dispatcher, ErrorCode, EventStream,
    GENERATE_PATH, NDJSON_CONTENT_TYPE, Record, ValidatedRequest, encode_record,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ConfigError;

/// Errors that stop the server from starting or serving.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(std::io::Error),
}

/// Shared handler state. Holds no per-call data.
#[derive(Clone)]
pub struct AppState {
    dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

/// Builds the router with the generate and health endpoints.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(GENERATE_PATH, post(generate))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// Serves the router on an already bound listener until the task is dropped.
pub async fn serve(listener: TcpListener, dispatcher: Dispatcher) -> Result<(), ServerError> {
    let app = build_router(AppState::new(dispatcher));
    axum::serve(listener, app).await.map_err(ServerError::Serve)
}

/// Binds `127.0.0.1` on an ephemeral port and serves in a background task.
///
/// Used by the demo's embedded mode and by integration tests.
pub async fn spawn_local(
    dispatcher: Dispatcher,
) -> Result<(SocketAddr, JoinHandle<Result<(), ServerError>>), ServerError> {
    let requested = SocketAddr::from(([127, 0, 0, 1], 0));
    let listener = TcpListener::bind(requested)
        .await
        .map_err(|source| ServerError::Bind {
            addr: requested,
            source,
        })?;
    let addr = listener
        .local_addr()
        .map_err(|source| ServerError::Bind {
            addr: requested,
            source,
        })?;
    info!(%addr, producer = dispatcher.producer_id(), "embedded server listening");
    Ok((addr, tokio::spawn(serve(listener, dispatcher))))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn generate(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let mode = DeliveryMode::from_capability(accepts_incremental(&headers));
    let request = match parse_call(&body) {
        Ok(request) => request,
        Err(err) => {
            warn!(mode = mode.as_str(), error = %err, "rejected call");
            return single_record_response(Record::error(err));
        }
    };
    debug!(call_id = %request.call_id(), mode = mode.as_str(), "accepted call");

    match state.dispatcher.dispatch(request, mode).await {
        Dispatched::Single(record) => single_record_response(record),
        Dispatched::Incremental(events) => ndjson_response(events),
    }
}

/// True when an `Accept` entry names the NDJSON content type with a
/// non-zero quality.
pub(crate) fn accepts_incremental(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|entry| {
            let mut parts = entry.split(';');
            let names_ndjson = parts
                .next()
                .is_some_and(|media| media.trim().eq_ignore_ascii_case(NDJSON_CONTENT_TYPE));
            names_ndjson && quality(parts) > 0.0
        })
}

/// Reads the `q` parameter of one media range. Missing or unparsable
/// values count as 1.
fn quality<'a>(params: impl Iterator<Item = &'a str>) -> f32 {
    params
        .filter_map(|param| param.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("q"))
        .and_then(|(_, value)| value.trim().parse::<f32>().ok())
        .unwrap_or(1.0)
}

fn parse_call(body: &[u8]) -> Result<ValidatedRequest, CallError> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| CallError::invalid_argument(format!("request body is not valid JSON: {e}")))?;
    CallRequest::from_json(&value)?.validate()
}

pub(crate) fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        // 499 is not a registered status; fall back to a generic client error.
        ErrorCode::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
    }
}

fn single_record_response(record: Record) -> Response {
    let status = match &record {
        Record::Error(event) => status_for(event.code),
        Record::Message(_) | Record::Result(_) => StatusCode::OK,
    };
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        encode_record(&record),
    )
        .into_response()
}

fn ndjson_response(events: EventStream) -> Response {
    let body = Body::from_stream(events.map(|record| Ok::<_, Infallible>(encode_record(&record))));
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, NDJSON_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}
