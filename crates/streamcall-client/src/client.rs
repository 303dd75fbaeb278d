use std::sync::Arc;

use futures::StreamExt as _;
use streamcall_core::{
    CallRequest, CallTimer, DeliveryMode, FragmentEvent, NDJSON_CONTENT_TYPE, Record,
    RecordDecoder, mark_start,
};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{Instrument as _, debug, info, warn};

use crate::call::{CancelHandle, FragmentStream, PendingCompletion, StreamingCall};
use crate::config::ClientConfig;
use crate::errors::ClientError;

/// HTTP client for the generate call.
///
/// Cheap to clone; clones share one connection pool. Each call owns its own
/// handle, timer and pump task, so any number of calls may be in flight.
#[derive(Clone)]
pub struct StreamCallClient {
    http: reqwest::Client,
    url: Arc<str>,
}

impl StreamCallClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        if config.base_url.trim().is_empty() {
            return Err(ClientError::Config("base_url must not be empty".into()));
        }
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            url: Arc::from(config.call_url()),
        })
    }

    /// Issues a call that asks for single-record delivery.
    ///
    /// A blank prompt is rejected here, before anything is sent. Must be
    /// called from within a tokio runtime; the exchange starts immediately.
    pub fn invoke(&self, prompt: impl Into<String>) -> Result<PendingCompletion, ClientError> {
        let (completion, _fragments) = self.start(prompt.into(), DeliveryMode::Single)?;
        Ok(completion)
    }

    /// Issues a call that asks for incremental delivery.
    ///
    /// A blank prompt is rejected here, before anything is sent. Must be
    /// called from within a tokio runtime; the exchange starts immediately.
    pub fn invoke_streaming(&self, prompt: impl Into<String>) -> Result<StreamingCall, ClientError> {
        let (completion, fragments) = self.start(prompt.into(), DeliveryMode::Incremental)?;
        Ok(StreamingCall {
            fragments,
            completion,
        })
    }

    fn start(
        &self,
        prompt: String,
        mode: DeliveryMode,
    ) -> Result<(PendingCompletion, FragmentStream), ClientError> {
        let validated = CallRequest::new(prompt)
            .validate()
            .map_err(ClientError::InvalidInput)?;
        let call_id = validated.call_id();
        let request = CallRequest::new(validated.prompt());

        let timer = Arc::new(mark_start());
        let (fragments_tx, fragments_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = oneshot::channel();
        let (cancel, cancel_rx) = CancelHandle::new();

        let span = tracing::info_span!("call", %call_id, mode = mode.as_str());
        tokio::spawn(
            pump_call(
                Exchange {
                    http: self.http.clone(),
                    url: self.url.clone(),
                    request,
                    mode,
                    timer: timer.clone(),
                },
                fragments_tx,
                completion_tx,
                cancel_rx,
            )
            .instrument(span),
        );

        Ok((
            PendingCompletion::new(call_id, mode, completion_rx, timer, cancel),
            FragmentStream::new(fragments_rx),
        ))
    }
}

struct Exchange {
    http: reqwest::Client,
    url: Arc<str>,
    request: CallRequest,
    mode: DeliveryMode,
    timer: Arc<CallTimer>,
}

/// Runs one exchange to its terminal record and settles the completion.
///
/// The only task that reads the response body; both call views are fed from
/// here.
async fn pump_call(
    exchange: Exchange,
    fragments_tx: mpsc::UnboundedSender<FragmentEvent>,
    completion_tx: oneshot::Sender<Result<String, ClientError>>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let timer = exchange.timer.clone();
    let outcome = tokio::select! {
        outcome = run_exchange(exchange, &fragments_tx) => outcome,
        _ = wait_cancelled(&mut cancel_rx) => Err(ClientError::Cancelled),
    };
    drop(fragments_tx);

    match &outcome {
        Ok(completion) => info!(
            chars = completion.len(),
            first_output_ms = timer.first_output().map(|d| d.as_millis() as u64),
            elapsed_ms = timer.elapsed().as_millis() as u64,
            "call completed"
        ),
        Err(err) => warn!(error = %err, "call failed"),
    }
    let _ = completion_tx.send(outcome);
}

async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Every cancel handle is gone; nobody can cancel any more.
            futures::future::pending::<()>().await;
        }
    }
}

async fn run_exchange(
    exchange: Exchange,
    fragments_tx: &mpsc::UnboundedSender<FragmentEvent>,
) -> Result<String, ClientError> {
    let mut req = exchange.http.post(&*exchange.url).json(&exchange.request);
    if exchange.mode == DeliveryMode::Incremental {
        req = req.header(reqwest::header::ACCEPT, NDJSON_CONTENT_TYPE);
    }
    let response = req
        .send()
        .await
        .map_err(|e| ClientError::transport(format!("request failed: {e}")))?;
    let status = response.status();
    debug!(%status, "response headers received");

    let mut body = response.bytes_stream();
    let mut decoder = RecordDecoder::default();
    let mut fragments = 0_u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| {
            ClientError::transport(format!(
                "connection dropped after {fragments} fragment(s): {e}"
            ))
        })?;
        for decoded in decoder.push_chunk(&chunk) {
            let record = decoded.map_err(|e| {
                ClientError::transport(format!("malformed record (status {status}): {e}"))
            })?;
            if let Some(outcome) = observe(record, &exchange.timer, fragments_tx, &mut fragments) {
                return outcome;
            }
        }
    }
    if let Some(decoded) = decoder.finish() {
        let record = decoded.map_err(|e| {
            ClientError::transport(format!("malformed record (status {status}): {e}"))
        })?;
        if let Some(outcome) = observe(record, &exchange.timer, fragments_tx, &mut fragments) {
            return outcome;
        }
    }
    Err(ClientError::transport(format!(
        "exchange ended without a terminal record after {fragments} fragment(s) (status {status})"
    )))
}

/// Applies one record. Returns the call outcome for a terminal record.
fn observe(
    record: Record,
    timer: &CallTimer,
    fragments_tx: &mpsc::UnboundedSender<FragmentEvent>,
    fragments: &mut u64,
) -> Option<Result<String, ClientError>> {
    let first_output = timer.mark_first_output();
    match record {
        Record::Message(fragment) => {
            debug!(
                seq = *fragments,
                first_output_ms = first_output.as_millis() as u64,
                "fragment"
            );
            *fragments = fragments.saturating_add(1);
            // The caller may have dropped the fragment view; the completion
            // still needs the rest of the exchange.
            let _ = fragments_tx.send(fragment);
            None
        }
        Record::Result(result) => Some(Ok(result.completion)),
        Record::Error(error) => Some(Err(ClientError::Remote(error.into()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamcall_core::{CallError, ErrorCode};

    fn client() -> StreamCallClient {
        StreamCallClient::new(ClientConfig::new("http://127.0.0.1:9")).expect("client")
    }

    #[tokio::test]
    async fn blank_prompts_are_rejected_synchronously() {
        let client = client();
        for prompt in ["", "   "] {
            assert!(matches!(
                client.invoke(prompt),
                Err(ClientError::InvalidInput(CallError { code: ErrorCode::InvalidArgument, .. }))
            ));
            assert!(matches!(
                client.invoke_streaming(prompt),
                Err(ClientError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn empty_base_url_is_a_config_error() {
        assert!(matches!(
            StreamCallClient::new(ClientConfig::new(" ")),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn observe_marks_first_output_once_and_forwards_fragments() {
        let timer = CallTimer::start();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut count = 0;
        assert!(observe(Record::fragment("a"), &timer, &tx, &mut count).is_none());
        let first = timer.first_output().expect("marked");
        assert!(observe(Record::fragment("b"), &timer, &tx, &mut count).is_none());
        assert_eq!(timer.first_output(), Some(first));
        assert_eq!(count, 2);
        assert_eq!(rx.try_recv().map(|f| f.partial), Ok("a".to_string()));

        let outcome = observe(Record::result("ab"), &timer, &tx, &mut count);
        assert_eq!(outcome, Some(Ok("ab".to_string())));
    }

    #[test]
    fn error_record_becomes_remote_error() {
        let timer = CallTimer::start();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut count = 0;
        let outcome = observe(Record::error(CallError::internal("boom")), &timer, &tx, &mut count);
        assert!(matches!(outcome, Some(Err(ClientError::Remote(e))) if e.message == "boom"));
        assert!(timer.first_output().is_some());
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        let completion = client().invoke("The server is down.").expect("issued");
        assert!(matches!(completion.await, Err(ClientError::Transport(_))));
    }
}
