//! Fragment producer backed by an OpenAI-compatible chat completions API.
//!
//! Streaming requests set `"stream": true` and read the server-sent event
//! body (`data: {...}` blocks ending with `data: [DONE]`). Each
//! `choices[0].delta.content` becomes one fragment; the completion is the
//! concatenation of every delta.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use futures::StreamExt as _;
use futures::stream;
use streamcall_core::{FragmentProducer, FragmentStream, ProducerError};
use tokio::sync::oneshot;
use tracing::debug;

use crate::config::ConfigError;

const OPENAI_PRODUCER: &str = "openai";

/// Default instruction: restate the user's plain statement in corporate jargon.
pub const DEFAULT_SYSTEM_PROMPT: &str = "Rewrite the user's plain statement as an overly formal, \
jargon-heavy corporate announcement. Reply with the rewritten statement only.";

type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static>>;

/// Configuration for the OpenAI-compatible producer.
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    /// API key used for bearer auth.
    pub api_key: String,
    /// Base URL of the endpoint. Useful for proxies or local test servers.
    pub base_url: String,
    /// Chat model name.
    pub model: String,
    /// System instruction prepended to every prompt.
    pub system_prompt: String,
    /// HTTP connect timeout. Reads are left to the caller's transport.
    pub connect_timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com".to_string(),
            model: "gpt-4o-mini".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub(crate) fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// Producer that calls `/v1/chat/completions`.
pub struct OpenAiProducer {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiProducer {
    pub fn new(config: OpenAiConfig) -> Result<Self, ConfigError> {
        if config.api_key.trim().is_empty() {
            return Err(ConfigError::Producer(
                "OpenAI api_key must not be empty".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ConfigError::Producer(format!("failed to build OpenAI client: {e}")))?;
        Ok(Self { client, config })
    }

    fn request_body(&self, prompt: &str, stream: bool) -> serde_json::Value {
        let mut messages = Vec::new();
        let system_prompt = self.config.system_prompt.trim();
        if !system_prompt.is_empty() {
            messages.push(serde_json::json!({"role": "system", "content": system_prompt}));
        }
        messages.push(serde_json::json!({"role": "user", "content": prompt}));
        serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "stream": stream,
        })
    }

    async fn post(&self, prompt: &str, stream: bool) -> Result<reqwest::Response, ProducerError> {
        let response = self
            .client
            .post(self.config.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&self.request_body(prompt, stream))
            .send()
            .await
            .map_err(|e| {
                ProducerError::transport(OPENAI_PRODUCER, format!("OpenAI request failed: {e}"))
            })?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ProducerError::provider(
                OPENAI_PRODUCER,
                format!("OpenAI request failed with status {status}: {body}"),
                Some(status.as_u16()),
            ));
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl FragmentProducer for OpenAiProducer {
    fn id(&self) -> &str {
        OPENAI_PRODUCER
    }

    async fn generate(&self, prompt: &str) -> Result<String, ProducerError> {
        debug!(model = %self.config.model, "starting OpenAI completion");
        let response = self.post(prompt, false).await?;
        let value: serde_json::Value = response.json().await.map_err(|e| {
            ProducerError::protocol(OPENAI_PRODUCER, format!("invalid completion body: {e}"))
        })?;
        extract_message_content(&value).ok_or_else(|| {
            ProducerError::protocol(OPENAI_PRODUCER, "completion body has no message content")
        })
    }

    async fn generate_stream(&self, prompt: &str) -> Result<FragmentStream, ProducerError> {
        debug!(model = %self.config.model, "starting OpenAI completion stream");
        let response = self.post(prompt, true).await?;
        let (completion_tx, completion_rx) = oneshot::channel();
        let fragments = delta_stream(Box::pin(response.bytes_stream()), completion_tx);
        let completion = async move {
            completion_rx.await.unwrap_or_else(|_| {
                Err(ProducerError::protocol(
                    OPENAI_PRODUCER,
                    "fragment stream dropped before completion",
                ))
            })
        };
        Ok(FragmentStream {
            fragments: Box::pin(fragments),
            completion: Box::pin(completion),
        })
    }
}

/// Turns the SSE byte stream into text deltas and resolves `completion_tx`
/// with the concatenated text (or the failure) once the stream ends.
fn delta_stream(
    bytes_stream: ByteStream,
    completion_tx: oneshot::Sender<Result<String, ProducerError>>,
) -> impl futures::Stream<Item = Result<String, ProducerError>> + Send {
    struct State {
        bytes_stream: ByteStream,
        decoder: SseDecoder,
        pending: VecDeque<String>,
        aggregated: String,
        completion_tx: Option<oneshot::Sender<Result<String, ProducerError>>>,
        done: bool,
    }

    impl State {
        fn fail(&mut self, err: ProducerError) -> ProducerError {
            if let Some(tx) = self.completion_tx.take() {
                let _ = tx.send(Err(err.clone()));
            }
            err
        }
    }

    stream::try_unfold(
        State {
            bytes_stream,
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            aggregated: String::new(),
            completion_tx: Some(completion_tx),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(delta) = state.pending.pop_front() {
                    state.aggregated.push_str(&delta);
                    return Ok(Some((delta, state)));
                }
                if state.done {
                    if let Some(tx) = state.completion_tx.take() {
                        let _ = tx.send(Ok(std::mem::take(&mut state.aggregated)));
                    }
                    return Ok(None);
                }

                match state.bytes_stream.next().await {
                    Some(Ok(chunk)) => {
                        for frame in state.decoder.push_chunk(&chunk) {
                            match map_chunk_frame(&frame) {
                                Ok(ChunkFrame::Delta(text)) => state.pending.push_back(text),
                                Ok(ChunkFrame::Done) => state.done = true,
                                Ok(ChunkFrame::Skip) => {}
                                Err(err) => return Err(state.fail(err)),
                            }
                        }
                    }
                    Some(Err(e)) => {
                        return Err(state.fail(ProducerError::transport(
                            OPENAI_PRODUCER,
                            format!("OpenAI streaming read failed: {e}"),
                        )));
                    }
                    None => state.done = true,
                }
            }
        },
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub data: String,
}

#[derive(Default)]
pub(crate) struct SseDecoder {
    buf: Vec<u8>,
    /// Length of the buffered prefix already searched for a frame delimiter.
    scanned: usize,
}

impl SseDecoder {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        let mut start = 0;
        // A delimiter may straddle the previous chunk boundary.
        let mut from = self.scanned.saturating_sub(3);
        while let Some((idx, delim_len)) = find_frame_delimiter(&self.buf, from) {
            if let Some(frame) = parse_sse_frame(&self.buf[start..idx]) {
                frames.push(frame);
            }
            start = idx + delim_len;
            from = start;
        }
        self.buf.drain(..start);
        self.scanned = self.buf.len();
        frames
    }
}

fn find_frame_delimiter(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    (from..buf.len()).find_map(|i| {
        if buf[i..].starts_with(b"\n\n") {
            Some((i, 2))
        } else if buf[i..].starts_with(b"\r\n\r\n") {
            Some((i, 4))
        } else {
            None
        }
    })
}

fn parse_sse_frame(bytes: &[u8]) -> Option<SseFrame> {
    let text = String::from_utf8_lossy(bytes);
    let data_lines: Vec<&str> = text
        .split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim_start)
        .collect();
    if data_lines.is_empty() {
        return None;
    }
    Some(SseFrame {
        data: data_lines.join("\n"),
    })
}

#[derive(Debug, PartialEq, Eq)]
enum ChunkFrame {
    Delta(String),
    Done,
    Skip,
}

fn map_chunk_frame(frame: &SseFrame) -> Result<ChunkFrame, ProducerError> {
    let data = frame.data.trim();
    if data.is_empty() {
        return Ok(ChunkFrame::Skip);
    }
    if data == "[DONE]" {
        return Ok(ChunkFrame::Done);
    }
    let value: serde_json::Value = serde_json::from_str(data).map_err(|e| {
        ProducerError::protocol(OPENAI_PRODUCER, format!("invalid SSE JSON frame: {e}"))
    })?;
    if let Some(message) = value
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|v| v.as_str())
    {
        return Err(ProducerError::provider(OPENAI_PRODUCER, message, None));
    }
    match value
        .pointer("/choices/0/delta/content")
        .and_then(|v| v.as_str())
    {
        Some(text) if !text.is_empty() => Ok(ChunkFrame::Delta(text.to_string())),
        _ => Ok(ChunkFrame::Skip),
    }
}

fn extract_message_content(value: &serde_json::Value) -> Option<String> {
    value
        .pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .map(ToOwned::to_owned)
}
