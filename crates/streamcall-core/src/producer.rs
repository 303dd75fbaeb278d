use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::StreamExt as _;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};

use crate::errors::ProducerError;

/// Lazy, finite, non-restartable output of a streaming generation.
///
/// `fragments` must be driven to its end before `completion` is awaited;
/// producers are free to resolve `completion` from state built up while the
/// fragments were pulled.
pub struct FragmentStream {
    pub fragments: BoxStream<'static, Result<String, ProducerError>>,
    pub completion: BoxFuture<'static, Result<String, ProducerError>>,
}

/// Text generator driven by the dispatcher.
///
/// Implementations must be `Send + Sync` so one instance can be shared by
/// every concurrent call through an `Arc`.
#[async_trait::async_trait]
pub trait FragmentProducer: Send + Sync {
    /// Stable identifier used in logs and error messages.
    fn id(&self) -> &str;

    /// Generates the full text in one step.
    async fn generate(&self, prompt: &str) -> Result<String, ProducerError>;

    /// Starts a streaming generation.
    async fn generate_stream(&self, prompt: &str) -> Result<FragmentStream, ProducerError>;
}

const SCRIPTED_PRODUCER: &str = "scripted";

/// Deterministic producer that replays a fixed list of fragments.
///
/// Used by tests and by the demo when no model endpoint is configured.
#[derive(Clone)]
pub struct ScriptedProducer {
    fragments: Vec<String>,
    completion: Option<String>,
    fragment_delay: Option<Duration>,
    fail_after: Option<(usize, ProducerError)>,
    fail_on_start: Option<ProducerError>,
    fail_completion: Option<ProducerError>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedProducer {
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
            completion: None,
            fragment_delay: None,
            fail_after: None,
            fail_on_start: None,
            fail_completion: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Overrides the final text. Defaults to the concatenated fragments.
    pub fn completion(mut self, text: impl Into<String>) -> Self {
        self.completion = Some(text.into());
        self
    }

    /// Sleeps before yielding each fragment.
    pub fn fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = Some(delay);
        self
    }

    /// Yields `count` fragments, then fails with `error`.
    pub fn fail_after(mut self, count: usize, error: ProducerError) -> Self {
        self.fail_after = Some((count, error));
        self
    }

    /// Fails before any fragment is produced.
    pub fn fail_on_start(mut self, error: ProducerError) -> Self {
        self.fail_on_start = Some(error);
        self
    }

    /// Yields every fragment, then fails the final text with `error`.
    pub fn fail_completion(mut self, error: ProducerError) -> Self {
        self.fail_completion = Some(error);
        self
    }

    /// Number of `generate`/`generate_stream` invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn final_text(&self) -> Result<String, ProducerError> {
        if let Some(error) = &self.fail_completion {
            return Err(error.clone());
        }
        Ok(self
            .completion
            .clone()
            .unwrap_or_else(|| self.fragments.concat()))
    }

    fn scripted_items(&self) -> Vec<Result<String, ProducerError>> {
        match &self.fail_after {
            Some((count, error)) => self
                .fragments
                .iter()
                .take(*count)
                .cloned()
                .map(Ok)
                .chain(std::iter::once(Err(error.clone())))
                .collect(),
            None => self.fragments.iter().cloned().map(Ok).collect(),
        }
    }
}

impl Default for ScriptedProducer {
    fn default() -> Self {
        Self::new(["Per ", "our ", "strategic review, "])
            .completion("Per our strategic review, the infrastructure requires urgent remediation.")
    }
}

#[async_trait::async_trait]
impl FragmentProducer for ScriptedProducer {
    fn id(&self) -> &str {
        SCRIPTED_PRODUCER
    }

    async fn generate(&self, _prompt: &str) -> Result<String, ProducerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.fail_on_start {
            return Err(error.clone());
        }
        for item in self.scripted_items() {
            if let Some(delay) = self.fragment_delay {
                tokio::time::sleep(delay).await;
            }
            item?;
        }
        self.final_text()
    }

    async fn generate_stream(&self, _prompt: &str) -> Result<FragmentStream, ProducerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.fail_on_start {
            return Err(error.clone());
        }
        let delay = self.fragment_delay;
        let fragments = stream::iter(self.scripted_items()).then(move |item| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            item
        });
        let completion = match &self.fail_after {
            Some((_, error)) => Err(error.clone()),
            None => self.final_text(),
        };
        Ok(FragmentStream {
            fragments: Box::pin(fragments),
            completion: Box::pin(async move { completion }),
        })
    }
}
