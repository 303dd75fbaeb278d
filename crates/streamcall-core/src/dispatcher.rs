use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::StreamExt as _;
use tokio::sync::mpsc;
use tracing::{Instrument as _, debug, info, warn};

use crate::errors::CallError;
use crate::producer::{FragmentProducer, FragmentStream};
use crate::protocol::{DeliveryMode, Record, ValidatedRequest};

/// Default bounded buffer between the producer pump and the transport.
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Outcome of [`Dispatcher::dispatch`].
pub enum Dispatched {
    /// The single terminal record of a non-incremental call.
    Single(Record),
    /// Ordered records of an incremental call: zero or more fragments then
    /// exactly one terminal record.
    Incremental(EventStream),
}

/// Ordered record stream fed by a spawned producer pump.
///
/// Dropping the stream makes the pump stop pulling from the producer.
pub struct EventStream {
    rx: mpsc::Receiver<Record>,
}

impl futures::Stream for EventStream {
    type Item = Record;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Serves validated calls from a shared fragment producer.
#[derive(Clone)]
pub struct Dispatcher {
    producer: Arc<dyn FragmentProducer>,
    event_buffer: usize,
}

impl Dispatcher {
    pub fn new(producer: Arc<dyn FragmentProducer>) -> Self {
        Self {
            producer,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    /// Sets the bounded buffer size between the pump task and the consumer.
    /// Values below one are raised to one.
    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    pub fn producer_id(&self) -> &str {
        self.producer.id()
    }

    /// Serves one call in the given mode.
    ///
    /// Single mode runs the producer to completion before returning.
    /// Incremental mode returns immediately; a spawned task drives the
    /// producer and feeds the returned stream.
    pub async fn dispatch(&self, request: ValidatedRequest, mode: DeliveryMode) -> Dispatched {
        match mode {
            DeliveryMode::Single => Dispatched::Single(self.dispatch_single(request).await),
            DeliveryMode::Incremental => Dispatched::Incremental(self.dispatch_incremental(request)),
        }
    }

    async fn dispatch_single(&self, request: ValidatedRequest) -> Record {
        let call_id = request.call_id();
        let producer = self.producer.id();
        match self.producer.generate(request.prompt()).await {
            Ok(completion) => {
                info!(%call_id, producer, chars = completion.len(), "single call completed");
                Record::result(completion)
            }
            Err(err) => {
                warn!(%call_id, producer, error = %err, "single call failed");
                Record::error(CallError::from(&err))
            }
        }
    }

    fn dispatch_incremental(&self, request: ValidatedRequest) -> EventStream {
        let (tx, rx) = mpsc::channel(self.event_buffer);
        let span = tracing::info_span!(
            "dispatch",
            call_id = %request.call_id(),
            producer = self.producer.id(),
            mode = DeliveryMode::Incremental.as_str(),
        );
        tokio::spawn(pump_fragments(self.producer.clone(), request, tx).instrument(span));
        EventStream { rx }
    }
}

async fn pump_fragments(
    producer: Arc<dyn FragmentProducer>,
    request: ValidatedRequest,
    tx: mpsc::Sender<Record>,
) {
    let FragmentStream {
        mut fragments,
        completion,
    } = match producer.generate_stream(request.prompt()).await {
        Ok(stream) => stream,
        Err(err) => {
            warn!(error = %err, "producer failed before streaming");
            send_record(&tx, Record::error(CallError::from(&err))).await;
            return;
        }
    };

    let mut seq = 0_u64;
    loop {
        let next = tokio::select! {
            _ = tx.closed() => {
                debug!(seq, "event stream dropped; abandoning producer");
                return;
            }
            next = fragments.next() => next,
        };
        match next {
            Some(Ok(partial)) => {
                debug!(seq, chars = partial.len(), "fragment");
                if !send_record(&tx, Record::fragment(partial)).await {
                    debug!(seq, "event stream dropped during output");
                    return;
                }
                seq = seq.saturating_add(1);
            }
            Some(Err(err)) => {
                warn!(fragments = seq, error = %err, "producer failed mid-stream");
                send_record(&tx, Record::error(CallError::from(&err))).await;
                return;
            }
            None => break,
        }
    }
    drop(fragments);

    let terminal = match completion.await {
        Ok(completion) => {
            info!(fragments = seq, chars = completion.len(), "incremental call completed");
            Record::result(completion)
        }
        Err(err) => {
            warn!(fragments = seq, error = %err, "producer failed to resolve completion");
            Record::error(CallError::from(&err))
        }
    };
    send_record(&tx, terminal).await;
}

async fn send_record(tx: &mpsc::Sender<Record>, record: Record) -> bool {
    tx.send(record).await.is_ok()
}
