use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use streamcall_core::{CallTimer, DeliveryMode, FragmentEvent};
use tokio::sync::{mpsc, oneshot, watch};

use crate::errors::ClientError;

/// Handle used to cancel an in-flight call.
///
/// Cancelling drops the HTTP exchange, ends the fragment stream and rejects
/// the completion with [`ClientError::Cancelled`]. It has no effect once the
/// terminal record was received.
#[derive(Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub(crate) fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, rx)
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Lazy, finite sequence of fragments of one call.
///
/// Ends when the terminal record arrives, when the exchange fails, or when
/// the call is cancelled. Dropping it does not cancel the call.
pub struct FragmentStream {
    rx: mpsc::UnboundedReceiver<FragmentEvent>,
}

impl FragmentStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<FragmentEvent>) -> Self {
        Self { rx }
    }

    /// Waits for the next fragment. Returns `None` once the stream ended.
    pub async fn next_fragment(&mut self) -> Option<FragmentEvent> {
        self.rx.recv().await
    }
}

impl futures::Stream for FragmentStream {
    type Item = FragmentEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Future resolving to the completion text of one call.
///
/// The exchange runs in its own task, so this settles whether or not the
/// matching [`FragmentStream`] is consumed.
pub struct PendingCompletion {
    call_id: uuid::Uuid,
    mode: DeliveryMode,
    rx: oneshot::Receiver<Result<String, ClientError>>,
    timer: Arc<CallTimer>,
    cancel: CancelHandle,
}

impl PendingCompletion {
    pub(crate) fn new(
        call_id: uuid::Uuid,
        mode: DeliveryMode,
        rx: oneshot::Receiver<Result<String, ClientError>>,
        timer: Arc<CallTimer>,
        cancel: CancelHandle,
    ) -> Self {
        Self {
            call_id,
            mode,
            rx,
            timer,
            cancel,
        }
    }

    /// Client-side id used in logs for this call.
    pub fn call_id(&self) -> uuid::Uuid {
        self.call_id
    }

    /// Delivery mode requested for this call. Fixed at issuance.
    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    /// Time from issuance to the first observed record, once known.
    pub fn first_output(&self) -> Option<Duration> {
        self.timer.first_output()
    }

    pub fn timer(&self) -> Arc<CallTimer> {
        self.timer.clone()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }
}

impl Future for PendingCompletion {
    type Output = Result<String, ClientError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(ClientError::transport(
                    "call task ended without a terminal result",
                ))
            })
        })
    }
}

/// Incremental call: a fragment stream and a completion future backed by
/// the same exchange.
pub struct StreamingCall {
    pub fragments: FragmentStream,
    pub completion: PendingCompletion,
}

impl StreamingCall {
    pub fn cancel_handle(&self) -> CancelHandle {
        self.completion.cancel_handle()
    }

    pub fn first_output(&self) -> Option<Duration> {
        self.completion.first_output()
    }

    pub fn into_parts(self) -> (FragmentStream, PendingCompletion) {
        (self.fragments, self.completion)
    }
}
