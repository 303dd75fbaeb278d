//! Core of the incremental delivery protocol.
//!
//! A single logical call is served either as one atomic [`Record::Result`]
//! or as an ordered sequence of [`Record::Message`] fragments followed by one
//! terminal record. This crate owns the wire types, the NDJSON framer, the
//! [`Dispatcher`] that drives a [`FragmentProducer`], and per-call timing.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use futures::StreamExt as _;
//! use streamcall_core::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), CallError> {
//! let producer = ScriptedProducer::new(["Per ", "our ", "strategic review, "]);
//! let dispatcher = Dispatcher::new(Arc::new(producer));
//!
//! let request = CallRequest::new("The server is down.").validate()?;
//! if let Dispatched::Incremental(mut events) =
//!     dispatcher.dispatch(request, DeliveryMode::Incremental).await
//! {
//!     while let Some(record) = events.next().await {
//!         println!("{}", String::from_utf8_lossy(&encode_record(&record)));
//!     }
//! }
//! # Ok(())
//! # }
//! ```

/// Response dispatcher that selects single-shot or incremental delivery.
pub mod dispatcher;
/// Error taxonomy shared by producers, the server and the client.
pub mod errors;
/// Newline-delimited record encoding and incremental decoding.
pub mod framer;
/// Process-wide tracing initialization.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Fragment producer contract and the scripted producer.
pub mod producer;
/// Call request, events, wire records and delivery mode.
pub mod protocol;
/// Time-to-first-output measurement.
pub mod timing;

pub use dispatcher::{DEFAULT_EVENT_BUFFER, Dispatched, Dispatcher, EventStream};
pub use errors::{CallError, ErrorCode, FrameError, ProducerError};
pub use framer::{NDJSON_CONTENT_TYPE, RecordDecoder, encode_record};
pub use producer::{FragmentProducer, FragmentStream, ScriptedProducer};
pub use protocol::{
    CallRequest, DeliveryMode, ErrorEvent, FragmentEvent, GENERATE_PATH, Record, ResultEvent,
    ValidatedRequest,
};
pub use timing::{CallTimer, mark_start};
