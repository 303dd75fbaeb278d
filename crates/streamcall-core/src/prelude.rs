//! Common imports for typical usage.
pub use crate::{
    CallError, CallRequest, CallTimer, DeliveryMode, Dispatched, Dispatcher, ErrorCode,
    ErrorEvent, EventStream, FragmentEvent, FragmentProducer, FragmentStream, ProducerError,
    Record, RecordDecoder, ResultEvent, ScriptedProducer, ValidatedRequest, encode_record,
};
