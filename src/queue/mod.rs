//! Persistent queue engine and its data model.
//!
//! Module order follows the dependency chain: `model` defines names,
//! identifiers and configuration; `error` the failure taxonomy; `engine` the
//! transactional operations on top of both.

pub mod engine;
pub mod error;
pub mod model;

pub use engine::Queue;
pub use error::QueueError;
pub use model::{
    parse_strategy, HighWaterMark, MessageId, QueueData, Strategy, SubscriberId,
    DEFAULT_HWM_DB_SIZE_BYTES, DEFAULT_MAX_MSGS_NUM, DEFAULT_MSG_TIMEOUT_SECS,
};
