//! Queue capability errors.
//!
//! Bounded and stable: usage errors (`NotInitialized`, `UnknownStrategy`,
//! `Empty`, `UnknownSubscriber`, `InvalidSubscriber`), one integrity error
//! (`Inconsistent`, surfaced and never papered over), and the storage
//! passthrough. Errors bubble to the caller; no operation catches and
//! retries.

use std::path::PathBuf;

use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QueueError {
    /// The queue directory exists but the configuration database is missing
    /// at least one required key. Run the control plane's `init` first.
    #[error("queue at {path:?} is not initialized: missing `{key}`")]
    NotInitialized { path: PathBuf, key: &'static str },

    #[error("unknown strategy `{raw}`")]
    UnknownStrategy { raw: String },

    /// `pop` on an inbox with no pending messages.
    #[error("no message to pop for subscriber `{subscriber}`")]
    Empty { subscriber: String },

    /// The subscriber has no inbox database; it was never registered.
    #[error("subscriber `{subscriber}` is not registered")]
    UnknownSubscriber { subscriber: String },

    #[error("subscriber id `{raw}` is invalid: {reason}")]
    InvalidSubscriber { raw: String, reason: &'static str },

    /// A committed state violates the cross-database invariants. Requires
    /// operator attention; the queue refuses to guess.
    #[error("queue state inconsistent: {reason}")]
    Inconsistent { reason: String },

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl From<heed::Error> for QueueError {
    fn from(err: heed::Error) -> Self {
        QueueError::Storage(StoreError::Lmdb(err))
    }
}
