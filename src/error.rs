//! Crate-level convenience error.
//!
//! Not a "god error": a thin transparent wrapper over the capability errors,
//! for callers that mix queue traffic with the filesystem helpers.

use thiserror::Error;

use crate::fsutil::FsUtilError;
use crate::queue::QueueError;
use crate::store::StoreError;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Fs(#[from] FsUtilError),
}
