//! Data model of the queue: database names, configuration keys, identifiers.
//!
//! Five kinds of named databases live inside one environment:
//! - `data_db`    : message id -> payload bytes
//! - `meta_db`    : message id -> publish timestamp (seconds, decimal ASCII)
//! - `pending_db` : message id -> remaining subscriber count (decimal ASCII)
//! - `queue_db`   : configuration keys listed below
//! - one inbox per subscriber, named after the subscriber id: message id -> ""
//!
//! All configuration values are decimal-ASCII or plain strings so a queue
//! directory stays inspectable with generic LMDB tooling.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::QueueError;

pub(crate) const DATA_DB: &str = "data_db";
pub(crate) const META_DB: &str = "meta_db";
pub(crate) const PENDING_DB: &str = "pending_db";
pub(crate) const QUEUE_DB: &str = "queue_db";

pub(crate) const HWM_DB_SIZE_BYTES_KEY: &str = "hwm_db_size_bytes";
pub(crate) const MAX_MSGS_NUM_KEY: &str = "max_msgs_num";
pub(crate) const MSG_TIMEOUT_SECS_KEY: &str = "msg_timeout_secs";
pub(crate) const STRATEGY_KEY: &str = "strategy";
pub(crate) const SUBSCRIBER_IDS_KEY: &str = "subscriber_ids";

/// Default message timeout (secs).
pub const DEFAULT_MSG_TIMEOUT_SECS: u64 = 500;
/// Default maximal number of live messages.
pub const DEFAULT_MAX_MSGS_NUM: u64 = 64 * 1024;
/// Default high water mark for the data database size (~30 GiB).
pub const DEFAULT_HWM_DB_SIZE_BYTES: u64 = 30 * 1024 * 1024 * 1024;

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Message identifier: publish timestamp in decimal seconds concatenated with
/// a hyphenated v4 UUID.
///
/// Keys sort ascending in LMDB, so lexicographic order is publish-time order
/// with a random tie-break within one second. The randomness makes practical
/// collision negligible, but ids are not a security boundary.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub(crate) fn generate(ts_secs: u64) -> Self {
        Self(format!("{ts_secs}{}", Uuid::new_v4()))
    }

    pub(crate) fn from_raw(raw: &str) -> Self {
        Self(raw.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({:?})", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Subscriber identifier, doubling as the name of the subscriber's inbox
/// database.
///
/// Must be non-empty, free of whitespace (the registry is a space-separated
/// string) and distinct from the built-in database names.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(String);

impl SubscriberId {
    pub fn new(s: impl Into<String>) -> Result<Self, QueueError> {
        let s = s.into();
        if s.is_empty() {
            return Err(QueueError::InvalidSubscriber {
                raw: s,
                reason: "empty",
            });
        }
        if s.chars().any(char::is_whitespace) {
            return Err(QueueError::InvalidSubscriber {
                raw: s,
                reason: "contains whitespace",
            });
        }
        if matches!(s.as_str(), DATA_DB | META_DB | PENDING_DB | QUEUE_DB) {
            return Err(QueueError::InvalidSubscriber {
                raw: s,
                reason: "collides with a built-in database name",
            });
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriberId({:?})", self.0)
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which half of the queue is dropped when a high water mark is exceeded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Drop the oldest half.
    PruneFirst,
    /// Drop the newest half.
    PruneLast,
}

impl Strategy {
    /// The on-disk literal stored under the `strategy` key.
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::PruneFirst => "prune_first",
            Strategy::PruneLast => "prune_last",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse the overflow strategy stored in the queue database.
pub fn parse_strategy(raw: &str) -> Result<Strategy, QueueError> {
    match raw {
        "prune_first" => Ok(Strategy::PruneFirst),
        "prune_last" => Ok(Strategy::PruneLast),
        _ => Err(QueueError::UnknownStrategy {
            raw: raw.to_string(),
        }),
    }
}

/// The three limits that trigger reactive pruning.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighWaterMark {
    /// Age in seconds after which a message is dangling regardless of its
    /// pending count.
    pub msg_timeout_secs: u64,
    /// Upper bound on the number of live messages.
    pub max_msgs_num: u64,
    /// Upper bound on the approximate byte size of the data database.
    pub hwm_db_size_bytes: u64,
}

impl Default for HighWaterMark {
    fn default() -> Self {
        Self {
            msg_timeout_secs: DEFAULT_MSG_TIMEOUT_SECS,
            max_msgs_num: DEFAULT_MAX_MSGS_NUM,
            hwm_db_size_bytes: DEFAULT_HWM_DB_SIZE_BYTES,
        }
    }
}

/// Parsed contents of the `queue_db` configuration database.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueData {
    pub hwm: HighWaterMark,
    pub strategy: Strategy,
    pub subscriber_ids: Vec<SubscriberId>,
}
