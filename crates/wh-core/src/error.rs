//! Engine error type.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::ValidationError;

/// Reasons an activity is refused by the engine.
///
/// None of these mutate state; the caller logs and moves on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("timestamp {timestamp} is ahead of receive time {now}")]
    TimestampInFuture {
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    #[error("timestamp {timestamp} is older than the backfill window (now {now})")]
    TimestampTooOld {
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    #[error("implausible timestamp {timestamp}")]
    ImplausibleTimestamp { timestamp: DateTime<Utc> },
}
