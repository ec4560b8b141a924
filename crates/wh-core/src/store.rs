//! Persistence contract and report shapes.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::activity_type::ActivityType;
use crate::registry::CloseAllSummary;
use crate::session::Session;
use crate::types::{SessionId, UserId, WorkBlockId};
use crate::window::WindowConfig;
use crate::work_block::WorkBlock;

/// A storage backend failure. Opaque to the engine, which only logs it.
#[derive(Debug, Error)]
#[error("storage error: {0}")]
pub struct StoreError(#[source] pub Box<dyn std::error::Error + Send + Sync>);

impl StoreError {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Box::new(err))
    }
}

/// Durable storage for sessions, work blocks and their activity counters.
///
/// Implementations are driven from a single writer thread, so methods take
/// `&self` and need not be `Sync`.
pub trait ActivityStore {
    /// Insert or update a session.
    fn save_session(&self, session: &Session) -> Result<(), StoreError>;

    /// Insert or update a work block's scalar fields.
    ///
    /// The histogram is not written here; it is maintained exclusively by
    /// [`ActivityStore::increment_activity_counter`].
    fn save_work_block(&self, block: &WorkBlock) -> Result<(), StoreError>;

    fn increment_activity_counter(
        &self,
        work_block_id: &WorkBlockId,
        activity_type: &ActivityType,
    ) -> Result<(), StoreError>;

    fn load_active_sessions(&self, user_id: &UserId) -> Result<Vec<Session>, StoreError>;

    /// All blocks of a session, histograms included, oldest first.
    fn work_blocks_for_session(&self, session_id: &SessionId)
    -> Result<Vec<WorkBlock>, StoreError>;

    /// Close every active session and work block in storage.
    ///
    /// Sessions whose window elapsed by `now` expire at the window end and
    /// their blocks end as `session_ended`. Everything else closes at `now`.
    /// Block ends follow [`WindowConfig::idle_close_time`] capped at the
    /// earlier of `now` and the session window end.
    fn close_all_active(
        &self,
        now: DateTime<Utc>,
        config: &WindowConfig,
    ) -> Result<CloseAllSummary, StoreError>;

    /// Mark blocks left active by a previous run as idle, using the same end
    /// time rule as [`ActivityStore::close_all_active`]. Returns the count.
    fn finalize_orphaned_work_blocks(
        &self,
        now: DateTime<Utc>,
        config: &WindowConfig,
    ) -> Result<usize, StoreError>;

    /// Aggregate work between `start` (inclusive) and `end` (exclusive).
    fn work_summary(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<WorkSummary, StoreError>;
}

/// Aggregated work over a date range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkSummary {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub total_work_seconds: i64,
    pub session_count: u64,
    pub work_block_count: u64,
    /// Blocks left out because their boundaries were implausible.
    pub excluded_work_blocks: u64,
    pub projects: Vec<ProjectSummary>,
    pub days: Vec<DaySummary>,
    pub activity_histogram: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub project_name: String,
    pub project_path: String,
    pub work_seconds: i64,
    pub work_blocks: u64,
    pub activity_count: u64,
}

/// Work attributed to one UTC day, by block start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySummary {
    pub date: NaiveDate,
    pub work_seconds: i64,
    pub work_blocks: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("disk full")]
    struct DiskFull;

    #[test]
    fn store_error_keeps_source() {
        let err = StoreError::new(DiskFull);
        assert_eq!(err.to_string(), "storage error: disk full");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn summary_serializes_dates_plainly() {
        let day = DaySummary {
            date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            work_seconds: 60,
            work_blocks: 1,
        };
        let json = serde_json::to_value(&day).unwrap();
        assert_eq!(json["date"], "2025-06-02");
    }
}
