//! Work-block manager: idle-bounded stretches of work on one project.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::activity_type::ActivityType;
use crate::types::{SessionId, ValidationError, WorkBlockId};
use crate::window::WindowConfig;

/// Blocks longer than this are treated as clock damage and left out of
/// reports.
pub const MAX_PLAUSIBLE_BLOCK_HOURS: i64 = 12;

/// Lifecycle of a work block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkBlockState {
    Active,
    /// Closed because the idle timeout passed.
    Idle,
    /// Closed because its session expired.
    SessionEnded,
    /// Closed by the administrative bulk close.
    ClosedByCleanup,
}

impl WorkBlockState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Idle => "idle",
            Self::SessionEnded => "session_ended",
            Self::ClosedByCleanup => "closed_by_cleanup",
        }
    }
}

impl fmt::Display for WorkBlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkBlockState {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "idle" => Ok(Self::Idle),
            "session_ended" => Ok(Self::SessionEnded),
            "closed_by_cleanup" => Ok(Self::ClosedByCleanup),
            other => Err(ValidationError::InvalidState {
                entity: "work block",
                value: other.to_string(),
            }),
        }
    }
}

/// A contiguous stretch of activity on one project inside one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkBlock {
    pub id: WorkBlockId,
    pub session_id: SessionId,
    pub project_name: String,
    pub project_path: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_activity_time: DateTime<Utc>,
    pub activity_count: u64,
    #[serde(default)]
    pub activity_histogram: BTreeMap<ActivityType, u64>,
    pub state: WorkBlockState,
}

impl WorkBlock {
    fn open(
        session_id: SessionId,
        project_name: &str,
        project_path: &str,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: WorkBlockId::generate(),
            session_id,
            project_name: project_name.to_string(),
            project_path: project_path.to_string(),
            start_time,
            end_time: None,
            last_activity_time: start_time,
            activity_count: 0,
            activity_histogram: BTreeMap::new(),
            state: WorkBlockState::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == WorkBlockState::Active
    }

    /// Count one event of `activity_type` at `timestamp`.
    pub fn record_activity(&mut self, timestamp: DateTime<Utc>, activity_type: &ActivityType) {
        self.activity_count += 1;
        self.last_activity_time = self.last_activity_time.max(timestamp);
        *self
            .activity_histogram
            .entry(activity_type.clone())
            .or_insert(0) += 1;
    }

    /// Elapsed time, derived from the recorded boundaries.
    ///
    /// Uses `end_time` once closed, `last_activity_time` while active. Never
    /// negative.
    pub fn duration(&self) -> Duration {
        let end = self.end_time.unwrap_or(self.last_activity_time);
        (end - self.start_time).max(Duration::zero())
    }

    /// The duration, or `None` if the stored boundaries are not believable.
    pub fn plausible_duration(&self) -> Option<Duration> {
        let end = self.end_time.unwrap_or(self.last_activity_time);
        let raw = end - self.start_time;
        (raw >= Duration::zero() && raw <= Duration::hours(MAX_PLAUSIBLE_BLOCK_HOURS))
            .then_some(raw)
    }

    fn close(&mut self, end_time: DateTime<Utc>, state: WorkBlockState) {
        self.end_time = Some(end_time);
        self.state = state;
    }
}

/// Result of resolving the work block for an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockResolution {
    pub block_id: WorkBlockId,
    /// The previous block for the same key, if this call closed it as idle.
    pub closed: Option<WorkBlockId>,
    pub created: bool,
}

/// (session, project name, normalized project path).
type BlockKey = (SessionId, String, String);

/// Indexed table of in-memory work blocks.
#[derive(Debug, Default)]
pub struct WorkBlockTable {
    by_id: HashMap<WorkBlockId, WorkBlock>,
    active_by_key: HashMap<BlockKey, WorkBlockId>,
}

impl WorkBlockTable {
    pub fn get(&self, id: &WorkBlockId) -> Option<&WorkBlock> {
        self.by_id.get(id)
    }

    pub fn get_mut(&mut self, id: &WorkBlockId) -> Option<&mut WorkBlock> {
        self.by_id.get_mut(id)
    }

    pub fn all(&self) -> impl Iterator<Item = &WorkBlock> {
        self.by_id.values()
    }

    pub fn active(&self) -> impl Iterator<Item = &WorkBlock> {
        self.active_by_key
            .values()
            .filter_map(|id| self.by_id.get(id))
    }

    pub fn active_count(&self) -> usize {
        self.active_by_key.len()
    }

    pub fn active_for_session(&self, session_id: &SessionId) -> impl Iterator<Item = &WorkBlock> {
        self.active()
            .filter(move |block| &block.session_id == session_id)
    }

    /// Return the active block for (`session_id`, project) that covers
    /// `timestamp`, closing an idle one and opening a fresh one if needed.
    pub fn resolve_work_block(
        &mut self,
        session_id: &SessionId,
        project_name: &str,
        project_path: &str,
        timestamp: DateTime<Utc>,
        config: &WindowConfig,
    ) -> BlockResolution {
        let key = (
            session_id.clone(),
            project_name.to_string(),
            project_path.to_string(),
        );
        let mut closed = None;

        if let Some(id) = self.active_by_key.get(&key).cloned() {
            match self.by_id.get_mut(&id) {
                Some(block) if config.within_idle(block.last_activity_time, timestamp) => {
                    return BlockResolution {
                        block_id: id,
                        closed: None,
                        created: false,
                    };
                }
                Some(block) => {
                    let end = block.last_activity_time + config.idle_timeout;
                    block.close(end, WorkBlockState::Idle);
                    tracing::debug!(block_id = %id, project = project_name, end = %end, "work block went idle");
                    closed = Some(id);
                }
                None => {}
            }
            self.active_by_key.remove(&key);
        }

        let block = WorkBlock::open(session_id.clone(), project_name, project_path, timestamp);
        let block_id = block.id.clone();
        tracing::debug!(block_id = %block_id, session_id = %session_id, project = project_name, "work block opened");
        self.active_by_key.insert(key, block_id.clone());
        self.by_id.insert(block_id.clone(), block);

        BlockResolution {
            block_id,
            closed,
            created: true,
        }
    }

    /// Close every active block of `session_id` as its session ends.
    ///
    /// End times follow the idle formula, capped at `session_end`.
    pub fn close_for_session(
        &mut self,
        session_id: &SessionId,
        session_end: DateTime<Utc>,
        config: &WindowConfig,
    ) -> Vec<WorkBlockId> {
        self.close_where(
            |block| &block.session_id == session_id,
            session_end,
            WorkBlockState::SessionEnded,
            config,
        )
    }

    /// Close blocks that have seen no activity for longer than the idle
    /// timeout as of `now`.
    pub fn close_idle(&mut self, now: DateTime<Utc>, config: &WindowConfig) -> Vec<WorkBlockId> {
        self.close_where(
            |block| !config.within_idle(block.last_activity_time, now),
            now,
            WorkBlockState::Idle,
            config,
        )
    }

    /// Close every active block at `now`.
    pub fn close_all(&mut self, now: DateTime<Utc>, config: &WindowConfig) -> Vec<WorkBlockId> {
        self.close_where(|_| true, now, WorkBlockState::ClosedByCleanup, config)
    }

    fn close_where(
        &mut self,
        predicate: impl Fn(&WorkBlock) -> bool,
        cap: DateTime<Utc>,
        state: WorkBlockState,
        config: &WindowConfig,
    ) -> Vec<WorkBlockId> {
        let closing: Vec<BlockKey> = self
            .active_by_key
            .iter()
            .filter(|(_, id)| self.by_id.get(*id).is_some_and(&predicate))
            .map(|(key, _)| key.clone())
            .collect();

        let mut closed = Vec::with_capacity(closing.len());
        for key in closing {
            let Some(id) = self.active_by_key.remove(&key) else {
                continue;
            };
            if let Some(block) = self.by_id.get_mut(&id) {
                block.close(config.idle_close_time(block.last_activity_time, cap), state);
            }
            closed.push(id);
        }
        closed
    }

    /// Drop closed blocks from memory. Storage keeps the history.
    pub fn evict_closed(&mut self) -> usize {
        let before = self.by_id.len();
        self.by_id.retain(|_, block| block.is_active());
        before - self.by_id.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap()
    }

    fn ts(minutes: i64) -> DateTime<Utc> {
        base() + Duration::minutes(minutes)
    }

    fn session() -> SessionId {
        SessionId::new("session-1").unwrap()
    }

    fn hit(table: &mut WorkBlockTable, project: &str, minute: i64) -> BlockResolution {
        let config = WindowConfig::default();
        let res = table.resolve_work_block(&session(), project, "/p", ts(minute), &config);
        table
            .get_mut(&res.block_id)
            .unwrap()
            .record_activity(ts(minute), &ActivityType::Edit);
        res
    }

    #[test]
    fn test_idle_gap_splits_block() {
        let mut table = WorkBlockTable::default();

        let a = hit(&mut table, "P", 0);
        hit(&mut table, "P", 2);
        hit(&mut table, "P", 4);
        let b = hit(&mut table, "P", 10);

        assert_ne!(a.block_id, b.block_id);
        assert_eq!(b.closed.as_ref(), Some(&a.block_id));

        let block_a = table.get(&a.block_id).unwrap();
        assert_eq!(block_a.start_time, ts(0));
        assert_eq!(block_a.last_activity_time, ts(4));
        assert_eq!(block_a.activity_count, 3);
        assert_eq!(block_a.end_time, Some(ts(9)));
        assert_eq!(block_a.state, WorkBlockState::Idle);
        assert_eq!(block_a.duration(), Duration::minutes(9));

        let block_b = table.get(&b.block_id).unwrap();
        assert_eq!(block_b.start_time, ts(10));
        assert_eq!(block_b.activity_count, 1);
        assert!(block_a.end_time.unwrap() < block_b.start_time);
    }

    #[test]
    fn test_gap_exactly_idle_timeout_continues() {
        let mut table = WorkBlockTable::default();
        let a = hit(&mut table, "P", 0);
        let b = hit(&mut table, "P", 5);
        assert_eq!(a.block_id, b.block_id);
        assert!(!b.created);
    }

    #[test]
    fn test_projects_get_separate_blocks() {
        let mut table = WorkBlockTable::default();
        let a = hit(&mut table, "api", 0);
        let b = hit(&mut table, "web", 1);
        assert_ne!(a.block_id, b.block_id);
        assert_eq!(table.active_count(), 2);
    }

    #[test]
    fn test_same_name_on_different_paths_gets_separate_blocks() {
        let config = WindowConfig::default();
        let mut table = WorkBlockTable::default();
        let a = table.resolve_work_block(&session(), "api", "/work/client-a/api", ts(0), &config);
        let b = table.resolve_work_block(&session(), "api", "/work/client-b/api", ts(1), &config);

        assert_ne!(a.block_id, b.block_id);
        assert_eq!(table.active_count(), 2);
        assert_eq!(table.get(&a.block_id).unwrap().project_path, "/work/client-a/api");
        assert_eq!(table.get(&b.block_id).unwrap().project_path, "/work/client-b/api");

        let again = table.resolve_work_block(&session(), "api", "/work/client-a/api", ts(2), &config);
        assert_eq!(again.block_id, a.block_id);
    }

    #[test]
    fn test_histogram_counts_each_type() {
        let config = WindowConfig::default();
        let mut table = WorkBlockTable::default();
        let res = table.resolve_work_block(&session(), "P", "/p", ts(0), &config);
        let block = table.get_mut(&res.block_id).unwrap();
        block.record_activity(ts(0), &ActivityType::Edit);
        block.record_activity(ts(1), &ActivityType::Edit);
        block.record_activity(ts(2), &ActivityType::Command);

        assert_eq!(block.activity_histogram[&ActivityType::Edit], 2);
        assert_eq!(block.activity_histogram[&ActivityType::Command], 1);
        assert_eq!(block.activity_count, 3);
    }

    #[test]
    fn test_active_duration_uses_last_activity() {
        let mut table = WorkBlockTable::default();
        let a = hit(&mut table, "P", 0);
        hit(&mut table, "P", 3);
        assert_eq!(
            table.get(&a.block_id).unwrap().duration(),
            Duration::minutes(3)
        );
    }

    #[test]
    fn test_close_for_session_caps_at_session_end() {
        let config = WindowConfig::default();
        let mut table = WorkBlockTable::default();
        let a = hit(&mut table, "P", 298);

        let closed = table.close_for_session(&session(), ts(300), &config);
        assert_eq!(closed, vec![a.block_id.clone()]);
        let block = table.get(&a.block_id).unwrap();
        assert_eq!(block.end_time, Some(ts(300)));
        assert_eq!(block.state, WorkBlockState::SessionEnded);
    }

    #[test]
    fn test_close_idle_only_touches_stale_blocks() {
        let config = WindowConfig::default();
        let mut table = WorkBlockTable::default();
        let stale = hit(&mut table, "api", 0);
        let fresh = hit(&mut table, "web", 8);

        let closed = table.close_idle(ts(10), &config);
        assert_eq!(closed, vec![stale.block_id.clone()]);
        assert_eq!(table.get(&stale.block_id).unwrap().end_time, Some(ts(5)));
        assert!(table.get(&fresh.block_id).unwrap().is_active());
    }

    #[test]
    fn test_close_all_clamps_to_now() {
        let config = WindowConfig::default();
        let mut table = WorkBlockTable::default();
        let a = hit(&mut table, "P", 0);
        hit(&mut table, "P", 2);

        table.close_all(ts(3), &config);
        let block = table.get(&a.block_id).unwrap();
        assert_eq!(block.end_time, Some(ts(3)));
        assert_eq!(block.state, WorkBlockState::ClosedByCleanup);
        assert!(block.duration() <= ts(3) - ts(0));
    }

    #[test]
    fn test_evict_closed_keeps_active() {
        let config = WindowConfig::default();
        let mut table = WorkBlockTable::default();
        let a = hit(&mut table, "api", 0);
        let b = hit(&mut table, "web", 9);
        table.close_idle(ts(10), &config);

        assert_eq!(table.evict_closed(), 1);
        assert!(table.get(&a.block_id).is_none());
        assert!(table.get(&b.block_id).is_some());
    }

    #[test]
    fn test_implausible_duration_excluded() {
        let mut table = WorkBlockTable::default();
        let a = hit(&mut table, "P", 0);
        let block = table.get_mut(&a.block_id).unwrap();
        block.end_time = Some(ts(60 * 30));
        assert!(block.plausible_duration().is_none());
        block.end_time = Some(ts(-5));
        assert!(block.plausible_duration().is_none());
        assert_eq!(block.duration(), Duration::zero());
    }
}
