//! The state registry: single owner of live sessions and work blocks.
//!
//! Every mutation goes through one of [`StateRegistry::process_activity_at`],
//! [`StateRegistry::sweep_at`], [`StateRegistry::close_all_at`] or
//! [`StateRegistry::restore_sessions`]. Each returns a [`ChangeSet`] the caller
//! hands to persistence once it has released whatever lock guards the
//! registry. Nothing in here performs I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::activity_type::ActivityType;
use crate::error::EngineError;
use crate::event::ActivityEvent;
use crate::session::{Session, SessionTable};
use crate::types::{SessionId, UserId, WorkBlockId};
use crate::window::WindowConfig;
use crate::work_block::{WorkBlock, WorkBlockTable};

/// Project label used in summaries for sessions with no open block.
pub const UNKNOWN_PROJECT_LABEL: &str = "Unknown Project";

/// Records to persist after a registry mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub sessions: Vec<Session>,
    pub work_blocks: Vec<WorkBlock>,
    /// One entry per histogram increment.
    pub counters: Vec<(WorkBlockId, ActivityType)>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty() && self.work_blocks.is_empty() && self.counters.is_empty()
    }

    fn push_session(&mut self, session: Option<&Session>) {
        if let Some(session) = session {
            self.sessions.retain(|s| s.id != session.id);
            self.sessions.push(session.clone());
        }
    }

    fn push_block(&mut self, block: Option<&WorkBlock>) {
        if let Some(block) = block {
            self.work_blocks.retain(|b| b.id != block.id);
            self.work_blocks.push(block.clone());
        }
    }

    /// Fold a later change set into this one.
    ///
    /// Rows from `later` replace rows with the same id. Counter increments
    /// accumulate.
    pub fn merge(&mut self, later: Self) {
        for session in &later.sessions {
            self.push_session(Some(session));
        }
        for block in &later.work_blocks {
            self.push_block(Some(block));
        }
        self.counters.extend(later.counters);
    }
}

/// Result of folding one event into the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityOutcome {
    pub session_id: SessionId,
    pub work_block_id: WorkBlockId,
    /// Timestamp actually applied, after clamping.
    pub applied_at: DateTime<Utc>,
    pub changes: ChangeSet,
}

/// Counts returned by the bulk close.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseAllSummary {
    pub sessions_closed: usize,
    pub work_blocks_closed: usize,
}

/// One row of the pending-sessions summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSession {
    pub id: SessionId,
    pub user_id: UserId,
    pub start_time: DateTime<Utc>,
    pub session_end: DateTime<Utc>,
    pub project_name: String,
    pub project_path: String,
    pub active_work_blocks: usize,
    pub last_activity: DateTime<Utc>,
    pub activity_count: u64,
}

/// In-memory table of sessions and work blocks.
#[derive(Debug, Default)]
pub struct StateRegistry {
    config: WindowConfig,
    sessions: SessionTable,
    blocks: WorkBlockTable,
}

impl StateRegistry {
    pub fn new(config: WindowConfig) -> Self {
        Self {
            config,
            sessions: SessionTable::default(),
            blocks: WorkBlockTable::default(),
        }
    }

    pub const fn config(&self) -> &WindowConfig {
        &self.config
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.active_count()
    }

    pub fn active_work_block_count(&self) -> usize {
        self.blocks.active_count()
    }

    pub fn session(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn work_block(&self, id: &WorkBlockId) -> Option<&WorkBlock> {
        self.blocks.get(id)
    }

    /// Active blocks of `session_id` currently held in memory.
    pub fn active_work_blocks(&self, session_id: &SessionId) -> Vec<WorkBlock> {
        let mut blocks: Vec<WorkBlock> = self
            .blocks
            .active_for_session(session_id)
            .cloned()
            .collect();
        blocks.sort_by_key(|b| b.start_time);
        blocks
    }

    /// Fold one normalized event into session and work-block state.
    ///
    /// `now` is the receive time, used only to validate the event timestamp.
    pub fn process_activity_at(
        &mut self,
        event: &ActivityEvent,
        now: DateTime<Utc>,
    ) -> Result<ActivityOutcome, EngineError> {
        self.config.validate_timestamp(event.timestamp, now)?;
        let timestamp = self.sessions.clamp(&event.user_id, event.timestamp);

        let mut changes = ChangeSet::default();

        let resolution = self
            .sessions
            .resolve_session(&event.user_id, timestamp, &self.config);
        if let Some(expired) = &resolution.expired {
            self.end_session_blocks(expired, &mut changes);
            changes.push_session(self.sessions.get(expired));
        }

        let block_res = self.blocks.resolve_work_block(
            &resolution.session_id,
            &event.project_name,
            &event.project_path,
            timestamp,
            &self.config,
        );
        if let Some(closed) = &block_res.closed {
            changes.push_block(self.blocks.get(closed));
        }

        if let Some(session) = self.sessions.get_mut(&resolution.session_id) {
            session.record_activity(timestamp);
        }
        if let Some(block) = self.blocks.get_mut(&block_res.block_id) {
            block.record_activity(timestamp, &event.activity_type);
        }

        changes.push_session(self.sessions.get(&resolution.session_id));
        changes.push_block(self.blocks.get(&block_res.block_id));
        changes
            .counters
            .push((block_res.block_id.clone(), event.activity_type.clone()));

        Ok(ActivityOutcome {
            session_id: resolution.session_id,
            work_block_id: block_res.block_id,
            applied_at: timestamp,
            changes,
        })
    }

    fn end_session_blocks(&mut self, session_id: &SessionId, changes: &mut ChangeSet) -> usize {
        let Some(window_end) = self
            .sessions
            .get(session_id)
            .map(|s| self.config.session_end(s.start_time))
        else {
            return 0;
        };
        let closed = self
            .blocks
            .close_for_session(session_id, window_end, &self.config);
        for id in &closed {
            changes.push_block(self.blocks.get(id));
        }
        closed.len()
    }

    /// Close sessions whose window has elapsed and blocks that went idle, as
    /// of `now`, then drop closed state from memory.
    pub fn sweep_at(&mut self, now: DateTime<Utc>) -> ChangeSet {
        let mut changes = ChangeSet::default();

        for session_id in self.sessions.expire_elapsed(now, &self.config) {
            self.end_session_blocks(&session_id, &mut changes);
            changes.push_session(self.sessions.get(&session_id));
        }
        for block_id in self.blocks.close_idle(now, &self.config) {
            changes.push_block(self.blocks.get(&block_id));
        }

        let blocks = self.blocks.evict_closed();
        let sessions = self.sessions.evict_inactive();
        tracing::debug!(
            closed_sessions = changes.sessions.len(),
            closed_blocks = changes.work_blocks.len(),
            evicted_sessions = sessions,
            evicted_blocks = blocks,
            "cleanup sweep finished"
        );
        changes
    }

    /// Close every active session and work block at `now`.
    ///
    /// Sessions whose window already elapsed are expired first, exactly as
    /// the sweep would. The rest close at `now`, and their blocks end at
    /// `last_activity + idle_timeout` clamped to `now`.
    pub fn close_all_at(&mut self, now: DateTime<Utc>) -> (CloseAllSummary, ChangeSet) {
        let mut changes = ChangeSet::default();
        let mut summary = CloseAllSummary::default();

        for session_id in self.sessions.expire_elapsed(now, &self.config) {
            summary.work_blocks_closed += self.end_session_blocks(&session_id, &mut changes);
            changes.push_session(self.sessions.get(&session_id));
            summary.sessions_closed += 1;
        }

        let block_ids = self.blocks.close_all(now, &self.config);
        for id in &block_ids {
            changes.push_block(self.blocks.get(id));
        }
        let session_ids = self.sessions.close_all(now, &self.config);
        for id in &session_ids {
            changes.push_session(self.sessions.get(id));
        }
        summary.sessions_closed += session_ids.len();
        summary.work_blocks_closed += block_ids.len();

        self.blocks.evict_closed();
        self.sessions.evict_inactive();

        tracing::info!(
            sessions = summary.sessions_closed,
            work_blocks = summary.work_blocks_closed,
            "closed all active sessions and work blocks"
        );
        (summary, changes)
    }

    /// Adopt sessions loaded from storage at startup.
    ///
    /// Sessions whose window elapsed while the daemon was down are expired
    /// and returned for saving.
    pub fn restore_sessions(&mut self, sessions: Vec<Session>, now: DateTime<Utc>) -> ChangeSet {
        let mut changes = ChangeSet::default();
        let loaded = sessions.len();
        for session in sessions {
            for expired in self.sessions.restore(session, now, &self.config) {
                changes.push_session(self.sessions.get(&expired));
            }
        }
        self.sessions.evict_inactive();
        tracing::info!(
            loaded,
            expired = changes.sessions.len(),
            active = self.sessions.active_count(),
            "restored sessions from storage"
        );
        changes
    }

    /// Everything currently in memory, for the shutdown flush.
    pub fn snapshot(&self) -> ChangeSet {
        ChangeSet {
            sessions: self.sessions.all().cloned().collect(),
            work_blocks: self.blocks.all().cloned().collect(),
            counters: Vec::new(),
        }
    }

    /// Active sessions, oldest first.
    pub fn active_sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.active().cloned().collect();
        sessions.sort_by_key(|s| s.start_time);
        sessions
    }

    /// Active sessions with the project they are currently attributed to.
    pub fn pending_sessions_summary(&self) -> Vec<PendingSession> {
        self.active_sessions()
            .into_iter()
            .map(|session| {
                let mut blocks: Vec<&WorkBlock> =
                    self.blocks.active_for_session(&session.id).collect();
                blocks.sort_by_key(|b| std::cmp::Reverse(b.last_activity_time));

                let (project_name, project_path) = match blocks.first() {
                    None => (UNKNOWN_PROJECT_LABEL.to_string(), String::new()),
                    Some(latest) if blocks.len() == 1 => {
                        (latest.project_name.clone(), latest.project_path.clone())
                    }
                    Some(latest) => (
                        format!("{} (+{} others)", latest.project_name, blocks.len() - 1),
                        latest.project_path.clone(),
                    ),
                };

                PendingSession {
                    session_end: self.config.session_end(session.start_time),
                    id: session.id,
                    user_id: session.user_id,
                    start_time: session.start_time,
                    project_name,
                    project_path,
                    active_work_blocks: blocks.len(),
                    last_activity: session.last_activity_time,
                    activity_count: session.activity_count,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity_type::ActivitySource;
    use crate::session::SessionState;
    use crate::types::EventId;
    use crate::work_block::WorkBlockState;
    use chrono::{Duration, TimeZone};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap()
    }

    fn ts(minutes: i64) -> DateTime<Utc> {
        base() + Duration::minutes(minutes)
    }

    fn event(project: &str, minute: i64) -> ActivityEvent {
        event_of(project, minute, ActivityType::Edit)
    }

    fn event_of(project: &str, minute: i64, activity_type: ActivityType) -> ActivityEvent {
        ActivityEvent {
            id: EventId::generate(),
            user_id: UserId::new("default_user").unwrap(),
            project_name: project.to_string(),
            project_path: format!("/home/dev/{project}"),
            activity_type,
            activity_source: ActivitySource::Hook,
            timestamp: ts(minute),
            command: None,
            description: None,
        }
    }

    fn apply(registry: &mut StateRegistry, ev: &ActivityEvent) -> ActivityOutcome {
        registry.process_activity_at(ev, ev.timestamp).unwrap()
    }

    #[test]
    fn test_idle_split_scenario() {
        let mut registry = StateRegistry::new(WindowConfig::default());

        let first = apply(&mut registry, &event("P", 0));
        apply(&mut registry, &event("P", 2));
        apply(&mut registry, &event("P", 4));
        let last = apply(&mut registry, &event("P", 10));

        assert_eq!(first.session_id, last.session_id);
        assert_ne!(first.work_block_id, last.work_block_id);

        let closed = last
            .changes
            .work_blocks
            .iter()
            .find(|b| b.id == first.work_block_id)
            .expect("closed block is part of the change set");
        assert_eq!(closed.start_time, ts(0));
        assert_eq!(closed.activity_count, 3);
        assert_eq!(closed.end_time, Some(ts(9)));
        assert_eq!(closed.state, WorkBlockState::Idle);

        let fresh = registry.work_block(&last.work_block_id).unwrap();
        assert_eq!(fresh.start_time, ts(10));
        assert_eq!(fresh.activity_count, 1);

        assert_eq!(registry.session(&first.session_id).unwrap().activity_count, 4);
    }

    #[test]
    fn test_session_split_scenario() {
        let mut registry = StateRegistry::new(WindowConfig::default());
        let a = apply(&mut registry, &event("P", 0));
        let b = apply(&mut registry, &event("P", 330));

        assert_ne!(a.session_id, b.session_id);
        let expired = b
            .changes
            .sessions
            .iter()
            .find(|s| s.id == a.session_id)
            .unwrap();
        assert_eq!(expired.state, SessionState::Expired);
        assert_eq!(expired.end_time, Some(ts(300)));

        // the old session's block ended with it, capped at the window end
        let ended = b
            .changes
            .work_blocks
            .iter()
            .find(|blk| blk.id == a.work_block_id)
            .unwrap();
        assert_eq!(ended.state, WorkBlockState::SessionEnded);
        assert_eq!(ended.end_time, Some(ts(5)));
        assert_eq!(registry.active_session_count(), 1);
    }

    #[test]
    fn test_counters_monotonic_and_change_set_complete() {
        let mut registry = StateRegistry::new(WindowConfig::default());
        let mut previous = 0;
        for minute in 0..20 {
            let outcome = apply(&mut registry, &event("P", minute));
            let session = registry.session(&outcome.session_id).unwrap();
            assert!(session.activity_count > previous);
            previous = session.activity_count;
            assert_eq!(outcome.changes.counters.len(), 1);
        }
    }

    #[test]
    fn test_out_of_order_event_is_clamped() {
        let mut registry = StateRegistry::new(WindowConfig::default());
        apply(&mut registry, &event("P", 10));
        let late = event("P", 8);
        let outcome = registry.process_activity_at(&late, ts(10)).unwrap();
        assert_eq!(outcome.applied_at, ts(10));
    }

    #[test]
    fn test_skewed_clock_cannot_reopen_expired_session() {
        let mut registry = StateRegistry::new(WindowConfig::default());
        let a = apply(&mut registry, &event("P", 0));
        let b = apply(&mut registry, &event("P", 310));
        assert_ne!(a.session_id, b.session_id);

        // stamped inside the first window, but it arrives after the split
        let late = event("P", 100);
        let outcome = registry.process_activity_at(&late, ts(311)).unwrap();
        assert_eq!(outcome.session_id, b.session_id);
        assert_eq!(outcome.applied_at, ts(310));
        assert_eq!(
            registry.session(&a.session_id).map(|s| s.state),
            Some(SessionState::Expired)
        );
    }

    #[test]
    fn test_future_timestamp_rejected_without_state_change() {
        let mut registry = StateRegistry::new(WindowConfig::default());
        let ev = event("P", 60);
        let err = registry.process_activity_at(&ev, ts(0)).unwrap_err();
        assert!(matches!(err, EngineError::TimestampInFuture { .. }));
        assert_eq!(registry.active_session_count(), 0);
    }

    #[test]
    fn test_sweep_closes_idle_and_expired() {
        let mut registry = StateRegistry::new(WindowConfig::default());
        let a = apply(&mut registry, &event("api", 0));
        apply(&mut registry, &event("web", 8));

        let changes = registry.sweep_at(ts(10));
        assert_eq!(changes.work_blocks.len(), 1);
        assert_eq!(changes.work_blocks[0].id, a.work_block_id);
        assert_eq!(changes.work_blocks[0].end_time, Some(ts(5)));
        assert!(registry.work_block(&a.work_block_id).is_none());
        assert_eq!(registry.active_work_block_count(), 1);

        let changes = registry.sweep_at(ts(301));
        assert_eq!(changes.sessions.len(), 1);
        assert_eq!(changes.sessions[0].state, SessionState::Expired);
        assert_eq!(registry.active_session_count(), 0);
        assert_eq!(registry.active_work_block_count(), 0);
    }

    #[test]
    fn test_close_all_uses_idle_formula() {
        let mut registry = StateRegistry::new(WindowConfig::default());
        apply(&mut registry, &event("P", 0));
        apply(&mut registry, &event("P", 2));
        apply(&mut registry, &event("P", 20));

        let (summary, changes) = registry.close_all_at(ts(60));
        assert_eq!(summary.sessions_closed, 1);
        assert_eq!(summary.work_blocks_closed, 1);

        let block = &changes.work_blocks[0];
        assert_eq!(block.end_time, Some(ts(25)));
        assert_eq!(block.state, WorkBlockState::ClosedByCleanup);
        assert_eq!(changes.sessions[0].state, SessionState::ClosedByCleanup);
        assert_eq!(registry.active_session_count(), 0);
    }

    #[test]
    fn test_close_all_durations_bounded_by_wall_clock() {
        let mut registry = StateRegistry::new(WindowConfig::default());
        let mut closed = Vec::new();
        for minute in [0, 3, 12, 14, 30] {
            let outcome = apply(&mut registry, &event("P", minute));
            closed.extend(outcome.changes.work_blocks.into_iter().filter(|b| !b.is_active()));
        }
        let now = ts(31);
        let (_, changes) = registry.close_all_at(now);
        closed.extend(changes.work_blocks);

        let total: Duration = closed.iter().map(WorkBlock::duration).sum();
        assert!(total <= now - ts(0));
    }

    #[test]
    fn test_close_all_after_window_elapsed_caps_at_window_end() {
        let mut registry = StateRegistry::new(WindowConfig::default());
        let first = apply(&mut registry, &event("P", 0));
        apply(&mut registry, &event("P", 298));

        // The sweep has not run yet, so the session is still held as active.
        assert_eq!(registry.active_session_count(), 1);
        let (summary, changes) = registry.close_all_at(ts(302));
        assert_eq!(summary.sessions_closed, 1);
        assert_eq!(summary.work_blocks_closed, 1);

        let session = &changes.sessions[0];
        assert_eq!(session.id, first.session_id);
        assert_eq!(session.end_time, Some(ts(300)));
        assert_eq!(session.state, SessionState::Expired);

        let block = &changes.work_blocks[0];
        assert_eq!(block.end_time, Some(ts(300)));
        assert_eq!(block.state, WorkBlockState::SessionEnded);
        assert_eq!(registry.active_work_block_count(), 0);
    }

    #[test]
    fn test_merge_keeps_latest_rows_and_all_counters() {
        let mut registry = StateRegistry::new(WindowConfig::default());
        let first = apply(&mut registry, &event("P", 0));
        let second = apply(&mut registry, &event("P", 2));
        let split = apply(&mut registry, &event("P", 10));

        let mut backlog = first.changes;
        backlog.merge(second.changes);
        backlog.merge(split.changes);

        assert_eq!(backlog.sessions.len(), 1);
        assert_eq!(backlog.sessions[0].activity_count, 3);
        assert_eq!(backlog.work_blocks.len(), 2);
        let closed = backlog
            .work_blocks
            .iter()
            .find(|b| b.id == first.work_block_id)
            .unwrap();
        assert_eq!(closed.state, WorkBlockState::Idle);
        assert_eq!(closed.activity_count, 2);
        assert_eq!(backlog.counters.len(), 3);
    }

    #[test]
    fn test_restore_expires_stale_and_keeps_live() {
        let mut first = StateRegistry::new(WindowConfig::default());
        let outcome = apply(&mut first, &event("P", 0));
        let saved: Vec<Session> = first.active_sessions();

        let mut restarted = StateRegistry::new(WindowConfig::default());
        let changes = restarted.restore_sessions(saved.clone(), ts(100));
        assert!(changes.is_empty());
        let again = apply(&mut restarted, &event("P", 101));
        assert_eq!(again.session_id, outcome.session_id);

        let mut late = StateRegistry::new(WindowConfig::default());
        let changes = late.restore_sessions(saved, ts(400));
        assert_eq!(changes.sessions.len(), 1);
        assert_eq!(changes.sessions[0].end_time, Some(ts(300)));
        let fresh = apply(&mut late, &event("P", 400));
        assert_ne!(fresh.session_id, outcome.session_id);
    }

    #[test]
    fn test_pending_summary_labels_projects() {
        let mut registry = StateRegistry::new(WindowConfig::default());
        apply(&mut registry, &event("api", 0));
        apply(&mut registry, &event("web", 1));
        apply(&mut registry, &event("cli", 2));

        let pending = registry.pending_sessions_summary();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].project_name, "cli (+2 others)");
        assert_eq!(pending[0].project_path, "/home/dev/cli");
        assert_eq!(pending[0].active_work_blocks, 3);
        assert_eq!(pending[0].session_end, ts(300));
    }

    #[test]
    fn test_histogram_counters_follow_types() {
        let mut registry = StateRegistry::new(WindowConfig::default());
        let a = apply(&mut registry, &event_of("P", 0, ActivityType::Command));
        let b = apply(&mut registry, &event_of("P", 1, ActivityType::Query));
        assert_eq!(
            b.changes.counters,
            vec![(a.work_block_id.clone(), ActivityType::Query)]
        );
        let block = registry.work_block(&a.work_block_id).unwrap();
        assert_eq!(block.activity_histogram.len(), 2);
    }
}
