//! Session manager: fixed-length activity windows per user.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{SessionId, UserId, ValidationError};
use crate::window::WindowConfig;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    /// The fixed window elapsed.
    Expired,
    /// Closed by the administrative bulk close.
    ClosedByCleanup,
}

impl SessionState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::ClosedByCleanup => "closed_by_cleanup",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "expired" => Ok(Self::Expired),
            "closed_by_cleanup" => Ok(Self::ClosedByCleanup),
            other => Err(ValidationError::InvalidState {
                entity: "session",
                value: other.to_string(),
            }),
        }
    }
}

/// A fixed-length window of one user's activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_activity_time: DateTime<Utc>,
    pub activity_count: u64,
    pub state: SessionState,
}

impl Session {
    fn open(user_id: UserId, start_time: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::generate(),
            user_id,
            start_time,
            end_time: None,
            last_activity_time: start_time,
            activity_count: 0,
            state: SessionState::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Count one event at `timestamp`. Never moves `last_activity_time` back.
    pub fn record_activity(&mut self, timestamp: DateTime<Utc>) {
        self.activity_count += 1;
        self.last_activity_time = self.last_activity_time.max(timestamp);
    }

    fn close(&mut self, end_time: DateTime<Utc>, state: SessionState) {
        self.end_time = Some(end_time);
        self.state = state;
    }
}

/// Result of resolving the session for an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionResolution {
    pub session_id: SessionId,
    /// The previous session, if this call expired it.
    pub expired: Option<SessionId>,
    pub created: bool,
}

/// Indexed table of sessions.
///
/// Holds every session seen since startup (restored ones included), the
/// active session per user and a per-user high-water mark used to clamp
/// out-of-order timestamps.
#[derive(Debug, Default)]
pub struct SessionTable {
    by_id: HashMap<SessionId, Session>,
    active_by_user: HashMap<UserId, SessionId>,
    high_water: HashMap<UserId, DateTime<Utc>>,
}

impl SessionTable {
    pub fn get(&self, id: &SessionId) -> Option<&Session> {
        self.by_id.get(id)
    }

    pub fn get_mut(&mut self, id: &SessionId) -> Option<&mut Session> {
        self.by_id.get_mut(id)
    }

    pub fn active_for(&self, user_id: &UserId) -> Option<&Session> {
        self.active_by_user
            .get(user_id)
            .and_then(|id| self.by_id.get(id))
    }

    pub fn active(&self) -> impl Iterator<Item = &Session> {
        self.active_by_user
            .values()
            .filter_map(|id| self.by_id.get(id))
    }

    pub fn all(&self) -> impl Iterator<Item = &Session> {
        self.by_id.values()
    }

    pub fn active_count(&self) -> usize {
        self.active_by_user.len()
    }

    /// Clamp `timestamp` forward to the user's high-water mark and advance it.
    ///
    /// Events are linearized by arrival, so a late-stamped event is treated
    /// as happening no earlier than the latest one already seen.
    pub fn clamp(&mut self, user_id: &UserId, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        let mark = self
            .high_water
            .entry(user_id.clone())
            .or_insert(timestamp);
        if timestamp > *mark {
            *mark = timestamp;
        }
        *mark
    }

    /// Return the active session for `user_id` that covers `timestamp`,
    /// expiring the current one and opening a fresh one if needed.
    ///
    /// `timestamp` must already be clamped.
    pub fn resolve_session(
        &mut self,
        user_id: &UserId,
        timestamp: DateTime<Utc>,
        config: &WindowConfig,
    ) -> SessionResolution {
        let mut expired = None;

        if let Some(id) = self.active_by_user.get(user_id).cloned() {
            match self.by_id.get_mut(&id) {
                Some(session) if config.within_session(session.start_time, timestamp) => {
                    return SessionResolution {
                        session_id: id,
                        expired: None,
                        created: false,
                    };
                }
                Some(session) => {
                    session.close(config.session_end(session.start_time), SessionState::Expired);
                    tracing::info!(session_id = %id, "session window elapsed");
                    expired = Some(id);
                }
                None => {}
            }
            self.active_by_user.remove(user_id);
        }

        let session = Session::open(user_id.clone(), timestamp);
        let session_id = session.id.clone();
        tracing::info!(session_id = %session_id, user_id = %user_id, start = %timestamp, "session opened");
        self.active_by_user.insert(user_id.clone(), session_id.clone());
        self.by_id.insert(session_id.clone(), session);

        SessionResolution {
            session_id,
            expired,
            created: true,
        }
    }

    /// Expire every active session whose window has elapsed by `now`.
    pub fn expire_elapsed(&mut self, now: DateTime<Utc>, config: &WindowConfig) -> Vec<SessionId> {
        let elapsed: Vec<(UserId, SessionId)> = self
            .active_by_user
            .iter()
            .filter(|(_, id)| {
                self.by_id
                    .get(*id)
                    .is_some_and(|s| !config.within_session(s.start_time, now))
            })
            .map(|(user, id)| (user.clone(), id.clone()))
            .collect();

        for (user, id) in &elapsed {
            self.active_by_user.remove(user);
            if let Some(session) = self.by_id.get_mut(id) {
                session.close(config.session_end(session.start_time), SessionState::Expired);
            }
        }
        elapsed.into_iter().map(|(_, id)| id).collect()
    }

    /// Close every active session at `now`, never past its window end.
    pub fn close_all(&mut self, now: DateTime<Utc>, config: &WindowConfig) -> Vec<SessionId> {
        let closing: Vec<SessionId> = self.active_by_user.drain().map(|(_, id)| id).collect();
        for id in &closing {
            if let Some(session) = self.by_id.get_mut(id) {
                let end = now
                    .max(session.last_activity_time)
                    .min(config.session_end(session.start_time));
                session.close(end, SessionState::ClosedByCleanup);
            }
        }
        closing
    }

    /// Drop inactive sessions from memory. Storage keeps the history.
    pub fn evict_inactive(&mut self) -> usize {
        let before = self.by_id.len();
        self.by_id.retain(|_, session| session.is_active());
        before - self.by_id.len()
    }

    /// Adopt a session loaded from storage.
    ///
    /// Returns the sessions this expired: the restored one if its window had
    /// already elapsed at `now`, or an older active session it supersedes.
    pub fn restore(
        &mut self,
        mut session: Session,
        now: DateTime<Utc>,
        config: &WindowConfig,
    ) -> Vec<SessionId> {
        let mark = self
            .high_water
            .entry(session.user_id.clone())
            .or_insert(session.last_activity_time);
        if session.last_activity_time > *mark {
            *mark = session.last_activity_time;
        }

        let mut expired = Vec::new();
        if session.is_active() {
            let superseded = self
                .active_for(&session.user_id)
                .is_some_and(|current| current.start_time >= session.start_time);
            if superseded || !config.within_session(session.start_time, now) {
                session.close(config.session_end(session.start_time), SessionState::Expired);
                expired.push(session.id.clone());
            } else {
                if let Some(previous) = self.active_by_user.remove(&session.user_id) {
                    if let Some(old) = self.by_id.get_mut(&previous) {
                        old.close(config.session_end(old.start_time), SessionState::Expired);
                    }
                    expired.push(previous);
                }
                self.active_by_user
                    .insert(session.user_id.clone(), session.id.clone());
            }
        }
        self.by_id.insert(session.id.clone(), session);
        expired
    }
}
