//! Timing rules shared by the session and work-block managers.

use chrono::{DateTime, Datelike, Duration, Utc};

use crate::error::EngineError;

/// Earliest year accepted from any producer clock.
const MIN_PLAUSIBLE_YEAR: i32 = 2000;

/// Window lengths and clock-skew bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    /// Fixed length of a session from its first event.
    pub session_duration: Duration,
    /// Longest gap tolerated inside one work block.
    pub idle_timeout: Duration,
    /// How far ahead of the receive time an event may be stamped.
    pub max_future_skew: Duration,
    /// How far behind the receive time an event may be backfilled.
    pub max_backfill: Duration,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            session_duration: Duration::hours(5),
            idle_timeout: Duration::minutes(5),
            max_future_skew: Duration::minutes(5),
            max_backfill: Duration::hours(24),
        }
    }
}

impl WindowConfig {
    /// Reject timestamps no sane clock could have produced relative to `now`.
    pub fn validate_timestamp(
        &self,
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if timestamp.year() < MIN_PLAUSIBLE_YEAR {
            return Err(EngineError::ImplausibleTimestamp { timestamp });
        }
        if timestamp - now > self.max_future_skew {
            return Err(EngineError::TimestampInFuture { timestamp, now });
        }
        if now - timestamp > self.max_backfill {
            return Err(EngineError::TimestampTooOld { timestamp, now });
        }
        Ok(())
    }

    /// True when `timestamp` still falls inside a session that began at `start`.
    pub fn within_session(&self, start: DateTime<Utc>, timestamp: DateTime<Utc>) -> bool {
        timestamp - start <= self.session_duration
    }

    /// True when `timestamp` continues a block last active at `last_activity`.
    pub fn within_idle(&self, last_activity: DateTime<Utc>, timestamp: DateTime<Utc>) -> bool {
        timestamp - last_activity <= self.idle_timeout
    }

    /// End of the session window that began at `start`.
    pub fn session_end(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        start + self.session_duration
    }

    /// End time recorded when a block goes idle.
    ///
    /// Organically this is `last_activity + idle_timeout`. It is capped at
    /// `cap` (the close time for administrative closes, or the session window
    /// end) but never moves before `last_activity`.
    pub fn idle_close_time(
        &self,
        last_activity: DateTime<Utc>,
        cap: DateTime<Utc>,
    ) -> DateTime<Utc> {
        (last_activity + self.idle_timeout).min(cap.max(last_activity))
    }
}
