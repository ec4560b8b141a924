//! Wire types shared by the daemon's HTTP ingress and the CLI client.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use wh_core::{CloseAllSummary, CorrelatorStats, SessionId, WorkBlockId};

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub active_sessions: usize,
    pub active_work_blocks: usize,
    pub correlator: CorrelatorStats,
}

/// What happened to a submitted activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitStatus {
    Recorded,
    /// Absorbed by the quiescence window of an earlier event.
    Suppressed,
    Filtered,
}

/// Body of a successful `POST /activity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub status: SubmitStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_block_id: Option<WorkBlockId>,
}

/// Body of `POST /sessions/close-all`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseAllResponse {
    /// Closed from live daemon state.
    pub live: CloseAllSummary,
    /// Closed directly in storage, left over from earlier runs.
    pub stored: CloseAllSummary,
}

impl CloseAllResponse {
    pub const fn sessions_closed(&self) -> usize {
        self.live.sessions_closed + self.stored.sessions_closed
    }

    pub const fn work_blocks_closed(&self) -> usize {
        self.live.work_blocks_closed + self.stored.work_blocks_closed
    }
}

/// Error body for every non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// `[start 00:00, end+1 00:00)` in UTC. `None` if `end` precedes `start` or
/// the range runs off the calendar.
pub fn utc_day_range(
    start: NaiveDate,
    end_inclusive: NaiveDate,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    if end_inclusive < start {
        return None;
    }
    let end = end_inclusive.succ_opt()?;
    Some((
        start.and_time(NaiveTime::MIN).and_utc(),
        end.and_time(NaiveTime::MIN).and_utc(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utc_day_range_is_half_open() {
        let day = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let (start, end) = utc_day_range(day, day).unwrap();
        assert_eq!(start.to_rfc3339(), "2025-06-02T00:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2025-06-03T00:00:00+00:00");
    }

    #[test]
    fn test_utc_day_range_rejects_inverted_range() {
        let start = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        assert_eq!(utc_day_range(start, end), None);
    }

    #[test]
    fn test_close_all_response_sums_both_passes() {
        let response = CloseAllResponse {
            live: CloseAllSummary {
                sessions_closed: 1,
                work_blocks_closed: 2,
            },
            stored: CloseAllSummary {
                sessions_closed: 0,
                work_blocks_closed: 1,
            },
        };
        assert_eq!(response.sessions_closed(), 1);
        assert_eq!(response.work_blocks_closed(), 3);
    }
}
