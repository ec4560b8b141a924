//! Status command: daemon health plus the pending-sessions summary.

use std::io::Write;

use anyhow::Result;
use wh_core::PendingSession;

use crate::api::HealthReport;
use crate::client::DaemonClient;
use crate::commands::report::format_duration;

pub fn render<W: Write>(
    writer: &mut W,
    health: &HealthReport,
    pending: &[PendingSession],
) -> Result<()> {
    let uptime = i64::try_from(health.uptime_secs).unwrap_or(i64::MAX);
    writeln!(writer, "Work-hour tracker status")?;
    writeln!(
        writer,
        "Daemon:      {} (v{}, up {})",
        health.status,
        health.version,
        format_duration(uptime)
    )?;
    writeln!(
        writer,
        "Tracking:    {} active sessions, {} open work blocks",
        health.active_sessions, health.active_work_blocks
    )?;
    let stats = &health.correlator;
    writeln!(
        writer,
        "Signals:     {} received, {} emitted, {} filtered, {} suppressed, {} malformed",
        stats.received, stats.emitted, stats.filtered, stats.suppressed, stats.malformed
    )?;

    if pending.is_empty() {
        writeln!(writer, "No active sessions.")?;
        return Ok(());
    }

    writeln!(writer)?;
    writeln!(writer, "Pending sessions:")?;
    for session in pending {
        writeln!(
            writer,
            "- {}  {}  {}-{} UTC, {} activities, last at {}",
            session.id,
            session.project_name,
            session.start_time.format("%Y-%m-%d %H:%M"),
            session.session_end.format("%H:%M"),
            session.activity_count,
            session.last_activity.format("%H:%M"),
        )?;
    }
    Ok(())
}

pub async fn run(client: &DaemonClient) -> Result<()> {
    let health = client.health().await?;
    let pending = client.pending_sessions().await?;
    let mut stdout = std::io::stdout().lock();
    render(&mut stdout, &health, &pending)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use insta::assert_snapshot;
    use wh_core::{CorrelatorStats, SessionId, UserId};

    use super::*;

    fn health(active_sessions: usize, active_work_blocks: usize) -> HealthReport {
        HealthReport {
            status: "ok".to_string(),
            version: "0.1.0".to_string(),
            uptime_secs: 3_720,
            active_sessions,
            active_work_blocks,
            correlator: CorrelatorStats {
                received: 12,
                emitted: 8,
                filtered: 2,
                suppressed: 2,
                malformed: 0,
            },
        }
    }

    #[test]
    fn status_without_sessions() {
        let mut output = Vec::new();
        render(&mut output, &health(0, 0), &[]).unwrap();
        let output = String::from_utf8(output).unwrap();
        assert_snapshot!(output, @r"
        Work-hour tracker status
        Daemon:      ok (v0.1.0, up 1h 2m)
        Tracking:    0 active sessions, 0 open work blocks
        Signals:     12 received, 8 emitted, 2 filtered, 2 suppressed, 0 malformed
        No active sessions.
        ");
    }

    #[test]
    fn status_lists_pending_sessions() {
        let start = Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap();
        let pending = PendingSession {
            id: SessionId::new("session-1").unwrap(),
            user_id: UserId::new("default_user").unwrap(),
            start_time: start,
            session_end: Utc.with_ymd_and_hms(2025, 6, 2, 14, 0, 0).unwrap(),
            project_name: "api (+1 others)".to_string(),
            project_path: "/src/api".to_string(),
            active_work_blocks: 2,
            last_activity: Utc.with_ymd_and_hms(2025, 6, 2, 10, 42, 0).unwrap(),
            activity_count: 17,
        };

        let mut output = Vec::new();
        render(&mut output, &health(1, 2), &[pending]).unwrap();
        let output = String::from_utf8(output).unwrap();
        assert_snapshot!(output, @r"
        Work-hour tracker status
        Daemon:      ok (v0.1.0, up 1h 2m)
        Tracking:    1 active sessions, 2 open work blocks
        Signals:     12 received, 8 emitted, 2 filtered, 2 suppressed, 0 malformed

        Pending sessions:
        - session-1  api (+1 others)  2025-06-02 09:00-14:00 UTC, 17 activities, last at 10:42
        ");
    }
}
