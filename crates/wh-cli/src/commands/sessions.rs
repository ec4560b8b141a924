//! Session listings fetched from the daemon.

use std::io::Write;

use anyhow::Result;
use wh_core::{PendingSession, Session, WorkBlock};

use crate::client::DaemonClient;
use crate::commands::report::format_duration;

pub fn render_active<W: Write>(writer: &mut W, sessions: &[Session]) -> Result<()> {
    if sessions.is_empty() {
        writeln!(writer, "No active sessions.")?;
        return Ok(());
    }
    for session in sessions {
        writeln!(
            writer,
            "{}  started {}  last activity {}  {} activities",
            session.id,
            session.start_time.format("%Y-%m-%d %H:%M UTC"),
            session.last_activity_time.format("%H:%M"),
            session.activity_count,
        )?;
    }
    Ok(())
}

pub fn render_pending<W: Write>(writer: &mut W, pending: &[PendingSession]) -> Result<()> {
    if pending.is_empty() {
        writeln!(writer, "No pending sessions.")?;
        return Ok(());
    }
    for session in pending {
        writeln!(
            writer,
            "{}  {}  ends {}  {} open blocks",
            session.id,
            session.project_name,
            session.session_end.format("%Y-%m-%d %H:%M UTC"),
            session.active_work_blocks,
        )?;
    }
    Ok(())
}

pub fn render_blocks<W: Write>(writer: &mut W, blocks: &[WorkBlock]) -> Result<()> {
    if blocks.is_empty() {
        writeln!(writer, "No work blocks.")?;
        return Ok(());
    }
    for block in blocks {
        let end = block
            .end_time
            .map_or_else(|| "now".to_string(), |end| end.format("%H:%M").to_string());
        writeln!(
            writer,
            "{}  {:<20} {}-{}  {:>7}  {:<15} {} activities",
            block.id,
            block.project_name,
            block.start_time.format("%H:%M"),
            end,
            format_duration(block.duration().num_seconds()),
            block.state.as_str(),
            block.activity_count,
        )?;
    }
    Ok(())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn active(client: &DaemonClient, json: bool) -> Result<()> {
    let sessions = client.active_sessions().await?;
    if json {
        return print_json(&sessions);
    }
    render_active(&mut std::io::stdout().lock(), &sessions)
}

pub async fn pending(client: &DaemonClient, json: bool) -> Result<()> {
    let pending = client.pending_sessions().await?;
    if json {
        return print_json(&pending);
    }
    render_pending(&mut std::io::stdout().lock(), &pending)
}

pub async fn blocks(client: &DaemonClient, session_id: &str, json: bool) -> Result<()> {
    let blocks = client.work_blocks(session_id).await?;
    if json {
        return print_json(&blocks);
    }
    render_blocks(&mut std::io::stdout().lock(), &blocks)
}
