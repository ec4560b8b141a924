//! Close-all command.

use std::io::Write;

use anyhow::Result;

use crate::api::CloseAllResponse;
use crate::client::DaemonClient;

pub fn render<W: Write>(writer: &mut W, response: &CloseAllResponse) -> Result<()> {
    writeln!(
        writer,
        "Closed {} sessions and {} work blocks.",
        response.sessions_closed(),
        response.work_blocks_closed()
    )?;
    let stored = response.stored;
    if stored.sessions_closed > 0 || stored.work_blocks_closed > 0 {
        writeln!(
            writer,
            "Includes {} sessions and {} work blocks left open by an earlier run.",
            stored.sessions_closed, stored.work_blocks_closed
        )?;
    }
    Ok(())
}

pub async fn run(client: &DaemonClient, json: bool) -> Result<()> {
    let response = client.close_all().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }
    render(&mut std::io::stdout().lock(), &response)
}
