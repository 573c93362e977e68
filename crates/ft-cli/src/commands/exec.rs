//! One-shot command execution and polling

use std::io::Write;

use anyhow::Result;

use super::with_confirmation;
use crate::client::EngineClient;
use crate::output::{print_info, print_warning};

/// Run a command in a session and print its output
///
/// Returns the remote exit code.
pub async fn exec_command(
    client: &EngineClient,
    session: &str,
    command: &str,
    yes: bool,
) -> Result<i32> {
    let response = with_confirmation(yes, move |confirm| {
        client.execute(session, command, confirm, true)
    })
    .await?;

    if let Some(warning) = &response.warning {
        print_warning(warning);
    }
    print!("{}", response.stdout);
    eprint!("{}", response.stderr);
    std::io::stdout().flush()?;

    Ok(response.exit_code.unwrap_or(0))
}

/// Print buffered session output newer than `since`
pub async fn poll_command(client: &EngineClient, session: &str, since: Option<u64>) -> Result<()> {
    let polled = client.poll(session, since).await?;

    print!("{}", polled.stdout);
    eprint!("{}", polled.stderr);
    std::io::stdout().flush()?;

    print_info(&format!(
        "{} in {}, next cursor {}",
        if polled.running { "running" } else { "idle" },
        polled.current_dir,
        polled.timestamp
    ));
    Ok(())
}
