//! Line-oriented interactive shell over the polling API
//!
//! Each line is submitted without waiting; output is then polled until
//! the session goes idle. Ctrl-C while a command runs sends an interrupt.

use std::io::Write;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use ft_core::types::StreamKind;

use crate::client::EngineClient;
use crate::output::{print_error, print_info, print_success, print_warning};

/// Delay between polls while a command runs
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Lines that end the loop
const QUIT: &[&str] = &[":q", ":quit"];

/// Prefix asking for completions instead of running a command
const COMPLETE_PREFIX: &str = ":complete ";

/// Open a session on `host` and run an interactive loop on it
pub async fn shell_command(client: &EngineClient, host: &str) -> Result<()> {
    let session = match client.create_session(host).await {
        Ok(s) => s,
        Err(e) => {
            print_error(&format!("Failed to open a session on '{}': {}", host, e));
            return Err(e.into());
        }
    };
    let id = session.session_id.to_string();
    print_success(&format!("Connected to {} (session {})", host, id));
    print_info("Type :q to close the session, :complete <text> for suggestions");

    let mut cwd = session.current_dir;
    // Start after whatever a joined session already buffered
    let mut cursor = client.poll(&id, Some(0)).await?.timestamp;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        prompt(&format!("{}:{}$ ", host, cwd))?;
        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        let command = line.trim();
        if command.is_empty() {
            continue;
        }
        if QUIT.contains(&command) {
            break;
        }
        if let Some(partial) = command.strip_prefix(COMPLETE_PREFIX) {
            match client.completions(&id, partial).await {
                Ok(suggestions) if suggestions.is_empty() => print_info("No suggestions"),
                Ok(suggestions) => println!("{}", suggestions.join("  ")),
                Err(e) => print_error(&e.to_string()),
            }
            continue;
        }

        let accepted = match submit(client, &id, command, &mut lines).await {
            Ok(Some(accepted)) => accepted,
            Ok(None) => continue,
            Err(e) => {
                if e.kind() == Some("session_not_found") {
                    print_error("Session expired");
                    return Err(e.into());
                }
                print_error(&e.to_string());
                continue;
            }
        };
        if let Some(warning) = &accepted.warning {
            print_warning(warning);
        }

        let (next_cursor, dir) = follow(client, &id, cursor).await?;
        cursor = next_cursor;
        cwd = dir;
    }

    client.close(&id).await?;
    print_success("Session closed");
    Ok(())
}

/// Submit a command, asking on the same input stream when it needs
/// confirmation; `None` when the operator declined
async fn submit(
    client: &EngineClient,
    id: &str,
    command: &str,
    lines: &mut Lines<BufReader<Stdin>>,
) -> crate::client::ClientResult<Option<ft_core::api::ExecuteResponse>> {
    match client.execute(id, command, false, false).await {
        Err(e) if e.needs_confirmation() => {
            print_warning(&e.to_string());
            // Prompt errors count as a refusal
            let _ = prompt("Run it anyway? [y/N] ");
            let answer = lines.next_line().await.ok().flatten().unwrap_or_default();
            if !answer.trim().eq_ignore_ascii_case("y") {
                print_warning("Skipped");
                return Ok(None);
            }
            client.execute(id, command, true, false).await.map(Some)
        }
        other => other.map(Some),
    }
}

/// Poll until the session is idle, printing output as it arrives
async fn follow(client: &EngineClient, id: &str, mut cursor: u64) -> Result<(u64, String)> {
    loop {
        let polled = client.poll(id, Some(cursor)).await?;
        for line in &polled.lines {
            match line.stream {
                StreamKind::Stdout => print!("{}", line.text),
                StreamKind::Stderr => eprint!("{}", line.text),
                StreamKind::Input => {}
            }
        }
        std::io::stdout().flush()?;
        cursor = polled.timestamp;

        if !polled.running {
            return Ok((cursor, polled.current_dir));
        }

        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = tokio::signal::ctrl_c() => {
                if let Err(e) = client.interrupt(id).await {
                    print_warning(&format!("Interrupt failed: {}", e));
                }
            }
        }
    }
}

fn prompt(text: &str) -> Result<()> {
    print!("{}", text);
    std::io::stdout().flush()?;
    Ok(())
}
