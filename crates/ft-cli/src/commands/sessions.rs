//! Session management commands

use anyhow::Result;

use crate::client::EngineClient;
use crate::output::{format_sessions, print_error, print_success};

/// List the caller's open sessions
pub async fn sessions_command(client: &EngineClient) -> Result<()> {
    let sessions = match client.list_sessions().await {
        Ok(s) => s,
        Err(e) => {
            print_error(&format!("Failed to list sessions: {}", e));
            return Err(e.into());
        }
    };

    println!("{}", format_sessions(&sessions));
    Ok(())
}

/// Open (or join) the session for a host and print its id
pub async fn open_command(client: &EngineClient, host: &str) -> Result<()> {
    let session = match client.create_session(host).await {
        Ok(s) => s,
        Err(e) => {
            print_error(&format!("Failed to open a session on '{}': {}", host, e));
            return Err(e.into());
        }
    };

    print_success(&format!(
        "Session on {} in {}",
        session.host_id, session.current_dir
    ));
    println!("{}", session.session_id);
    Ok(())
}

/// Close a session; the engine acknowledges unknown sessions too
pub async fn close_command(client: &EngineClient, session: &str) -> Result<()> {
    client.close(session).await?;
    print_success(&format!("Closed session {}", session));
    Ok(())
}
