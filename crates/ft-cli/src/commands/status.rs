//! Engine health command

use anyhow::Result;

use crate::client::EngineClient;
use crate::output::{format_health, print_error};

/// Show engine health
pub async fn health_command(client: &EngineClient) -> Result<()> {
    let health = match client.health().await {
        Ok(h) => h,
        Err(e) => {
            print_error(&format!("Failed to reach the engine at {}: {}", client.server(), e));
            print_error("Is the engine running? Try: fanterm-engine --foreground");
            return Err(e.into());
        }
    };

    print!("{}", format_health(client.server(), &health));
    Ok(())
}
