//! Fan-out commands

use std::time::Duration;

use anyhow::Result;

use ft_core::api::ExecutionView;
use ft_core::types::{ExecutionStatus, HostOutcome};

use super::with_confirmation;
use crate::client::EngineClient;
use crate::output::{format_execution, format_host_outputs, print_error, print_success};

/// Delay between status checks while waiting
const STATUS_INTERVAL: Duration = Duration::from_millis(500);

/// Start a command on many hosts
///
/// With `wait`, blocks until every host finished and returns 0 only if
/// every host ran the command with exit status 0.
pub async fn run_command(
    client: &EngineClient,
    hosts: &[String],
    command: &str,
    yes: bool,
    wait: bool,
) -> Result<i32> {
    let execution_id = with_confirmation(yes, move |confirm| {
        client.submit(command, hosts, confirm)
    })
    .await?;

    print_success(&format!(
        "Started execution {} on {} host(s)",
        execution_id,
        hosts.len()
    ));
    if !wait {
        println!("{}", execution_id);
        return Ok(0);
    }

    let view = loop {
        let view = client.execution(execution_id.as_str()).await?;
        if view.status != ExecutionStatus::Running {
            break view;
        }
        tokio::time::sleep(STATUS_INTERVAL).await;
    };

    print!("{}", format_host_outputs(&view));
    println!("{}", format_execution(&view));
    Ok(exit_code(&view))
}

/// Show the state of an execution
pub async fn execution_command(client: &EngineClient, execution_id: &str) -> Result<()> {
    let view = match client.execution(execution_id).await {
        Ok(v) => v,
        Err(e) => {
            print_error(&format!("Failed to get execution {}: {}", execution_id, e));
            return Err(e.into());
        }
    };

    println!("{}", format_execution(&view));
    print!("{}", format_host_outputs(&view));
    Ok(())
}

fn exit_code(view: &ExecutionView) -> i32 {
    let clean = view.status == ExecutionStatus::Completed
        && view
            .results
            .iter()
            .all(|r| r.outcome == HostOutcome::Success && r.exit_code == Some(0));
    if clean {
        0
    } else {
        1
    }
}
