//! Output formatting utilities for the CLI
//!
//! Tables for sessions and fan-out results, plus colored status messages.

use tabled::{
    settings::{Style, Width},
    Table, Tabled,
};

use ft_core::api::{ExecutionView, HealthResponse, SessionDescriptor};
use ft_core::time::elapsed_millis;
use ft_core::types::{HostOutcome, HostResult};

/// Format a list of sessions as an ASCII table
pub fn format_sessions(sessions: &[SessionDescriptor]) -> String {
    if sessions.is_empty() {
        return "No open sessions".to_string();
    }

    #[derive(Tabled)]
    struct SessionRow {
        #[tabled(rename = "SESSION ID")]
        id: String,
        #[tabled(rename = "HOST")]
        host: String,
        #[tabled(rename = "DIRECTORY")]
        directory: String,
        #[tabled(rename = "STATE")]
        state: &'static str,
        #[tabled(rename = "OPENED")]
        opened: String,
    }

    let rows: Vec<SessionRow> = sessions
        .iter()
        .map(|s| SessionRow {
            id: truncate(s.session_id.as_str(), 12),
            host: s.host_id.to_string(),
            directory: s.current_dir.clone(),
            state: if s.running { "running" } else { "idle" },
            opened: format!("{} ago", format_duration(elapsed_millis(s.created_at) / 1000)),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format a fan-out execution: a summary line and one row per host
pub fn format_execution(view: &ExecutionView) -> String {
    let mut output = format!(
        "Execution {} ({}): {}\n",
        view.execution_id, view.status, view.command
    );
    let pending = view.host_ids.len().saturating_sub(view.results.len());
    if pending > 0 {
        output.push_str(&format!("{} host(s) still running\n", pending));
    }

    if view.results.is_empty() {
        return output;
    }

    #[derive(Tabled)]
    struct ResultRow {
        #[tabled(rename = "HOST")]
        host: String,
        #[tabled(rename = "OUTCOME")]
        outcome: &'static str,
        #[tabled(rename = "EXIT")]
        exit: String,
        #[tabled(rename = "DETAIL")]
        detail: String,
    }

    let rows: Vec<ResultRow> = view
        .results
        .iter()
        .map(|r| ResultRow {
            host: r.host_id.to_string(),
            outcome: outcome_label(r),
            exit: r
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string()),
            detail: detail(r),
        })
        .collect();

    output.push_str(
        &Table::new(rows)
            .with(Style::rounded())
            .with(Width::wrap(100))
            .to_string(),
    );
    output
}

/// Format per-host output blocks of a finished execution
pub fn format_host_outputs(view: &ExecutionView) -> String {
    let mut output = String::new();
    for result in &view.results {
        if result.stdout.is_empty() && result.stderr.is_empty() {
            continue;
        }
        output.push_str(&format!("--- {} ---\n", result.host_id));
        output.push_str(&result.stdout);
        if !result.stdout.is_empty() && !result.stdout.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&result.stderr);
        if !result.stderr.is_empty() && !result.stderr.ends_with('\n') {
            output.push('\n');
        }
    }
    output
}

/// Format engine health as a human-readable string
pub fn format_health(server: &str, health: &HealthResponse) -> String {
    format!(
        "Engine: {} ({})\nVersion: {}\nSessions: {}\nConnections: {}\n",
        server, health.status, health.version, health.sessions, health.connections
    )
}

fn outcome_label(result: &HostResult) -> &'static str {
    match result.outcome {
        HostOutcome::Success if result.exit_code == Some(0) => "ok",
        HostOutcome::Success => "exited",
        HostOutcome::Failed => "failed",
    }
}

fn detail(result: &HostResult) -> String {
    match &result.error {
        Some(error) => error.clone(),
        None => {
            let first = result
                .stdout
                .lines()
                .chain(result.stderr.lines())
                .next()
                .unwrap_or("");
            truncate(first, 60)
        }
    }
}

/// Format duration in human-readable form
fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

/// Truncate a string with ellipsis if too long
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
