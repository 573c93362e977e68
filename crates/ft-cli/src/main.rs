//! fanterm CLI
//!
//! Operator client for the fanterm engine:
//! - Terminal sessions (open, exec, poll, interactive shell, close)
//! - Fan-out runs across many hosts and their status

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ft_cli::client::{EngineClient, DEFAULT_SERVER};
use ft_cli::commands;

#[derive(Parser)]
#[command(name = "fanterm")]
#[command(author, version, about = "Remote terminal sessions and multi-host command fan-out")]
#[command(propagate_version = true)]
struct Cli {
    /// Engine address
    #[arg(long, global = true, env = "FANTERM_SERVER", default_value = DEFAULT_SERVER)]
    server: String,

    /// Bearer token of the operator
    #[arg(long, global = true, env = "FANTERM_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List open sessions
    Sessions,

    /// Open (or join) the session for a host and print its id
    Open {
        /// Host identifier
        host: String,
    },

    /// Run a command in a session and wait for its output
    Exec {
        /// Session ID
        session: String,
        /// Command to run
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
        /// Confirm dangerous commands without asking
        #[arg(short, long)]
        yes: bool,
    },

    /// Print buffered session output
    Poll {
        /// Session ID
        session: String,
        /// Only output newer than this cursor
        #[arg(long)]
        since: Option<u64>,
    },

    /// Close a session
    Close {
        /// Session ID
        session: String,
    },

    /// Interactive shell on a host
    Shell {
        /// Host identifier
        host: String,
    },

    /// Run a command on many hosts
    Run {
        /// Comma-separated host identifiers
        #[arg(long, required = true, value_delimiter = ',')]
        hosts: Vec<String>,
        /// Command to run
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
        /// Confirm dangerous commands without asking
        #[arg(short, long)]
        yes: bool,
        /// Wait for every host and print the results
        #[arg(short, long)]
        wait: bool,
    },

    /// Show the state of a fan-out execution
    Status {
        /// Execution ID
        execution: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let client = EngineClient::new(&cli.server, cli.token)?;

    // Without a command, show engine health
    let Some(command) = cli.command else {
        return commands::health_command(&client).await;
    };

    let exit_code = match command {
        Commands::Sessions => {
            commands::sessions_command(&client).await?;
            0
        }
        Commands::Open { host } => {
            commands::open_command(&client, &host).await?;
            0
        }
        Commands::Exec {
            session,
            command,
            yes,
        } => commands::exec_command(&client, &session, &command.join(" "), yes).await?,
        Commands::Poll { session, since } => {
            commands::poll_command(&client, &session, since).await?;
            0
        }
        Commands::Close { session } => {
            commands::close_command(&client, &session).await?;
            0
        }
        Commands::Shell { host } => {
            commands::shell_command(&client, &host).await?;
            0
        }
        Commands::Run {
            hosts,
            command,
            yes,
            wait,
        } => commands::run_command(&client, &hosts, &command.join(" "), yes, wait).await?,
        Commands::Status { execution } => {
            commands::execution_command(&client, &execution).await?;
            0
        }
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
