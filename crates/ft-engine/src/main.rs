//! fanterm engine daemon
//!
//! Serves the polling terminal API and runs the idle sweep.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ft_core::config::{self, EngineConfig};
use ft_engine::terminal::run_idle_sweep;
use ft_engine::EngineState;

#[derive(Parser)]
#[command(name = "fanterm-engine")]
#[command(about = "fanterm session engine daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("fanterm engine starting...");

    let config: EngineConfig = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                EngineConfig::default()
            })
        } else {
            tracing::info!("Using default configuration");
            EngineConfig::default()
        }
    };

    let bind_addr = args.bind.unwrap_or_else(|| config.bind_address.clone());

    if config.hosts.is_empty() {
        tracing::warn!("No hosts configured - sessions cannot be opened");
    }

    let state = Arc::new(EngineState::from_config(config));
    let cancel = CancellationToken::new();

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        cancel_clone.cancel();
    });

    let sweep = tokio::spawn(run_idle_sweep(Arc::clone(&state), cancel.clone()));

    let served = ft_engine::server::serve(Arc::clone(&state), &bind_addr, cancel.clone()).await;

    cancel.cancel();
    if let Err(e) = sweep.await {
        tracing::warn!("Idle sweep task failed: {}", e);
    }
    state.pool.close_all().await;

    served?;
    tracing::info!("Engine shutdown complete");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
