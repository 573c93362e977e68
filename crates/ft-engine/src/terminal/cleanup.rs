//! Idle sweep task
//!
//! Periodically closes terminal sessions with no activity (no command and
//! no poll) within the idle window, releases pooled connections nothing
//! holds any more, and prunes finished fan-out executions past retention.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::state::EngineState;

/// Run the idle sweep until cancelled
pub async fn run_idle_sweep(state: Arc<EngineState>, cancel: CancellationToken) {
    let timeouts = state.config.timeouts.clone();
    let mut interval = tokio::time::interval(timeouts.sweep_interval);

    tracing::info!(
        "Starting idle sweep (idle window: {:?}, check interval: {:?})",
        timeouts.idle_session,
        timeouts.sweep_interval
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                sweep_once(&state).await;
            }
            _ = cancel.cancelled() => {
                tracing::info!("Idle sweep shutting down");
                break;
            }
        }
    }
}

/// One sweep pass
pub async fn sweep_once(state: &EngineState) {
    let timeouts = &state.config.timeouts;

    let sessions = state.registry.sweep(timeouts.idle_session);
    let connections = state.pool.evict_idle(timeouts.idle_session).await;
    let executions = state.fanout.prune(timeouts.execution_retention);

    if sessions + connections + executions > 0 {
        tracing::info!(
            "Swept {} idle sessions, {} idle connections, {} old executions",
            sessions,
            connections,
            executions
        );
    }
}
