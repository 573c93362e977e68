//! HTTP polling server
//!
//! Plain request/response endpoints only: clients poll for output instead
//! of holding a stream open, so the API survives proxies that cut
//! long-lived connections.

mod auth;
mod error;
mod handlers;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::state::EngineState;

pub use error::ApiError;

/// Build the API router
pub fn router(state: Arc<EngineState>) -> Router {
    let protected = Router::new()
        .route(
            "/sessions",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route("/sessions/:id", delete(handlers::close_session))
        .route("/sessions/:id/execute", post(handlers::execute))
        .route("/sessions/:id/poll", get(handlers::poll))
        .route("/sessions/:id/completions", post(handlers::completions))
        .route("/sessions/:id/interrupt", post(handlers::interrupt))
        .route("/executions", post(handlers::submit_execution))
        .route("/executions/:id", get(handlers::execution_status))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_operator,
        ));

    let api = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected);

    Router::new().nest("/api", api).with_state(state)
}

/// Serve the API until `cancel` fires
pub async fn serve(state: Arc<EngineState>, bind_addr: &str, cancel: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!("HTTP API listening on http://{}", local_addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
            tracing::info!("HTTP API shutting down");
        })
        .await
        .context("HTTP server failed")?;

    Ok(())
}
