//! Bearer-token authentication

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;

use crate::server::error::unauthorized;
use crate::state::EngineState;

/// Resolve the bearer token to an operator and attach it to the request
///
/// Handlers behind this layer read the caller with
/// `Extension<Operator>`.
pub async fn require_operator(
    State(state): State<Arc<EngineState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);

    let Some(token) = token else {
        return unauthorized();
    };

    match state.directory.resolve_operator(token).await {
        Some(operator) => {
            tracing::trace!("Request from operator {}", operator.id);
            request.extensions_mut().insert(operator);
            next.run(request).await
        }
        None => {
            tracing::debug!("Rejected request with unknown token");
            unauthorized()
        }
    }
}
