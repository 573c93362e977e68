//! Mapping of engine errors onto HTTP responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use ft_core::api::ErrorBody;
use ft_core::FtError;

/// An engine error returned from a handler
#[derive(Debug)]
pub struct ApiError(pub FtError);

impl From<FtError> for ApiError {
    fn from(e: FtError) -> Self {
        Self(e)
    }
}

impl ApiError {
    /// Status code and machine-readable kind
    pub fn classify(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            FtError::ConnectFailed { .. } => (StatusCode::BAD_GATEWAY, "connect_failed"),
            FtError::HostNotFound(_) => (StatusCode::NOT_FOUND, "host_not_found"),
            FtError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "session_not_found"),
            FtError::ExecutionNotFound(_) => (StatusCode::NOT_FOUND, "execution_not_found"),
            FtError::SessionBusy(_) => (StatusCode::CONFLICT, "session_busy"),
            FtError::CommandBlocked(_) => (StatusCode::FORBIDDEN, "command_blocked"),
            FtError::ConfirmationRequired(_) => {
                (StatusCode::PRECONDITION_REQUIRED, "confirmation_required")
            }
            FtError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            FtError::AccessDenied(_) => (StatusCode::FORBIDDEN, "access_denied"),
            FtError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            FtError::Transport(_) => (StatusCode::BAD_GATEWAY, "transport"),
            FtError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.classify();
        if status.is_server_error() {
            tracing::warn!("Request failed: {}", self.0);
        } else {
            tracing::debug!("Request rejected: {}", self.0);
        }
        let body = ErrorBody {
            error: kind.to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Response for a missing or unknown bearer token
pub fn unauthorized() -> Response {
    let body = ErrorBody {
        error: "unauthorized".to_string(),
        message: "missing or invalid bearer token".to_string(),
    };
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}
