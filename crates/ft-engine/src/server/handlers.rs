//! HTTP handlers of the polling API

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};

use ft_core::api::{
    Ack, CompletionRequest, CompletionResponse, CreateSessionRequest, ExecuteRequest,
    ExecuteResponse, ExecutionView, FanoutAccepted, FanoutRequest, HealthResponse, PollQuery,
    PollResponse, SessionDescriptor, SessionList,
};
use ft_core::types::Operator;
use ft_core::{ExecutionId, SessionId};

use super::error::ApiError;
use crate::state::EngineState;

type ApiResult<T> = Result<T, ApiError>;

pub async fn health(State(state): State<Arc<EngineState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: state.registry.len(),
        connections: state.pool.len(),
    })
}

pub async fn list_sessions(
    State(state): State<Arc<EngineState>>,
    Extension(caller): Extension<Operator>,
) -> Json<SessionList> {
    Json(SessionList {
        sessions: state.registry.list(&caller).await,
    })
}

pub async fn create_session(
    State(state): State<Arc<EngineState>>,
    Extension(caller): Extension<Operator>,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<Json<SessionDescriptor>> {
    let session = state.registry.create(&caller, &request.host_id).await?;
    Ok(Json(session.descriptor().await))
}

pub async fn execute(
    State(state): State<Arc<EngineState>>,
    Extension(caller): Extension<Operator>,
    Path(id): Path<SessionId>,
    Json(request): Json<ExecuteRequest>,
) -> ApiResult<Json<ExecuteResponse>> {
    let response = if request.wait {
        state
            .registry
            .execute(&id, &caller, &request.command, request.confirm)
            .await?
    } else {
        state
            .registry
            .submit(&id, &caller, &request.command, request.confirm)
            .await?
    };
    Ok(Json(response))
}

pub async fn poll(
    State(state): State<Arc<EngineState>>,
    Extension(caller): Extension<Operator>,
    Path(id): Path<SessionId>,
    Query(query): Query<PollQuery>,
) -> ApiResult<Json<PollResponse>> {
    let response = state.registry.poll(&id, &caller, query.since).await?;
    Ok(Json(response))
}

pub async fn completions(
    State(state): State<Arc<EngineState>>,
    Extension(caller): Extension<Operator>,
    Path(id): Path<SessionId>,
    Json(request): Json<CompletionRequest>,
) -> ApiResult<Json<CompletionResponse>> {
    let suggestions = state
        .registry
        .completions(&id, &caller, &request.partial, request.cwd.as_deref())
        .await?;
    Ok(Json(CompletionResponse { suggestions }))
}

pub async fn interrupt(
    State(state): State<Arc<EngineState>>,
    Extension(caller): Extension<Operator>,
    Path(id): Path<SessionId>,
) -> ApiResult<Json<Ack>> {
    state.registry.interrupt(&id, &caller).await?;
    Ok(Json(Ack::OK))
}

/// Always acknowledges, even for unknown sessions
pub async fn close_session(
    State(state): State<Arc<EngineState>>,
    Extension(caller): Extension<Operator>,
    Path(id): Path<SessionId>,
) -> Json<Ack> {
    state.registry.close(&id, &caller);
    Json(Ack::OK)
}

pub async fn submit_execution(
    State(state): State<Arc<EngineState>>,
    Extension(caller): Extension<Operator>,
    Json(request): Json<FanoutRequest>,
) -> ApiResult<(StatusCode, Json<FanoutAccepted>)> {
    let execution_id = state
        .fanout
        .run(&caller, &request.command, &request.host_ids, request.confirm)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(FanoutAccepted { execution_id })))
}

pub async fn execution_status(
    State(state): State<Arc<EngineState>>,
    Extension(caller): Extension<Operator>,
    Path(id): Path<ExecutionId>,
) -> ApiResult<Json<ExecutionView>> {
    let view = state.fanout.status(&id, &caller).await?;
    Ok(Json(view))
}
