//! Agent lifecycle routes (spec §6): register, heartbeat, status, removal,
//! and the agent-pull `jobs/next` endpoint.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use coordinator_core::entities::{Agent, AgentStatus};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::extract::{AgentKey, OperatorToken};
use crate::state::ApiState;

pub fn router() -> Router<ApiState> {
    Router::new()
        .route("/agents/", post(register).get(list))
        .route("/agents/:id", get(get_agent).delete(remove))
        .route("/agents/:id/heartbeat", post(heartbeat))
        .route("/agents/:id/status", put(set_status))
        .route("/agents/:id/jobs/next", get(next_job))
}

#[derive(Debug, Deserialize)]
struct RegisterAgentRequest {
    name: String,
    ip_address: String,
    port: i32,
    #[serde(default)]
    capabilities: String,
}

async fn register(
    State(state): State<ApiState>,
    AgentKey(key): AgentKey,
    Json(body): Json<RegisterAgentRequest>,
) -> ApiResult<impl IntoResponse> {
    let scope = state.scope();
    let agent = state
        .coordinator
        .registry
        .register_agent(&scope, &key, &body.name, &body.ip_address, body.port, &body.capabilities)
        .await?;
    Ok((StatusCode::CREATED, Json(agent)))
}

/// Applies the liveness override (spec §4.3: a stale agent "is considered
/// `offline` by readers regardless of stored status") before a reader sees
/// it — every external reader, not just the dispatcher's `list_online`.
fn with_effective_status(mut agent: Agent, liveness_window: chrono::Duration) -> Agent {
    agent.status = agent.effective_status(Utc::now(), liveness_window);
    agent
}

async fn list(State(state): State<ApiState>) -> ApiResult<Json<Vec<Agent>>> {
    let scope = state.scope();
    let window = state.coordinator.registry.liveness_window();
    let agents = state.coordinator.registry.list(&scope).await?;
    Ok(Json(agents.into_iter().map(|a| with_effective_status(a, window)).collect()))
}

async fn get_agent(State(state): State<ApiState>, Path(id): Path<Uuid>) -> ApiResult<Json<Agent>> {
    let scope = state.scope();
    let window = state.coordinator.registry.liveness_window();
    let agent = state.coordinator.registry.get(&scope, id).await?;
    Ok(Json(with_effective_status(agent, window)))
}

async fn heartbeat(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    AgentKey(key): AgentKey,
) -> ApiResult<StatusCode> {
    let scope = state.scope();
    state.coordinator.registry.authorize(&scope, &key, id).await?;
    state.coordinator.registry.heartbeat(&scope, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct SetStatusRequest {
    status: AgentStatus,
}

async fn set_status(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    _operator: OperatorToken,
    Json(body): Json<SetStatusRequest>,
) -> ApiResult<Json<Agent>> {
    let scope = state.scope();
    Ok(Json(state.coordinator.registry.set_status(&scope, id, body.status).await?))
}

async fn remove(State(state): State<ApiState>, Path(id): Path<Uuid>, _operator: OperatorToken) -> ApiResult<StatusCode> {
    let scope = state.scope();
    state.coordinator.delete_agent(&scope, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /agents/{id}/jobs/next` (spec §6): 200 with a job body, or 204 when
/// the agent has nothing pending — `not_found` from the core is not an error
/// here, it is the empty case.
async fn next_job(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    AgentKey(key): AgentKey,
) -> ApiResult<axum::response::Response> {
    let scope = state.scope();
    state.coordinator.registry.authorize(&scope, &key, id).await?;
    match state.coordinator.dispatcher.get_next_job_for_agent(&scope, id).await {
        Ok(job) => Ok((StatusCode::OK, Json(job)).into_response()),
        Err(err) if err.code() == "not_found" => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(err) => Err(ApiError::from(err)),
    }
}
