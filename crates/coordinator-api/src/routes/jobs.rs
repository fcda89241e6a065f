//! Job lifecycle and progress routes (spec §6): creation and listing are
//! operator/read paths; start/progress/complete/fail act on behalf of the
//! assigned agent and carry the `X-Agent-Key` header; pause/resume/stop and
//! the batch dispatch trigger are operator actions.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use coordinator_core::enrich::EnrichedJob;
use coordinator_core::entities::Job;
use coordinator_core::store::NewJob as CoreNewJob;
use coordinator_core::{CoreError, RequestScope};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::extract::{AgentKey, OperatorToken};
use crate::state::ApiState;

pub fn router() -> Router<ApiState> {
    Router::new()
        .route("/jobs/", post(create).get(list))
        .route("/jobs/assign", post(assign))
        .route("/jobs/:id/start", post(start))
        .route("/jobs/:id/progress", put(progress))
        .route("/jobs/:id/complete", post(complete))
        .route("/jobs/:id/fail", post(fail))
        .route("/jobs/:id/pause", post(pause))
        .route("/jobs/:id/resume", post(resume))
        .route("/jobs/:id/stop", post(stop))
}

/// Confirms `key` belongs to the agent currently assigned to `job_id`
/// (spec §6 "Agent authentication header" applied to the job-progress paths,
/// which act on the assignee's behalf rather than naming an agent in the URL).
async fn authorize_assignee(state: &ApiState, scope: &RequestScope, job_id: Uuid, key: &str) -> ApiResult<()> {
    let job = state.coordinator.jobs.get(scope, job_id).await?;
    let agent_id = job.agent_id.ok_or_else(|| CoreError::unauthorized("job_has_no_agent", "job has no assigned agent"))?;
    state.coordinator.registry.authorize(scope, key, agent_id).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct CreateJobRequest {
    name: String,
    hash_type: i32,
    attack_mode: i32,
    hash_file_id: Uuid,
    wordlist_id: Uuid,
    #[serde(default)]
    rules: Option<String>,
    #[serde(default)]
    agent_id: Option<Uuid>,
}

async fn create(State(state): State<ApiState>, _operator: OperatorToken, Json(body): Json<CreateJobRequest>) -> ApiResult<(StatusCode, Json<Job>)> {
    let scope = state.scope();
    let job = state
        .coordinator
        .jobs
        .create_job(
            &scope,
            CoreNewJob {
                name: body.name,
                hash_type: body.hash_type,
                attack_mode: body.attack_mode,
                hash_file_id: body.hash_file_id,
                wordlist_id: body.wordlist_id,
                rules: body.rules,
                agent_id: body.agent_id,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(job)))
}

async fn list(State(state): State<ApiState>) -> ApiResult<Json<Vec<EnrichedJob>>> {
    let scope = state.scope();
    let jobs = state.coordinator.jobs.list(&scope).await?;
    Ok(Json(state.coordinator.enrichment.enrich_jobs(&scope, jobs).await?))
}

#[derive(Debug, Deserialize)]
struct StartJobRequest {
    agent_id: Uuid,
}

async fn start(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    AgentKey(key): AgentKey,
    Json(body): Json<StartJobRequest>,
) -> ApiResult<Json<Job>> {
    let scope = state.scope();
    state.coordinator.registry.authorize(&scope, &key, body.agent_id).await?;
    Ok(Json(state.coordinator.jobs.start_job(&scope, id, body.agent_id).await?))
}

#[derive(Debug, Deserialize)]
struct ProgressRequest {
    progress: i32,
    speed: i64,
    #[serde(default)]
    eta: Option<DateTime<Utc>>,
}

async fn progress(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    AgentKey(key): AgentKey,
    Json(body): Json<ProgressRequest>,
) -> ApiResult<StatusCode> {
    let scope = state.scope();
    authorize_assignee(&state, &scope, id, &key).await?;
    state.coordinator.progress.update_progress(&scope, id, body.progress, body.speed, body.eta).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct CompleteRequest {
    result: String,
    final_speed: i64,
}

async fn complete(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    AgentKey(key): AgentKey,
    Json(body): Json<CompleteRequest>,
) -> ApiResult<StatusCode> {
    let scope = state.scope();
    authorize_assignee(&state, &scope, id, &key).await?;
    state.coordinator.progress.complete_job(&scope, id, body.result, body.final_speed).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct FailRequest {
    reason: String,
}

async fn fail(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    AgentKey(key): AgentKey,
    Json(body): Json<FailRequest>,
) -> ApiResult<StatusCode> {
    let scope = state.scope();
    authorize_assignee(&state, &scope, id, &key).await?;
    state.coordinator.progress.fail_job(&scope, id, body.reason).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn pause(State(state): State<ApiState>, Path(id): Path<Uuid>, _operator: OperatorToken) -> ApiResult<StatusCode> {
    let scope = state.scope();
    state.coordinator.jobs.pause(&scope, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn resume(State(state): State<ApiState>, Path(id): Path<Uuid>, _operator: OperatorToken) -> ApiResult<StatusCode> {
    let scope = state.scope();
    state.coordinator.jobs.resume(&scope, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn stop(State(state): State<ApiState>, Path(id): Path<Uuid>, _operator: OperatorToken) -> ApiResult<StatusCode> {
    let scope = state.scope();
    state.coordinator.jobs.cancel(&scope, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn assign(State(state): State<ApiState>, _operator: OperatorToken) -> ApiResult<StatusCode> {
    let scope = state.scope();
    state.coordinator.dispatcher.assign_jobs_to_agents(&scope).await.map_err(ApiError::from)?;
    Ok(StatusCode::NO_CONTENT)
}
