//! Agent-key credential routes (spec §6): minting and revocation are
//! operator actions, gated on the bearer scheme rather than `X-Agent-Key`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use coordinator_core::entities::AgentKey;
use serde::Deserialize;

use crate::error::ApiResult;
use crate::extract::OperatorToken;
use crate::state::ApiState;

pub fn router() -> Router<ApiState> {
    Router::new()
        .route("/agent-keys/generate", post(generate))
        .route("/agent-keys/", get(list))
        .route("/agent-keys/:key/revoke", delete(revoke))
}

#[derive(Debug, Deserialize)]
struct GenerateKeyRequest {
    display_name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

async fn generate(
    State(state): State<ApiState>,
    _operator: OperatorToken,
    Json(body): Json<GenerateKeyRequest>,
) -> ApiResult<(StatusCode, Json<AgentKey>)> {
    let scope = state.scope();
    let key = state
        .coordinator
        .registry
        .generate_key(&scope, &body.display_name, body.description, body.expires_at)
        .await?;
    Ok((StatusCode::CREATED, Json(key)))
}

async fn list(State(state): State<ApiState>, _operator: OperatorToken) -> ApiResult<Json<Vec<AgentKey>>> {
    let scope = state.scope();
    Ok(Json(state.coordinator.registry.list_keys(&scope).await?))
}

async fn revoke(State(state): State<ApiState>, Path(key): Path<String>, _operator: OperatorToken) -> ApiResult<StatusCode> {
    let scope = state.scope();
    state.coordinator.registry.revoke_key(&scope, &key).await?;
    Ok(StatusCode::NO_CONTENT)
}
