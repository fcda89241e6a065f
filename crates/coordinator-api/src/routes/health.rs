//! `GET /health` (spec §6): plain liveness, no dependency checks — this
//! process is up, nothing more. Readiness against the store is a
//! `coordinator-api` non-goal (spec §4).

use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde_json::json;

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "timestamp": Utc::now().to_rfc3339() }))
}
