//! Cache introspection and the operator flush action (spec §4.8, §6).

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::{Json, Router};
use coordinator_core::enrich::{cache_stats_view, CacheStatsView};

use crate::extract::OperatorToken;
use crate::state::ApiState;

pub fn router() -> Router<ApiState> {
    Router::new().route("/cache/stats", get(stats)).route("/cache/clear", delete(clear))
}

async fn stats(State(state): State<ApiState>) -> Json<CacheStatsView> {
    Json(cache_stats_view(&state.coordinator.cache))
}

async fn clear(State(state): State<ApiState>, _operator: OperatorToken) -> StatusCode {
    state.coordinator.cache.clear();
    StatusCode::NO_CONTENT
}
