//! Route table assembly (spec §6): versioned API under `/api/v1`, plus the
//! two paths the table marks unprefixed — `/health` and `/ws`.

mod agent_keys;
mod agents;
mod cache;
mod health;
mod jobs;
mod ws;

use axum::routing::get;
use axum::Router;

use crate::state::ApiState;

pub fn router(state: ApiState) -> Router {
    let api_v1 = Router::new()
        .merge(agents::router())
        .merge(agent_keys::router())
        .merge(jobs::router())
        .merge(cache::router());

    Router::new()
        .route("/health", get(health::health))
        .merge(ws::router())
        .nest("/api/v1", api_v1)
        .with_state(state)
}
