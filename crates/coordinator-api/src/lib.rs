//! HTTP/WebSocket transport for the hashcat work coordinator. Composes
//! `coordinator_core::Coordinator` into an axum service; nothing downstream
//! of `routes` understands the dispatch core's internals directly.

pub mod error;
pub mod extract;
pub mod routes;
pub mod state;

pub use routes::router;
pub use state::ApiState;
