//! `GET /ws` (spec §6): live event subscription, grounded in the teacher's
//! `stream_events`/`handle_websocket` pair — upgrade, then forward published
//! events to the socket as JSON text frames until the client disconnects.
//!
//! Unlike the teacher's single bridge stream, the core publishes on four
//! independent topics (`Event`, spec §4.7), so this handler races all four
//! receivers against inbound client frames with `tokio::select!` and applies
//! the client's `subscribe`/`unsubscribe` filter before forwarding.

use std::collections::HashSet;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use coordinator_core::events::{recv_lossy, Event, EventBus, Topic};
use serde::Deserialize;

use crate::state::ApiState;

pub fn router() -> Router<ApiState> {
    Router::new().route("/ws", get(upgrade))
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<ApiState>) -> impl IntoResponse {
    let events = state.coordinator.events.clone();
    ws.on_upgrade(move |socket| handle_websocket(socket, events))
}

#[derive(Debug, Deserialize)]
struct ClientMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    resource: Option<String>,
}

fn topics_for_resource(resource: &str) -> &'static [Topic] {
    match resource {
        "job" => &[Topic::JobProgress],
        "jobs" => &[Topic::JobStatus],
        "agents" => &[Topic::AgentStatus],
        _ => &[],
    }
}

/// Notifications are not gated by the `job`/`jobs`/`agents` subscription
/// vocabulary (spec §6) — every connection receives them.
fn always_on() -> HashSet<Topic> {
    [Topic::Notification].into_iter().collect()
}

async fn handle_websocket(mut socket: WebSocket, events: std::sync::Arc<EventBus>) {
    let mut subscribed = always_on();
    let mut job_progress_rx = events.subscribe(Topic::JobProgress);
    let mut job_status_rx = events.subscribe(Topic::JobStatus);
    let mut agent_status_rx = events.subscribe(Topic::AgentStatus);
    let mut notification_rx = events.subscribe(Topic::Notification);

    loop {
        tokio::select! {
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => apply_client_message(&mut subscribed, &text),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
            event = recv_lossy("ws", &mut job_progress_rx) => {
                if !forward(&mut socket, &subscribed, event).await { break; }
            }
            event = recv_lossy("ws", &mut job_status_rx) => {
                if !forward(&mut socket, &subscribed, event).await { break; }
            }
            event = recv_lossy("ws", &mut agent_status_rx) => {
                if !forward(&mut socket, &subscribed, event).await { break; }
            }
            event = recv_lossy("ws", &mut notification_rx) => {
                if !forward(&mut socket, &subscribed, event).await { break; }
            }
        }
    }
}

fn apply_client_message(subscribed: &mut HashSet<Topic>, text: &str) {
    let Ok(message) = serde_json::from_str::<ClientMessage>(text) else { return };
    let Some(resource) = message.resource.as_deref() else { return };
    let topics = topics_for_resource(resource);
    match message.kind.as_str() {
        "subscribe" => subscribed.extend(topics.iter().copied()),
        "unsubscribe" => topics.iter().for_each(|t| {
            subscribed.remove(t);
        }),
        _ => {}
    }
}

/// Forwards one event if the connection is subscribed to its topic.
/// Returns `false` once the socket itself is gone, signalling the caller to
/// stop the loop; an unsubscribed or unmapped event is simply dropped.
async fn forward(socket: &mut WebSocket, subscribed: &HashSet<Topic>, event: Option<Event>) -> bool {
    let Some(event) = event else { return false };
    if !subscribed.contains(&event.topic) {
        return true;
    }
    let Ok(payload) = serde_json::to_string(&event) else { return true };
    socket.send(Message::Text(payload)).await.is_ok()
}
