//! In-process event bus (spec §4.7, component C7).
//!
//! Grounded in the broadcast-channel pattern `noa_ui_api::session::SessionBridge`
//! wraps around `noa_workflow`'s event stream (`tokio::sync::broadcast`
//! exposed to callers as a `Stream`). A single in-process pub/sub with
//! per-topic ordering and bounded per-subscriber buffers replaces the
//! source's "ad-hoc bus per client", per the REDESIGN FLAGS in spec §9.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    JobProgress,
    JobStatus,
    AgentStatus,
    Notification,
}

impl Topic {
    pub const ALL: [Topic; 4] = [Topic::JobProgress, Topic::JobStatus, Topic::AgentStatus, Topic::Notification];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::JobProgress => "job_progress",
            Topic::JobStatus => "job_status",
            Topic::AgentStatus => "agent_status",
            Topic::Notification => "notification",
        }
    }
}

/// Server-to-client envelope, matching the WebSocket protocol of spec §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub topic: Topic,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

struct TopicChannel {
    sender: broadcast::Sender<Event>,
}

pub struct EventBus {
    job_progress: TopicChannel,
    job_status: TopicChannel,
    agent_status: TopicChannel,
    notification: TopicChannel,
}

impl EventBus {
    pub fn new(buffer: usize) -> Self {
        Self {
            job_progress: TopicChannel { sender: broadcast::channel(buffer).0 },
            job_status: TopicChannel { sender: broadcast::channel(buffer).0 },
            agent_status: TopicChannel { sender: broadcast::channel(buffer).0 },
            notification: TopicChannel { sender: broadcast::channel(buffer).0 },
        }
    }

    fn channel(&self, topic: Topic) -> &TopicChannel {
        match topic {
            Topic::JobProgress => &self.job_progress,
            Topic::JobStatus => &self.job_status,
            Topic::AgentStatus => &self.agent_status,
            Topic::Notification => &self.notification,
        }
    }

    /// Publish to a topic. Delivery order within a topic matches publication
    /// order (a single `broadcast::Sender` per topic guarantees this); a
    /// send with zero current subscribers is not an error.
    pub fn publish(&self, topic: Topic, data: Value) {
        let event = Event { topic, data, timestamp: Utc::now() };
        let _ = self.channel(topic).sender.send(event);
    }

    /// Subscribe to a single topic. Unsubscribing is simply dropping the
    /// returned receiver — idempotent and immediate, per spec §4.7.
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Event> {
        self.channel(topic).sender.subscribe()
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.channel(topic).sender.receiver_count()
    }
}

/// Receive the next event for a subscriber, logging (and skipping) a lag gap
/// instead of surfacing it as an error — the "best-effort-synchronous"
/// delivery semantics of spec §4.7: a blocked/slow subscriber drops events
/// once its buffer fills rather than stalling the publisher.
pub async fn recv_lossy(
    subscriber_id: &str,
    receiver: &mut broadcast::Receiver<Event>,
) -> Option<Event> {
    loop {
        match receiver.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(subscriber_id, skipped, "event subscriber dropped events, buffer full");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscribers_receive_events_in_publish_order() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe(Topic::JobStatus);
        bus.publish(Topic::JobStatus, json!({"job": "a"}));
        bus.publish(Topic::JobStatus, json!({"job": "b"}));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.data, json!({"job": "a"}));
        assert_eq!(second.data, json!({"job": "b"}));
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = EventBus::new(64);
        let mut job_rx = bus.subscribe(Topic::JobStatus);
        bus.publish(Topic::AgentStatus, json!({"agent": "a1"}));
        assert!(job_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_is_just_dropping_the_receiver() {
        let bus = EventBus::new(64);
        let rx = bus.subscribe(Topic::Notification);
        assert_eq!(bus.subscriber_count(Topic::Notification), 1);
        drop(rx);
        assert_eq!(bus.subscriber_count(Topic::Notification), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_drops_and_continues() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe(Topic::Notification);
        for i in 0..5 {
            bus.publish(Topic::Notification, json!({"i": i}));
        }
        let event = recv_lossy("sub-1", &mut rx).await;
        assert!(event.is_some());
    }
}
