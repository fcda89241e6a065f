use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "agent_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Offline,
    Online,
    Busy,
    Banned,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Offline => "offline",
            AgentStatus::Online => "online",
            AgentStatus::Busy => "busy",
            AgentStatus::Banned => "banned",
        }
    }
}

/// A registered worker node (spec §3 "Agent").
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Agent {
    pub id: Uuid,
    pub name: String,
    pub ip_address: String,
    pub port: i32,
    pub status: AgentStatus,
    pub capabilities: String,
    pub last_seen: DateTime<Utc>,
    pub agent_key_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// Whether this agent is considered alive given the liveness window W.
    /// Readers must apply this rather than trust the stored `status` column
    /// directly (spec §4.3 "Liveness").
    pub fn is_live(&self, now: DateTime<Utc>, liveness_window: chrono::Duration) -> bool {
        now.signed_duration_since(self.last_seen) < liveness_window
    }

    /// The effective status a reader should see: `offline` once `last_seen`
    /// is at least `liveness_window` old, regardless of the stored value.
    pub fn effective_status(&self, now: DateTime<Utc>, liveness_window: chrono::Duration) -> AgentStatus {
        if self.status == AgentStatus::Banned {
            return AgentStatus::Banned;
        }
        if self.is_live(now, liveness_window) {
            self.status
        } else {
            AgentStatus::Offline
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent_with_last_seen(last_seen: DateTime<Utc>) -> Agent {
        Agent {
            id: Uuid::new_v4(),
            name: "a1".into(),
            ip_address: "10.0.0.1".into(),
            port: 9000,
            status: AgentStatus::Online,
            capabilities: String::new(),
            last_seen,
            agent_key_id: None,
            created_at: last_seen,
            updated_at: last_seen,
        }
    }

    #[test]
    fn exactly_at_window_is_offline() {
        let now = Utc::now();
        let window = chrono::Duration::seconds(120);
        let agent = agent_with_last_seen(now - window);
        assert_eq!(agent.effective_status(now, window), AgentStatus::Offline);
    }

    #[test]
    fn just_inside_window_is_online() {
        let now = Utc::now();
        let window = chrono::Duration::seconds(120);
        let agent = agent_with_last_seen(now - window + chrono::Duration::seconds(1));
        assert_eq!(agent.effective_status(now, window), AgentStatus::Online);
    }

    #[test]
    fn banned_overrides_liveness() {
        let now = Utc::now();
        let window = chrono::Duration::seconds(120);
        let mut agent = agent_with_last_seen(now);
        agent.status = AgentStatus::Banned;
        assert_eq!(agent.effective_status(now, window), AgentStatus::Banned);
    }
}
