use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "agent_key_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AgentKeyStatus {
    Active,
    Expired,
    Revoked,
}

/// An issued credential authorising an agent binary (spec §3 "AgentKey").
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AgentKey {
    pub id: Uuid,
    pub key: String,
    pub display_name: String,
    pub description: Option<String>,
    pub status: AgentKeyStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub agent_id: Option<Uuid>,
}

impl AgentKey {
    /// Whether this key currently authorises a registration/call, evaluating
    /// expiry against `now` in addition to the stored status (spec §3 and
    /// §4.3 `RegisterAgent` guard).
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        if self.status != AgentKeyStatus::Active {
            return false;
        }
        match self.expires_at {
            Some(expires_at) => now < expires_at,
            None => true,
        }
    }
}
