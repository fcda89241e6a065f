//! Agent registry (spec §4.3, component C3): identity, key validation,
//! status transitions and heartbeat/liveness.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::cache::{keys, Cache, CacheTtls};
use crate::entities::{Agent, AgentKey, AgentStatus};
use crate::error::{CoreError, Result};
use crate::events::{EventBus, Topic};
use crate::scope::RequestScope;
use crate::store::{AgentUpdate, NewAgent, NewAgentKey, Store};

pub struct AgentRegistry {
    store: Arc<dyn Store>,
    cache: Arc<Cache>,
    events: Arc<EventBus>,
    liveness_window: chrono::Duration,
}

impl AgentRegistry {
    pub fn new(store: Arc<dyn Store>, cache: Arc<Cache>, events: Arc<EventBus>, liveness_window: chrono::Duration) -> Self {
        Self { store, cache, events, liveness_window }
    }

    pub fn liveness_window(&self) -> chrono::Duration {
        self.liveness_window
    }

    fn ttl(&self) -> std::time::Duration {
        self.cache.ttls().agent
    }

    fn invalidate(&self, agent: &Agent) {
        self.cache.invalidate(&keys::entity("agent", agent.id));
        self.cache.invalidate(&keys::list("agent"));
    }

    fn publish_status(&self, agent: &Agent) {
        self.events.publish(
            Topic::AgentStatus,
            json!({ "agent_id": agent.id, "status": agent.status.as_str() }),
        );
    }

    /// Register (or re-register) an agent binary (spec §4.3 `RegisterAgent`).
    pub async fn register_agent(
        &self,
        scope: &RequestScope,
        key: &str,
        name: &str,
        ip_address: &str,
        port: i32,
        capabilities: &str,
    ) -> Result<Agent> {
        let agent_key = self
            .store
            .get_agent_key_by_key(scope, key)
            .await
            .map_err(|_| CoreError::unauthorized("invalid_agent_key", "unknown agent key"))?;

        let now = Utc::now();
        if !agent_key.is_usable(now) {
            return Err(CoreError::unauthorized("invalid_agent_key", "agent key is expired or revoked"));
        }

        if let Some(bound_agent_id) = agent_key.agent_id {
            let bound = self.store.get_agent_by_id(scope, bound_agent_id).await?;
            if bound.name != name || bound.ip_address != ip_address {
                return Err(CoreError::conflict(
                    "agent_key_already_bound",
                    format!("agent_key already bound to {}@{}", bound.name, bound.ip_address),
                ));
            }
        }

        let existing = self.store.get_agent_by_name_ip(scope, name, ip_address).await;
        let agent = match existing {
            Ok(found) if found.agent_key_id == Some(agent_key.id) => {
                self.store
                    .update_agent(
                        scope,
                        found.id,
                        AgentUpdate {
                            port: Some(port),
                            capabilities: Some(capabilities.to_string()),
                            status: Some(AgentStatus::Online),
                            last_seen: Some(now),
                        },
                    )
                    .await?
            }
            Ok(_found) => {
                return Err(CoreError::conflict(
                    "agent_exists",
                    format!("agent {name}@{ip_address} is already registered under a different key"),
                ))
            }
            Err(CoreError::NotFound { .. }) => {
                self.store
                    .create_agent(
                        scope,
                        NewAgent {
                            name: name.to_string(),
                            ip_address: ip_address.to_string(),
                            port,
                            capabilities: capabilities.to_string(),
                            agent_key_id: agent_key.id,
                        },
                    )
                    .await
                    .map_err(|err| match err {
                        CoreError::Duplicate { .. } => CoreError::conflict("agent_exists", format!("agent {name}@{ip_address} is already registered")),
                        other => other,
                    })?
            }
            Err(other) => return Err(other),
        };

        self.store.bind_agent_key(scope, agent_key.id, agent.id).await?;
        self.store.touch_agent_key_used(scope, agent_key.id, now).await?;
        self.cache.invalidate(&keys::agent_key(key));
        self.invalidate(&agent);
        self.publish_status(&agent);
        info!(agent_id = %agent.id, name, ip_address, "agent registered");
        Ok(agent)
    }

    /// Mint a fresh opaque credential (spec §6 `POST /agent-keys/generate`):
    /// not yet bound to any agent until a `RegisterAgent` call consumes it.
    pub async fn generate_key(
        &self,
        scope: &RequestScope,
        display_name: &str,
        description: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<AgentKey> {
        let token = Uuid::new_v4().simple().to_string();
        self.store
            .create_agent_key(scope, NewAgentKey { key: token, display_name: display_name.to_string(), description, expires_at })
            .await
    }

    /// Verifies `key` is active and bound to `agent_id` (spec §6 "Agent
    /// authentication header"). Every agent-self-service path but
    /// `RegisterAgent` itself (which performs the binding) calls this before
    /// acting on the caller's behalf.
    pub async fn authorize(&self, scope: &RequestScope, key: &str, agent_id: Uuid) -> Result<()> {
        let agent_key = self
            .store
            .get_agent_key_by_key(scope, key)
            .await
            .map_err(|_| CoreError::unauthorized("invalid_agent_key", "unknown agent key"))?;
        if !agent_key.is_usable(Utc::now()) {
            return Err(CoreError::unauthorized("invalid_agent_key", "agent key is expired or revoked"));
        }
        if agent_key.agent_id != Some(agent_id) {
            return Err(CoreError::unauthorized("agent_key_mismatch", "agent key is not bound to this agent"));
        }
        Ok(())
    }

    /// Idempotent liveness ping (spec §4.3 `Heartbeat`): at most one write.
    pub async fn heartbeat(&self, scope: &RequestScope, agent_id: Uuid) -> Result<()> {
        let agent = self.get(scope, agent_id).await?;
        let now = Utc::now();
        let update = if agent.status == AgentStatus::Offline {
            AgentUpdate { status: Some(AgentStatus::Online), last_seen: Some(now), ..Default::default() }
        } else {
            AgentUpdate { last_seen: Some(now), ..Default::default() }
        };
        let updated = self.store.update_agent(scope, agent_id, update).await?;
        self.invalidate(&updated);
        if updated.status != agent.status {
            self.publish_status(&updated);
        }
        Ok(())
    }

    /// Direct status set, used by the dispatcher (→ busy) and on job
    /// completion (→ online) (spec §4.3 `UpdateStatus`).
    pub async fn set_status(&self, scope: &RequestScope, agent_id: Uuid, status: AgentStatus) -> Result<Agent> {
        let updated = self
            .store
            .update_agent(scope, agent_id, AgentUpdate { status: Some(status), ..Default::default() })
            .await?;
        self.invalidate(&updated);
        self.publish_status(&updated);
        Ok(updated)
    }

    /// `GET /agent-keys/` (spec §6): every issued credential, active or not.
    pub async fn list_keys(&self, scope: &RequestScope) -> Result<Vec<AgentKey>> {
        self.store.get_all_agent_keys(scope).await
    }

    /// `DELETE /agent-keys/{key}/revoke` (spec §6): revocation is immediate
    /// and unconditional; a revoked key fails every subsequent
    /// `RegisterAgent` with `Unauthorized`.
    pub async fn revoke_key(&self, scope: &RequestScope, key: &str) -> Result<AgentKey> {
        self.store.revoke_agent_key(scope, key).await
    }

    /// Remove the agent row. Cascading running-job failure is orchestrated
    /// by the top-level coordinator, which must call it before this —
    /// `Store::delete_agent` only nulls foreign keys (spec §6).
    pub async fn delete(&self, scope: &RequestScope, agent_id: Uuid) -> Result<()> {
        self.store.delete_agent(scope, agent_id).await?;
        self.cache.invalidate(&keys::entity("agent", agent_id));
        self.cache.invalidate(&keys::list("agent"));
        Ok(())
    }

    /// Cache-through fetch honouring the agent TTL (spec §4.2).
    pub async fn get(&self, scope: &RequestScope, agent_id: Uuid) -> Result<Agent> {
        let key = keys::entity("agent", agent_id);
        if let Some(agent) = self.cache.get::<Agent>(&key) {
            return Ok(agent);
        }
        let agent = self.store.get_agent_by_id(scope, agent_id).await?;
        self.cache.put(key, &agent, self.ttl());
        Ok(agent)
    }

    pub async fn list(&self, scope: &RequestScope) -> Result<Vec<Agent>> {
        let key = keys::list("agent");
        if let Some(agents) = self.cache.get::<Vec<Agent>>(&key) {
            return Ok(agents);
        }
        let agents = self.store.get_all_agents(scope).await?;
        self.cache.put(key, &agents, self.ttl());
        Ok(agents)
    }

    /// Agents considered alive *right now*, applying the liveness window on
    /// top of the stored status (spec §4.3).
    pub async fn list_online(&self, scope: &RequestScope) -> Result<Vec<Agent>> {
        let now = Utc::now();
        Ok(self
            .list(scope)
            .await?
            .into_iter()
            .filter(|a| a.effective_status(now, self.liveness_window) == AgentStatus::Online)
            .collect())
    }

    /// Agents whose stored `last_seen` is stale enough that they should be
    /// swept to `offline` (spec §4.3 background sweeper).
    pub async fn list_stale(&self, scope: &RequestScope, now: DateTime<Utc>) -> Result<Vec<Agent>> {
        Ok(self
            .store
            .get_all_agents(scope)
            .await?
            .into_iter()
            .filter(|a| a.status != AgentStatus::Offline && !a.is_live(now, self.liveness_window))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheTtls;
    use crate::store::memory::MemoryStore;
    use crate::store::NewAgentKey;

    fn registry() -> (Arc<dyn Store>, AgentRegistry) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let cache = Arc::new(Cache::new(CacheTtls::default()));
        let events = Arc::new(EventBus::new(64));
        let registry = AgentRegistry::new(store.clone(), cache, events, chrono::Duration::seconds(120));
        (store, registry)
    }

    #[tokio::test]
    async fn register_then_heartbeat_promotes_offline_to_online() {
        let (store, registry) = registry();
        let scope = RequestScope::unbounded();
        store
            .create_agent_key(&scope, NewAgentKey { key: "K1".into(), display_name: "a1".into(), description: None, expires_at: None })
            .await
            .unwrap();
        let agent = registry.register_agent(&scope, "K1", "a1", "10.0.0.1", 9000, "").await.unwrap();
        assert_eq!(agent.status, AgentStatus::Online);

        registry.set_status(&scope, agent.id, AgentStatus::Offline).await.unwrap();
        registry.heartbeat(&scope, agent.id).await.unwrap();
        let reloaded = registry.get(&scope, agent.id).await.unwrap();
        assert_eq!(reloaded.status, AgentStatus::Online);
    }

    #[tokio::test]
    async fn unknown_key_is_unauthorized() {
        let (_store, registry) = registry();
        let scope = RequestScope::unbounded();
        let err = registry.register_agent(&scope, "nope", "a1", "10.0.0.1", 9000, "").await.unwrap_err();
        assert_eq!(err.code(), "invalid_agent_key");
    }

    #[tokio::test]
    async fn revoked_key_is_unauthorized() {
        let (store, registry) = registry();
        let scope = RequestScope::unbounded();
        store
            .create_agent_key(&scope, NewAgentKey { key: "K1".into(), display_name: "a1".into(), description: None, expires_at: None })
            .await
            .unwrap();
        store.revoke_agent_key(&scope, "K1").await.unwrap();
        let err = registry.register_agent(&scope, "K1", "a1", "10.0.0.1", 9000, "").await.unwrap_err();
        assert_eq!(err.code(), "invalid_agent_key");
    }

    #[tokio::test]
    async fn key_bound_to_different_identity_conflicts() {
        let (store, registry) = registry();
        let scope = RequestScope::unbounded();
        store
            .create_agent_key(&scope, NewAgentKey { key: "K1".into(), display_name: "a1".into(), description: None, expires_at: None })
            .await
            .unwrap();
        registry.register_agent(&scope, "K1", "a1", "10.0.0.1", 9000, "").await.unwrap();
        let err = registry
            .register_agent(&scope, "K1", "a2", "10.0.0.2", 9001, "")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "agent_key_already_bound");
    }

    #[tokio::test]
    async fn duplicate_name_ip_with_a_different_key_is_rejected() {
        let (store, registry) = registry();
        let scope = RequestScope::unbounded();
        store
            .create_agent_key(&scope, NewAgentKey { key: "K1".into(), display_name: "a1".into(), description: None, expires_at: None })
            .await
            .unwrap();
        store
            .create_agent_key(&scope, NewAgentKey { key: "K2".into(), display_name: "a1-dup".into(), description: None, expires_at: None })
            .await
            .unwrap();
        registry.register_agent(&scope, "K1", "a1", "10.0.0.1", 9000, "").await.unwrap();
        let err = registry.register_agent(&scope, "K2", "a1", "10.0.0.1", 9000, "").await.unwrap_err();
        assert_eq!(err.code(), "agent_exists");
    }

    #[tokio::test]
    async fn stale_agent_is_listed_for_sweep() {
        let (store, registry) = registry();
        let scope = RequestScope::unbounded();
        store
            .create_agent_key(&scope, NewAgentKey { key: "K1".into(), display_name: "a1".into(), description: None, expires_at: None })
            .await
            .unwrap();
        let agent = registry.register_agent(&scope, "K1", "a1", "10.0.0.1", 9000, "").await.unwrap();
        let now = agent.last_seen + chrono::Duration::seconds(121);
        let stale = registry.list_stale(&scope, now).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, agent.id);
    }

    #[tokio::test]
    async fn authorize_rejects_mismatched_agent_and_accepts_bound_one() {
        let (_store, registry) = registry();
        let scope = RequestScope::unbounded();
        let minted = registry.generate_key(&scope, "a1", None, None).await.unwrap();
        let agent = registry.register_agent(&scope, &minted.key, "a1", "10.0.0.1", 9000, "").await.unwrap();

        registry.authorize(&scope, &minted.key, agent.id).await.unwrap();
        let err = registry.authorize(&scope, &minted.key, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.code(), "agent_key_mismatch");
    }

    #[tokio::test]
    async fn list_keys_returns_every_issued_key() {
        let (_store, registry) = registry();
        let scope = RequestScope::unbounded();
        registry.generate_key(&scope, "a1", None, None).await.unwrap();
        registry.generate_key(&scope, "a2", None, None).await.unwrap();
        let keys = registry.list_keys(&scope).await.unwrap();
        assert_eq!(keys.len(), 2);
    }

    #[tokio::test]
    async fn generated_key_registers_and_revoked_key_then_rejects() {
        let (_store, registry) = registry();
        let scope = RequestScope::unbounded();
        let minted = registry.generate_key(&scope, "a1", None, None).await.unwrap();

        let agent = registry.register_agent(&scope, &minted.key, "a1", "10.0.0.1", 9000, "").await.unwrap();
        assert_eq!(agent.status, AgentStatus::Online);

        registry.revoke_key(&scope, &minted.key).await.unwrap();
        let err = registry.register_agent(&scope, &minted.key, "a1", "10.0.0.1", 9000, "").await.unwrap_err();
        assert_eq!(err.code(), "invalid_agent_key");
    }
}
