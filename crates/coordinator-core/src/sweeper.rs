//! Liveness sweeper (spec §4.3): the background task that reconciles stored
//! agent status with reality on a `W/4` cadence, independent of whether any
//! reader has asked for the agent recently.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::entities::{AgentStatus, JobStatus};
use crate::jobs::JobMachine;
use crate::registry::AgentRegistry;
use crate::scope::RequestScope;

pub struct LivenessSweeper {
    registry: Arc<AgentRegistry>,
    machine: Arc<JobMachine>,
}

impl LivenessSweeper {
    pub fn new(registry: Arc<AgentRegistry>, machine: Arc<JobMachine>) -> Self {
        Self { registry, machine }
    }

    /// One sweep pass (spec §4.3, scenario in spec §8.3): agents past the
    /// liveness window are persisted `offline`, and any `running` job they
    /// owned is failed with reason `agent_timeout`.
    pub async fn sweep_once(&self) -> crate::error::Result<usize> {
        let scope = RequestScope::unbounded();
        let now = Utc::now();
        let stale = self.registry.list_stale(&scope, now).await?;
        let mut swept = 0;
        for agent in stale {
            self.registry.set_status(&scope, agent.id, AgentStatus::Offline).await?;
            swept += 1;

            let owned = self.machine.store().get_jobs_by_agent_id(&scope, agent.id).await?;
            for job in owned.into_iter().filter(|j| j.status == JobStatus::Running) {
                match self
                    .machine
                    .finish(&scope, job.id, JobStatus::Failed, Some("agent_timeout".into()), None, &[JobStatus::Running])
                    .await
                {
                    Ok(_) => info!(agent_id = %agent.id, job_id = %job.id, "failed running job on agent timeout"),
                    Err(err) => warn!(agent_id = %agent.id, job_id = %job.id, error = %err, "could not fail job on agent timeout"),
                }
            }
        }
        if swept > 0 {
            info!(swept, "liveness sweep reaped stale agents");
        }
        Ok(swept)
    }

    /// Runs [`Self::sweep_once`] forever at `W/4`, logging and continuing on
    /// a failed pass rather than exiting the task.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let cadence = (self.registry.liveness_window() / 4)
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(30));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cadence);
            loop {
                ticker.tick().await;
                if let Err(err) = self.sweep_once().await {
                    warn!(error = %err, "liveness sweep pass failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Cache, CacheTtls};
    use crate::events::EventBus;
    use crate::store::memory::MemoryStore;
    use crate::store::{NewAgent, NewAgentKey, NewHashFile, NewJob, NewWordlist, Store};

    #[tokio::test]
    async fn stale_agent_goes_offline_and_its_running_job_fails() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let cache = Arc::new(Cache::new(CacheTtls::default()));
        let events = Arc::new(EventBus::new(64));
        let registry = Arc::new(AgentRegistry::new(store.clone(), cache.clone(), events.clone(), chrono::Duration::seconds(120)));
        let scope = RequestScope::unbounded();

        let key = store
            .create_agent_key(&scope, NewAgentKey { key: "K1".into(), display_name: "a1".into(), description: None, expires_at: None })
            .await
            .unwrap();
        let agent = registry.register_agent(&scope, "K1", "a1", "10.0.0.1", 9000, "").await.unwrap();

        let hash_file = store
            .create_hash_file(&scope, NewHashFile { name: "h".into(), orig_name: "h.txt".into(), size_bytes: 10, content_type: "text/plain".into() })
            .await
            .unwrap();
        let wordlist = store
            .create_wordlist(&scope, NewWordlist { name: "w".into(), orig_name: "w.txt".into(), size_bytes: 10, content_type: "text/plain".into(), word_count: None })
            .await
            .unwrap();

        let machine = Arc::new(JobMachine::new(store.clone(), cache, events, registry.clone()));
        let job = machine
            .create_job(
                &scope,
                NewJob { name: "j1".into(), hash_type: 2500, attack_mode: 0, hash_file_id: hash_file.id, wordlist_id: wordlist.id, rules: None, agent_id: None },
            )
            .await
            .unwrap();
        let job = machine.assign(&scope, job.id, agent.id).await.unwrap();
        machine.start_job(&scope, job.id, agent.id).await.unwrap();

        store
            .update_agent(&scope, agent.id, crate::store::AgentUpdate { last_seen: Some(Utc::now() - chrono::Duration::seconds(121)), ..Default::default() })
            .await
            .unwrap();

        let sweeper = LivenessSweeper::new(registry.clone(), machine.clone());
        let swept = sweeper.sweep_once().await.unwrap();
        assert_eq!(swept, 1);

        let agent_after = registry.get(&scope, agent.id).await.unwrap();
        assert_eq!(agent_after.status, AgentStatus::Offline);
        let job_after = machine.get(&scope, job.id).await.unwrap();
        assert_eq!(job_after.status, JobStatus::Failed);
        assert_eq!(job_after.result.as_deref(), Some("agent_timeout"));
    }

    #[tokio::test]
    async fn live_agent_is_not_swept() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let cache = Arc::new(Cache::new(CacheTtls::default()));
        let events = Arc::new(EventBus::new(64));
        let registry = Arc::new(AgentRegistry::new(store.clone(), cache.clone(), events.clone(), chrono::Duration::seconds(120)));
        let scope = RequestScope::unbounded();
        store
            .create_agent_key(&scope, NewAgentKey { key: "K1".into(), display_name: "a1".into(), description: None, expires_at: None })
            .await
            .unwrap();
        registry.register_agent(&scope, "K1", "a1", "10.0.0.1", 9000, "").await.unwrap();

        let machine = Arc::new(JobMachine::new(store, cache, events, registry.clone()));
        let sweeper = LivenessSweeper::new(registry, machine);
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
    }
}
