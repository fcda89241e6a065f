//! Dispatcher (spec §4.5, component C5): binds pending jobs to online
//! agents, either in an operator-triggered batch (push) or on an agent's own
//! poll (pull).

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::entities::{AgentStatus, Job, JobStatus};
use crate::error::Result;
use crate::jobs::JobMachine;
use crate::scope::RequestScope;

/// Wraps the process-wide dispatch lock (spec §4.5, §5): held only for the
/// span of selecting one (job, agent) pair and writing its two status
/// transitions, then released so pulls in flight are not starved.
pub struct Dispatcher {
    machine: Arc<JobMachine>,
    dispatch_lock: Mutex<()>,
}

impl Dispatcher {
    pub fn new(machine: Arc<JobMachine>) -> Self {
        Self { machine, dispatch_lock: Mutex::new(()) }
    }

    async fn agents_owning_nonterminal_jobs(&self, scope: &RequestScope) -> Result<HashSet<Uuid>> {
        let mut owners = HashSet::new();
        for status in [JobStatus::Assigned, JobStatus::Running, JobStatus::Paused] {
            for job in self.machine.store().get_jobs_by_status(scope, status).await? {
                if let Some(agent_id) = job.agent_id {
                    owners.insert(agent_id);
                }
            }
        }
        Ok(owners)
    }

    /// `AssignJobsToAgents()` (spec §4.5(a)): one pass over the pending
    /// queue in `(created_at asc, id asc)` order, matching each job against
    /// the most-recently-seen free online agent, `(last_seen desc, id asc)`.
    /// A job with no free agent at the time it is considered is simply left
    /// pending for the next pass; this is not an error.
    pub async fn assign_jobs_to_agents(&self, scope: &RequestScope) -> Result<Vec<Job>> {
        let mut pending = self.machine.store().get_jobs_by_status(scope, JobStatus::Pending).await?;
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let mut assigned = Vec::new();
        for job in pending {
            let _guard = self.dispatch_lock.lock().await;

            let fresh = match self.machine.store().get_job_by_id(scope, job.id).await {
                Ok(j) => j,
                Err(_) => continue,
            };
            if fresh.status != JobStatus::Pending {
                continue;
            }

            let busy = self.agents_owning_nonterminal_jobs(scope).await?;
            let mut online = self.machine.registry().list_online(scope).await?;
            online.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then(a.id.cmp(&b.id)));
            let Some(agent) = online.into_iter().find(|a| !busy.contains(&a.id)) else {
                continue;
            };

            if let Ok(updated) = self.machine.assign(scope, fresh.id, agent.id).await {
                self.machine.registry().set_status(scope, agent.id, AgentStatus::Busy).await?;
                info!(job_id = %updated.id, agent_id = %agent.id, "job dispatched");
                assigned.push(updated);
            }
        }
        Ok(assigned)
    }

    /// `GetNextJobForAgent(agent_id)` (spec §4.5(b)): the oldest `pending` or
    /// `assigned` job bound to `agent_id`, transitioned to `assigned` if it
    /// was still `pending`. A pull always counts as a heartbeat, even when
    /// no job is returned.
    pub async fn get_next_job_for_agent(&self, scope: &RequestScope, agent_id: Uuid) -> Result<Job> {
        let _guard = self.dispatch_lock.lock().await;
        self.machine.registry().heartbeat(scope, agent_id).await?;
        let job = self.machine.store().get_next_job_for_agent(scope, agent_id).await?;
        if job.status == JobStatus::Assigned {
            return Ok(job);
        }
        self.machine.assign(scope, job.id, agent_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Cache, CacheTtls};
    use crate::events::EventBus;
    use crate::registry::AgentRegistry;
    use crate::store::memory::MemoryStore;
    use crate::store::{NewAgent, NewAgentKey, NewHashFile, NewJob, NewWordlist, Store};

    struct Harness {
        machine: Arc<JobMachine>,
        registry: Arc<AgentRegistry>,
        hash_file_id: Uuid,
        wordlist_id: Uuid,
    }

    async fn harness() -> Harness {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let cache = Arc::new(Cache::new(CacheTtls::default()));
        let events = Arc::new(EventBus::new(64));
        let registry = Arc::new(AgentRegistry::new(store.clone(), cache.clone(), events.clone(), chrono::Duration::seconds(120)));
        let scope = RequestScope::unbounded();

        let hash_file = store
            .create_hash_file(&scope, NewHashFile { name: "h".into(), orig_name: "h.txt".into(), size_bytes: 10, content_type: "text/plain".into() })
            .await
            .unwrap();
        let wordlist = store
            .create_wordlist(&scope, NewWordlist { name: "w".into(), orig_name: "w.txt".into(), size_bytes: 10, content_type: "text/plain".into(), word_count: None })
            .await
            .unwrap();

        let machine = Arc::new(JobMachine::new(store, cache, events, registry.clone()));
        Harness { machine, registry, hash_file_id: hash_file.id, wordlist_id: wordlist.id }
    }

    async fn register(h: &Harness, name: &str, ip: &str) -> crate::entities::Agent {
        let scope = RequestScope::unbounded();
        h.machine
            .store()
            .create_agent_key(&scope, NewAgentKey { key: format!("K-{name}"), display_name: name.into(), description: None, expires_at: None })
            .await
            .unwrap();
        h.registry.register_agent(&scope, &format!("K-{name}"), name, ip, 9000, "").await.unwrap()
    }

    async fn new_pending_job(h: &Harness, name: &str) -> Job {
        let scope = RequestScope::unbounded();
        h.machine
            .create_job(
                &scope,
                NewJob { name: name.into(), hash_type: 2500, attack_mode: 0, hash_file_id: h.hash_file_id, wordlist_id: h.wordlist_id, rules: None, agent_id: None },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn push_assigns_oldest_job_to_most_recently_seen_agent() {
        let h = harness().await;
        let scope = RequestScope::unbounded();
        let older = register(&h, "a-old", "10.0.0.1").await;
        let newer = register(&h, "a-new", "10.0.0.2").await;
        h.registry.heartbeat(&scope, newer.id).await.unwrap();

        let job = new_pending_job(&h, "j1").await;
        let dispatcher = Dispatcher::new(h.machine.clone());
        let assigned = dispatcher.assign_jobs_to_agents(&scope).await.unwrap();

        assert_eq!(assigned.len(), 1);
        assert_eq!(assigned[0].id, job.id);
        assert_eq!(assigned[0].agent_id, Some(newer.id));
        let older_reloaded = h.registry.get(&scope, older.id).await.unwrap();
        assert_eq!(older_reloaded.status, AgentStatus::Online);
    }

    #[tokio::test]
    async fn push_skips_agents_already_owning_a_nonterminal_job() {
        let h = harness().await;
        let scope = RequestScope::unbounded();
        let agent = register(&h, "a1", "10.0.0.1").await;

        let first = new_pending_job(&h, "j1").await;
        let second = new_pending_job(&h, "j2").await;

        let dispatcher = Dispatcher::new(h.machine.clone());
        let first_pass = dispatcher.assign_jobs_to_agents(&scope).await.unwrap();
        assert_eq!(first_pass.len(), 1);
        assert_eq!(first_pass[0].id, first.id);

        let second_pass = dispatcher.assign_jobs_to_agents(&scope).await.unwrap();
        assert!(second_pass.is_empty());
        let still_pending = h.machine.get(&scope, second.id).await.unwrap();
        assert_eq!(still_pending.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn pull_assigns_and_implicitly_heartbeats() {
        let h = harness().await;
        let scope = RequestScope::unbounded();
        let agent = register(&h, "a1", "10.0.0.1").await;
        h.registry.set_status(&scope, agent.id, AgentStatus::Offline).await.unwrap();
        let job = new_pending_job(&h, "j1").await;
        h.machine.assign(&scope, job.id, agent.id).await.unwrap_err();

        let dispatcher = Dispatcher::new(h.machine.clone());
        let store = h.machine.store();
        store
            .update_job(&scope, job.id, crate::store::JobUpdate { agent_id: Some(Some(agent.id)), ..Default::default() })
            .await
            .unwrap();

        let pulled = dispatcher.get_next_job_for_agent(&scope, agent.id).await.unwrap();
        assert_eq!(pulled.status, JobStatus::Assigned);
        let agent_after = h.registry.get(&scope, agent.id).await.unwrap();
        assert_eq!(agent_after.status, AgentStatus::Online);
    }

    #[tokio::test]
    async fn pull_on_already_assigned_job_is_a_no_op() {
        let h = harness().await;
        let scope = RequestScope::unbounded();
        let agent = register(&h, "a1", "10.0.0.1").await;
        let job = new_pending_job(&h, "j1").await;

        let dispatcher = Dispatcher::new(h.machine.clone());
        h.machine.store().update_job(&scope, job.id, crate::store::JobUpdate { agent_id: Some(Some(agent.id)), status: Some(JobStatus::Assigned), ..Default::default() }).await.unwrap();

        let first = dispatcher.get_next_job_for_agent(&scope, agent.id).await.unwrap();
        let second = dispatcher.get_next_job_for_agent(&scope, agent.id).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.status, JobStatus::Assigned);
    }
}
