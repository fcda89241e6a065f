//! Job state machine (spec §4.4, component C4): the lifecycle of a Job from
//! creation to a terminal state, guarding every transition in the table.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock as SyncRwLock;
use serde_json::json;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::info;
use uuid::Uuid;

use crate::cache::{keys, Cache};
use crate::entities::{AgentStatus, Job, JobStatus};
use crate::error::{CoreError, Result};
use crate::events::{EventBus, Topic};
use crate::registry::AgentRegistry;
use crate::scope::RequestScope;
use crate::store::{JobUpdate, NewJob, Store};

/// Per-job mutexes keyed by job id (spec §5: "Job state transitions take a
/// per-job mutex ... they do not block transitions on other jobs").
#[derive(Default)]
pub(crate) struct JobLocks {
    locks: SyncRwLock<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl JobLocks {
    pub(crate) async fn acquire(&self, job_id: Uuid) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.write();
            locks.entry(job_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        mutex.lock_owned().await
    }
}

pub struct JobMachine {
    store: Arc<dyn Store>,
    cache: Arc<Cache>,
    events: Arc<EventBus>,
    registry: Arc<AgentRegistry>,
    locks: JobLocks,
}

impl JobMachine {
    pub fn new(store: Arc<dyn Store>, cache: Arc<Cache>, events: Arc<EventBus>, registry: Arc<AgentRegistry>) -> Self {
        Self { store, cache, events, registry, locks: JobLocks::default() }
    }

    fn ttl(&self) -> std::time::Duration {
        self.cache.ttls().job
    }

    fn invalidate(&self, job: &Job) {
        self.cache.invalidate(&keys::entity("job", job.id));
        self.cache.invalidate(&keys::list("job"));
    }

    fn publish_status(&self, job: &Job) {
        self.events.publish(
            Topic::JobStatus,
            json!({ "job_id": job.id, "status": status_str(job.status), "agent_id": job.agent_id }),
        );
    }

    pub async fn get(&self, scope: &RequestScope, job_id: Uuid) -> Result<Job> {
        let key = keys::entity("job", job_id);
        if let Some(job) = self.cache.get::<Job>(&key) {
            return Ok(job);
        }
        let job = self.store.get_job_by_id(scope, job_id).await?;
        self.cache.put(key, &job, self.ttl());
        Ok(job)
    }

    pub async fn list(&self, scope: &RequestScope) -> Result<Vec<Job>> {
        let key = keys::list("job");
        if let Some(jobs) = self.cache.get::<Vec<Job>>(&key) {
            return Ok(jobs);
        }
        let jobs = self.store.get_all_jobs(scope).await?;
        self.cache.put(key, &jobs, self.ttl());
        Ok(jobs)
    }

    /// `CreateJob` (spec §4.4 create policy): pending unless an agent is
    /// supplied up front, in which case the job moves straight to assigned.
    pub async fn create_job(&self, scope: &RequestScope, new_job: NewJob) -> Result<Job> {
        let job = self.store.create_job(scope, new_job).await?;
        self.invalidate(&job);
        self.publish_status(&job);
        info!(job_id = %job.id, status = status_str(job.status), "job created");
        Ok(job)
    }

    /// `pending -> assigned`, guard: target agent status ∈ {online}.
    pub async fn assign(&self, scope: &RequestScope, job_id: Uuid, agent_id: Uuid) -> Result<Job> {
        let _guard = self.locks.acquire(job_id).await;
        let job = self.store.get_job_by_id(scope, job_id).await?;
        if job.status != JobStatus::Pending {
            return Err(CoreError::conflict("invalid_transition", format!("cannot assign job in status {}", status_str(job.status))));
        }
        let agent = self.registry.get(scope, agent_id).await?;
        if agent.status != AgentStatus::Online {
            return Err(CoreError::conflict("agent_not_online", format!("agent {agent_id} is not online")));
        }
        let updated = self
            .store
            .update_job(
                scope,
                job_id,
                JobUpdate { status: Some(JobStatus::Assigned), agent_id: Some(Some(agent_id)), ..Default::default() },
            )
            .await?;
        self.invalidate(&updated);
        self.publish_status(&updated);
        Ok(updated)
    }

    /// `assigned -> running` (agent pull), guard: caller is the assigned agent.
    pub async fn start_job(&self, scope: &RequestScope, job_id: Uuid, caller_agent_id: Uuid) -> Result<Job> {
        let _guard = self.locks.acquire(job_id).await;
        let job = self.store.get_job_by_id(scope, job_id).await?;
        if job.status != JobStatus::Assigned {
            return Err(CoreError::conflict("invalid_transition", format!("cannot start job in status {}", status_str(job.status))));
        }
        if job.agent_id != Some(caller_agent_id) {
            return Err(CoreError::conflict("assignee_mismatch", "caller is not the assigned agent"));
        }
        let updated = self
            .store
            .update_job(
                scope,
                job_id,
                JobUpdate {
                    status: Some(JobStatus::Running),
                    started_at: Some(Some(Utc::now())),
                    ..Default::default()
                },
            )
            .await?;
        self.invalidate(&updated);
        self.publish_status(&updated);
        Ok(updated)
    }

    /// `running -> paused`. Frees the assigned agent back to `online` if it
    /// was `busy` (Open Question in spec §9, resolved in DESIGN.md: pause
    /// frees the agent).
    pub async fn pause(&self, scope: &RequestScope, job_id: Uuid) -> Result<Job> {
        let _guard = self.locks.acquire(job_id).await;
        let job = self.store.get_job_by_id(scope, job_id).await?;
        if job.status != JobStatus::Running {
            return Err(CoreError::conflict("invalid_transition", format!("cannot pause job in status {}", status_str(job.status))));
        }
        let updated = self
            .store
            .update_job(scope, job_id, JobUpdate { status: Some(JobStatus::Paused), ..Default::default() })
            .await?;
        self.free_agent_if_busy(scope, &updated).await?;
        self.invalidate(&updated);
        self.publish_status(&updated);
        Ok(updated)
    }

    /// `paused -> assigned`, guard: assigned agent still exists.
    pub async fn resume(&self, scope: &RequestScope, job_id: Uuid) -> Result<Job> {
        let _guard = self.locks.acquire(job_id).await;
        let job = self.store.get_job_by_id(scope, job_id).await?;
        if job.status != JobStatus::Paused {
            return Err(CoreError::conflict("invalid_transition", format!("cannot resume job in status {}", status_str(job.status))));
        }
        let agent_id = job.agent_id.ok_or_else(|| CoreError::conflict("job_has_no_agent", "paused job has no assigned agent"))?;
        self.registry.get(scope, agent_id).await?;
        let updated = self
            .store
            .update_job(scope, job_id, JobUpdate { status: Some(JobStatus::Assigned), ..Default::default() })
            .await?;
        self.invalidate(&updated);
        self.publish_status(&updated);
        Ok(updated)
    }

    /// `pending|assigned|paused -> cancelled`.
    pub async fn cancel(&self, scope: &RequestScope, job_id: Uuid) -> Result<Job> {
        let _guard = self.locks.acquire(job_id).await;
        let job = self.store.get_job_by_id(scope, job_id).await?;
        if job.status.is_terminal() {
            return Err(CoreError::conflict("invalid_transition", format!("job already terminal ({})", status_str(job.status))));
        }
        if !matches!(job.status, JobStatus::Pending | JobStatus::Assigned | JobStatus::Paused) {
            return Err(CoreError::conflict("invalid_transition", format!("cannot cancel job in status {}", status_str(job.status))));
        }
        let updated = self
            .store
            .update_job(
                scope,
                job_id,
                JobUpdate {
                    status: Some(JobStatus::Cancelled),
                    completed_at: Some(Some(Utc::now())),
                    ..Default::default()
                },
            )
            .await?;
        self.free_agent_if_busy(scope, &updated).await?;
        self.invalidate(&updated);
        self.publish_status(&updated);
        Ok(updated)
    }

    /// Applies a terminal transition (`completed`/`failed`) with `result`
    /// stored verbatim. Shared by `ProgressIngestor::complete_job` and
    /// `::fail_job` (component C6) and by the liveness sweeper's
    /// `agent_timeout` failure path — both need the same guard and side
    /// effects as the table in spec §4.4, just reached from different
    /// callers.
    pub(crate) async fn finish(
        &self,
        scope: &RequestScope,
        job_id: Uuid,
        status: JobStatus,
        result: Option<String>,
        speed: Option<i64>,
        allowed_from: &[JobStatus],
    ) -> Result<Job> {
        let _guard = self.locks.acquire(job_id).await;
        let job = self.store.get_job_by_id(scope, job_id).await?;
        if job.status.is_terminal() {
            return Err(CoreError::conflict("invalid_transition", format!("job already terminal ({})", status_str(job.status))));
        }
        if !allowed_from.contains(&job.status) {
            return Err(CoreError::conflict(
                "invalid_transition",
                format!("cannot transition job from {} to {}", status_str(job.status), status_str(status)),
            ));
        }
        let updated = self
            .store
            .update_job(
                scope,
                job_id,
                JobUpdate {
                    status: Some(status),
                    result: Some(result),
                    speed,
                    completed_at: Some(Some(Utc::now())),
                    ..Default::default()
                },
            )
            .await?;
        self.free_agent_if_busy(scope, &updated).await?;
        self.invalidate(&updated);
        self.publish_status(&updated);
        Ok(updated)
    }

    /// On transition to a terminal state or to `paused`, an agent left
    /// `busy` is returned to `online` (spec §4.4).
    async fn free_agent_if_busy(&self, scope: &RequestScope, job: &Job) -> Result<()> {
        if let Some(agent_id) = job.agent_id {
            if let Ok(agent) = self.registry.get(scope, agent_id).await {
                if agent.status == AgentStatus::Busy {
                    self.registry.set_status(scope, agent_id, AgentStatus::Online).await?;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub(crate) fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub(crate) fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub(crate) fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub(crate) fn invalidate_pub(&self, job: &Job) {
        self.invalidate(job);
    }

    pub(crate) fn publish_status_pub(&self, job: &Job) {
        self.publish_status(job);
    }

    pub(crate) async fn lock(&self, job_id: Uuid) -> OwnedMutexGuard<()> {
        self.locks.acquire(job_id).await
    }
}

fn status_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => "pending",
        JobStatus::Assigned => "assigned",
        JobStatus::Running => "running",
        JobStatus::Paused => "paused",
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
        JobStatus::Cancelled => "cancelled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Cache, CacheTtls};
    use crate::store::memory::MemoryStore;
    use crate::store::{NewAgent, NewAgentKey, NewHashFile, NewWordlist};

    async fn harness() -> (Arc<dyn Store>, Arc<AgentRegistry>, JobMachine, Uuid, Uuid, Uuid) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let cache = Arc::new(Cache::new(CacheTtls::default()));
        let events = Arc::new(EventBus::new(64));
        let registry = Arc::new(AgentRegistry::new(store.clone(), cache.clone(), events.clone(), chrono::Duration::seconds(120)));
        let scope = RequestScope::unbounded();

        let key = store
            .create_agent_key(&scope, NewAgentKey { key: "K1".into(), display_name: "a1".into(), description: None, expires_at: None })
            .await
            .unwrap();
        let agent = store
            .create_agent(&scope, NewAgent { name: "a1".into(), ip_address: "10.0.0.1".into(), port: 9000, capabilities: String::new(), agent_key_id: key.id })
            .await
            .unwrap();
        let hash_file = store
            .create_hash_file(&scope, NewHashFile { name: "h".into(), orig_name: "h.txt".into(), size_bytes: 10, content_type: "text/plain".into() })
            .await
            .unwrap();
        let wordlist = store
            .create_wordlist(&scope, NewWordlist { name: "w".into(), orig_name: "w.txt".into(), size_bytes: 10, content_type: "text/plain".into(), word_count: None })
            .await
            .unwrap();

        let machine = JobMachine::new(store.clone(), cache, events, registry.clone());
        (store, registry, machine, agent.id, hash_file.id, wordlist.id)
    }

    #[tokio::test]
    async fn full_happy_path_pending_to_completed() {
        let (_store, _registry, machine, agent_id, hash_file_id, wordlist_id) = harness().await;
        let scope = RequestScope::unbounded();

        let job = machine
            .create_job(&scope, NewJob { name: "j1".into(), hash_type: 2500, attack_mode: 0, hash_file_id, wordlist_id, rules: None, agent_id: None })
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        let job = machine.assign(&scope, job.id, agent_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Assigned);
        assert_eq!(job.agent_id, Some(agent_id));

        let job = machine.start_job(&scope, job.id, agent_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());

        let job = machine.finish(&scope, job.id, JobStatus::Completed, Some("hunter2".into()), Some(12000), &[JobStatus::Running]).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.completed_at.is_some());

        let err = machine.finish(&scope, job.id, JobStatus::Completed, Some("again".into()), Some(12000), &[JobStatus::Running]).await.unwrap_err();
        assert_eq!(err.code(), "invalid_transition");
    }

    #[tokio::test]
    async fn start_rejects_wrong_agent() {
        let (store, _registry, machine, agent_id, hash_file_id, wordlist_id) = harness().await;
        let scope = RequestScope::unbounded();
        let key2 = store
            .create_agent_key(&scope, NewAgentKey { key: "K2".into(), display_name: "a2".into(), description: None, expires_at: None })
            .await
            .unwrap();
        let other_agent = store
            .create_agent(&scope, NewAgent { name: "a2".into(), ip_address: "10.0.0.2".into(), port: 9001, capabilities: String::new(), agent_key_id: key2.id })
            .await
            .unwrap();

        let job = machine
            .create_job(&scope, NewJob { name: "j1".into(), hash_type: 2500, attack_mode: 0, hash_file_id, wordlist_id, rules: None, agent_id: None })
            .await
            .unwrap();
        let job = machine.assign(&scope, job.id, agent_id).await.unwrap();
        let err = machine.start_job(&scope, job.id, other_agent.id).await.unwrap_err();
        assert_eq!(err.code(), "assignee_mismatch");
    }

    #[tokio::test]
    async fn pause_frees_busy_agent() {
        let (_store, registry, machine, agent_id, hash_file_id, wordlist_id) = harness().await;
        let scope = RequestScope::unbounded();
        let job = machine
            .create_job(&scope, NewJob { name: "j1".into(), hash_type: 2500, attack_mode: 0, hash_file_id, wordlist_id, rules: None, agent_id: None })
            .await
            .unwrap();
        let job = machine.assign(&scope, job.id, agent_id).await.unwrap();
        registry.set_status(&scope, agent_id, AgentStatus::Busy).await.unwrap();
        let job = machine.start_job(&scope, job.id, agent_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Running);

        machine.pause(&scope, job.id).await.unwrap();
        let agent = registry.get(&scope, agent_id).await.unwrap();
        assert_eq!(agent.status, AgentStatus::Online);
    }
}
