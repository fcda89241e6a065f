//! An in-process [`Store`] used by the dispatch-core test suite, grounded in
//! the same trait-substitution pattern `noa_ui_api::server` uses for its
//! `DropRegistry` (a `HashMap` guarded by a lock, standing in for the real
//! collaborator so tests don't need a live Postgres).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::entities::{
    Agent, AgentKey, AgentKeyStatus, AgentStatus, HashFile, Job, JobStatus, Wordlist,
};
use crate::error::{CoreError, Result};
use crate::scope::RequestScope;

use super::{
    AgentUpdate, JobUpdate, NewAgent, NewAgentKey, NewHashFile, NewJob, NewWordlist, Store,
};

#[derive(Default)]
struct Tables {
    agent_keys: HashMap<Uuid, AgentKey>,
    agents: HashMap<Uuid, Agent>,
    jobs: HashMap<Uuid, Job>,
    hash_files: HashMap<Uuid, HashFile>,
    wordlists: HashMap<Uuid, Wordlist>,
}

pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self { tables: RwLock::new(Tables::default()) }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_agent_key(&self, _scope: &RequestScope, new_key: NewAgentKey) -> Result<AgentKey> {
        let mut tables = self.tables.write();
        if tables.agent_keys.values().any(|k| k.key == new_key.key) {
            return Err(CoreError::duplicate("agent_key", new_key.key));
        }
        let now = Utc::now();
        let key = AgentKey {
            id: Uuid::new_v4(),
            key: new_key.key,
            display_name: new_key.display_name,
            description: new_key.description,
            status: AgentKeyStatus::Active,
            created_at: now,
            expires_at: new_key.expires_at,
            last_used_at: None,
            agent_id: None,
        };
        tables.agent_keys.insert(key.id, key.clone());
        Ok(key)
    }

    async fn get_agent_key_by_key(&self, _scope: &RequestScope, key: &str) -> Result<AgentKey> {
        self.tables
            .read()
            .agent_keys
            .values()
            .find(|k| k.key == key)
            .cloned()
            .ok_or_else(|| CoreError::not_found("agent_key", key))
    }

    async fn get_all_agent_keys(&self, _scope: &RequestScope) -> Result<Vec<AgentKey>> {
        Ok(self.tables.read().agent_keys.values().cloned().collect())
    }

    async fn revoke_agent_key(&self, _scope: &RequestScope, key: &str) -> Result<AgentKey> {
        let mut tables = self.tables.write();
        let entry = tables
            .agent_keys
            .values_mut()
            .find(|k| k.key == key)
            .ok_or_else(|| CoreError::not_found("agent_key", key))?;
        entry.status = AgentKeyStatus::Revoked;
        Ok(entry.clone())
    }

    async fn bind_agent_key(&self, _scope: &RequestScope, key_id: Uuid, agent_id: Uuid) -> Result<()> {
        let mut tables = self.tables.write();
        let entry = tables
            .agent_keys
            .get_mut(&key_id)
            .ok_or_else(|| CoreError::not_found("agent_key", key_id.to_string()))?;
        entry.agent_id = Some(agent_id);
        Ok(())
    }

    async fn touch_agent_key_used(&self, _scope: &RequestScope, key_id: Uuid, used_at: DateTime<Utc>) -> Result<()> {
        let mut tables = self.tables.write();
        let entry = tables
            .agent_keys
            .get_mut(&key_id)
            .ok_or_else(|| CoreError::not_found("agent_key", key_id.to_string()))?;
        entry.last_used_at = Some(used_at);
        Ok(())
    }

    async fn create_agent(&self, _scope: &RequestScope, new_agent: NewAgent) -> Result<Agent> {
        let mut tables = self.tables.write();
        if tables
            .agents
            .values()
            .any(|a| a.name == new_agent.name && a.ip_address == new_agent.ip_address)
        {
            return Err(CoreError::duplicate("agent", format!("{}@{}", new_agent.name, new_agent.ip_address)));
        }
        let now = Utc::now();
        let agent = Agent {
            id: Uuid::new_v4(),
            name: new_agent.name,
            ip_address: new_agent.ip_address,
            port: new_agent.port,
            status: AgentStatus::Online,
            capabilities: new_agent.capabilities,
            last_seen: now,
            agent_key_id: Some(new_agent.agent_key_id),
            created_at: now,
            updated_at: now,
        };
        tables.agents.insert(agent.id, agent.clone());
        Ok(agent)
    }

    async fn get_agent_by_id(&self, _scope: &RequestScope, id: Uuid) -> Result<Agent> {
        self.tables
            .read()
            .agents
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("agent", id.to_string()))
    }

    async fn get_agent_by_name_ip(&self, _scope: &RequestScope, name: &str, ip_address: &str) -> Result<Agent> {
        self.tables
            .read()
            .agents
            .values()
            .find(|a| a.name == name && a.ip_address == ip_address)
            .cloned()
            .ok_or_else(|| CoreError::not_found("agent", format!("{name}@{ip_address}")))
    }

    async fn get_all_agents(&self, _scope: &RequestScope) -> Result<Vec<Agent>> {
        Ok(self.tables.read().agents.values().cloned().collect())
    }

    async fn get_agents_by_status(&self, _scope: &RequestScope, status: AgentStatus) -> Result<Vec<Agent>> {
        Ok(self
            .tables
            .read()
            .agents
            .values()
            .filter(|a| a.status == status)
            .cloned()
            .collect())
    }

    async fn update_agent(&self, _scope: &RequestScope, id: Uuid, update: AgentUpdate) -> Result<Agent> {
        let mut tables = self.tables.write();
        let agent = tables
            .agents
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found("agent", id.to_string()))?;
        if let Some(port) = update.port {
            agent.port = port;
        }
        if let Some(capabilities) = update.capabilities {
            agent.capabilities = capabilities;
        }
        if let Some(status) = update.status {
            agent.status = status;
        }
        if let Some(last_seen) = update.last_seen {
            agent.last_seen = last_seen;
        }
        agent.updated_at = Utc::now();
        Ok(agent.clone())
    }

    async fn delete_agent(&self, _scope: &RequestScope, id: Uuid) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.agents.remove(&id).is_none() {
            return Err(CoreError::not_found("agent", id.to_string()));
        }
        for key in tables.agent_keys.values_mut() {
            if key.agent_id == Some(id) {
                key.agent_id = None;
            }
        }
        for job in tables.jobs.values_mut() {
            if job.agent_id == Some(id) {
                job.agent_id = None;
            }
        }
        Ok(())
    }

    async fn create_job(&self, _scope: &RequestScope, new_job: NewJob) -> Result<Job> {
        let mut tables = self.tables.write();
        if !tables.hash_files.contains_key(&new_job.hash_file_id) {
            return Err(CoreError::invalid("invalid_reference", format!("hash_file {} does not exist", new_job.hash_file_id)));
        }
        if !tables.wordlists.contains_key(&new_job.wordlist_id) {
            return Err(CoreError::invalid("invalid_reference", format!("wordlist {} does not exist", new_job.wordlist_id)));
        }
        if let Some(agent_id) = new_job.agent_id {
            if !tables.agents.contains_key(&agent_id) {
                return Err(CoreError::invalid("invalid_reference", format!("agent {agent_id} does not exist")));
            }
        }
        let now = Utc::now();
        let status = if new_job.agent_id.is_some() { JobStatus::Assigned } else { JobStatus::Pending };
        let job = Job {
            id: Uuid::new_v4(),
            name: new_job.name,
            status,
            hash_type: new_job.hash_type,
            attack_mode: new_job.attack_mode,
            hash_file_id: new_job.hash_file_id,
            wordlist_id: new_job.wordlist_id,
            rules: new_job.rules,
            agent_id: new_job.agent_id,
            progress: 0,
            speed: 0,
            eta: None,
            result: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        };
        tables.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job_by_id(&self, _scope: &RequestScope, id: Uuid) -> Result<Job> {
        self.tables
            .read()
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("job", id.to_string()))
    }

    async fn get_all_jobs(&self, _scope: &RequestScope) -> Result<Vec<Job>> {
        Ok(self.tables.read().jobs.values().cloned().collect())
    }

    async fn get_jobs_by_status(&self, _scope: &RequestScope, status: JobStatus) -> Result<Vec<Job>> {
        Ok(self.tables.read().jobs.values().filter(|j| j.status == status).cloned().collect())
    }

    async fn get_jobs_by_agent_id(&self, _scope: &RequestScope, agent_id: Uuid) -> Result<Vec<Job>> {
        Ok(self
            .tables
            .read()
            .jobs
            .values()
            .filter(|j| j.agent_id == Some(agent_id))
            .cloned()
            .collect())
    }

    async fn get_available_job_for_agent(&self, _scope: &RequestScope, agent_id: Uuid) -> Result<Job> {
        self.tables
            .read()
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending && j.agent_id == Some(agent_id))
            .min_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)))
            .cloned()
            .ok_or_else(|| CoreError::not_found("job", format!("pending for agent {agent_id}")))
    }

    async fn get_next_job_for_agent(&self, _scope: &RequestScope, agent_id: Uuid) -> Result<Job> {
        self.tables
            .read()
            .jobs
            .values()
            .filter(|j| {
                matches!(j.status, JobStatus::Pending | JobStatus::Assigned) && j.agent_id == Some(agent_id)
            })
            .min_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)))
            .cloned()
            .ok_or_else(|| CoreError::not_found("job", format!("next for agent {agent_id}")))
    }

    async fn update_job(&self, _scope: &RequestScope, id: Uuid, update: JobUpdate) -> Result<Job> {
        let mut tables = self.tables.write();
        let job = tables.jobs.get_mut(&id).ok_or_else(|| CoreError::not_found("job", id.to_string()))?;
        if let Some(status) = update.status {
            job.status = status;
        }
        if let Some(agent_id) = update.agent_id {
            job.agent_id = agent_id;
        }
        if let Some(progress) = update.progress {
            job.progress = progress;
        }
        if let Some(speed) = update.speed {
            job.speed = speed;
        }
        if let Some(eta) = update.eta {
            job.eta = eta;
        }
        if let Some(result) = update.result {
            job.result = result;
        }
        if let Some(started_at) = update.started_at {
            job.started_at = started_at;
        }
        if let Some(completed_at) = update.completed_at {
            job.completed_at = completed_at;
        }
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn update_job_progress(
        &self,
        _scope: &RequestScope,
        id: Uuid,
        progress: i32,
        speed: i64,
        eta: Option<DateTime<Utc>>,
    ) -> Result<Job> {
        let mut tables = self.tables.write();
        let job = tables.jobs.get_mut(&id).ok_or_else(|| CoreError::not_found("job", id.to_string()))?;
        job.progress = progress;
        job.speed = speed;
        job.eta = eta;
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn create_hash_file(&self, _scope: &RequestScope, new_file: NewHashFile) -> Result<HashFile> {
        let mut tables = self.tables.write();
        if tables.hash_files.values().any(|f| f.orig_name == new_file.orig_name) {
            return Err(CoreError::duplicate("hash_file", new_file.orig_name));
        }
        let file = HashFile {
            id: Uuid::new_v4(),
            name: new_file.name,
            orig_name: new_file.orig_name,
            size_bytes: new_file.size_bytes,
            content_type: new_file.content_type,
            created_at: Utc::now(),
        };
        tables.hash_files.insert(file.id, file.clone());
        Ok(file)
    }

    async fn get_hash_file_by_id(&self, _scope: &RequestScope, id: Uuid) -> Result<HashFile> {
        self.tables
            .read()
            .hash_files
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("hash_file", id.to_string()))
    }

    async fn get_hash_file_by_orig_name(&self, _scope: &RequestScope, orig_name: &str) -> Result<HashFile> {
        self.tables
            .read()
            .hash_files
            .values()
            .find(|f| f.orig_name == orig_name)
            .cloned()
            .ok_or_else(|| CoreError::not_found("hash_file", orig_name.to_string()))
    }

    async fn get_all_hash_files(&self, _scope: &RequestScope) -> Result<Vec<HashFile>> {
        Ok(self.tables.read().hash_files.values().cloned().collect())
    }

    async fn create_wordlist(&self, _scope: &RequestScope, new_wordlist: NewWordlist) -> Result<Wordlist> {
        let mut tables = self.tables.write();
        if tables.wordlists.values().any(|w| w.orig_name == new_wordlist.orig_name) {
            return Err(CoreError::duplicate("wordlist", new_wordlist.orig_name));
        }
        let wordlist = Wordlist {
            id: Uuid::new_v4(),
            name: new_wordlist.name,
            orig_name: new_wordlist.orig_name,
            size_bytes: new_wordlist.size_bytes,
            content_type: new_wordlist.content_type,
            word_count: new_wordlist.word_count,
            created_at: Utc::now(),
        };
        tables.wordlists.insert(wordlist.id, wordlist.clone());
        Ok(wordlist)
    }

    async fn get_wordlist_by_id(&self, _scope: &RequestScope, id: Uuid) -> Result<Wordlist> {
        self.tables
            .read()
            .wordlists
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("wordlist", id.to_string()))
    }

    async fn get_wordlist_by_orig_name(&self, _scope: &RequestScope, orig_name: &str) -> Result<Wordlist> {
        self.tables
            .read()
            .wordlists
            .values()
            .find(|w| w.orig_name == orig_name)
            .cloned()
            .ok_or_else(|| CoreError::not_found("wordlist", orig_name.to_string()))
    }

    async fn get_all_wordlists(&self, _scope: &RequestScope) -> Result<Vec<Wordlist>> {
        Ok(self.tables.read().wordlists.values().cloned().collect())
    }
}
