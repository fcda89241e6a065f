//! Persistent store gateway (spec §4.1, component C1).
//!
//! `Store` is a capability set keyed per entity — Create/Read/Update/Delete
//! plus the secondary queries the dispatch core actually needs — rather than
//! a generic repository abstraction, per the REDESIGN FLAGS in spec §9.
//! Prepared-statement reuse is an implementation detail of `postgres::PgStore`
//! and is not part of this contract.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::entities::{Agent, AgentKey, AgentStatus, HashFile, Job, JobStatus, Wordlist};
use crate::error::Result;
use crate::scope::RequestScope;

#[derive(Debug, Clone)]
pub struct NewAgentKey {
    pub key: String,
    pub display_name: String,
    pub description: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewAgent {
    pub name: String,
    pub ip_address: String,
    pub port: i32,
    pub capabilities: String,
    pub agent_key_id: Uuid,
}

#[derive(Debug, Clone, Default)]
pub struct AgentUpdate {
    pub port: Option<i32>,
    pub capabilities: Option<String>,
    pub status: Option<AgentStatus>,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub name: String,
    pub hash_type: i32,
    pub attack_mode: i32,
    pub hash_file_id: Uuid,
    pub wordlist_id: Uuid,
    pub rules: Option<String>,
    pub agent_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub agent_id: Option<Option<Uuid>>,
    pub progress: Option<i32>,
    pub speed: Option<i64>,
    pub eta: Option<Option<DateTime<Utc>>>,
    pub result: Option<Option<String>>,
    pub started_at: Option<Option<DateTime<Utc>>>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone)]
pub struct NewHashFile {
    pub name: String,
    pub orig_name: String,
    pub size_bytes: i64,
    pub content_type: String,
}

#[derive(Debug, Clone)]
pub struct NewWordlist {
    pub name: String,
    pub orig_name: String,
    pub size_bytes: i64,
    pub content_type: String,
    pub word_count: Option<i64>,
}

/// The store gateway contract. All operations take a cancellation-bearing
/// [`RequestScope`]. Implementations must classify driver errors into
/// [`crate::error::CoreError`] kinds rather than leak them.
#[async_trait]
pub trait Store: Send + Sync {
    // -- agent keys --
    async fn create_agent_key(&self, scope: &RequestScope, new_key: NewAgentKey) -> Result<AgentKey>;
    async fn get_agent_key_by_key(&self, scope: &RequestScope, key: &str) -> Result<AgentKey>;
    async fn get_all_agent_keys(&self, scope: &RequestScope) -> Result<Vec<AgentKey>>;
    async fn revoke_agent_key(&self, scope: &RequestScope, key: &str) -> Result<AgentKey>;
    async fn bind_agent_key(&self, scope: &RequestScope, key_id: Uuid, agent_id: Uuid) -> Result<()>;
    async fn touch_agent_key_used(&self, scope: &RequestScope, key_id: Uuid, used_at: DateTime<Utc>) -> Result<()>;

    // -- agents --
    async fn create_agent(&self, scope: &RequestScope, new_agent: NewAgent) -> Result<Agent>;
    async fn get_agent_by_id(&self, scope: &RequestScope, id: Uuid) -> Result<Agent>;
    async fn get_agent_by_name_ip(&self, scope: &RequestScope, name: &str, ip_address: &str) -> Result<Agent>;
    async fn get_all_agents(&self, scope: &RequestScope) -> Result<Vec<Agent>>;
    async fn get_agents_by_status(&self, scope: &RequestScope, status: AgentStatus) -> Result<Vec<Agent>>;
    async fn update_agent(&self, scope: &RequestScope, id: Uuid, update: AgentUpdate) -> Result<Agent>;
    async fn delete_agent(&self, scope: &RequestScope, id: Uuid) -> Result<()>;

    // -- jobs --
    async fn create_job(&self, scope: &RequestScope, new_job: NewJob) -> Result<Job>;
    async fn get_job_by_id(&self, scope: &RequestScope, id: Uuid) -> Result<Job>;
    async fn get_all_jobs(&self, scope: &RequestScope) -> Result<Vec<Job>>;
    async fn get_jobs_by_status(&self, scope: &RequestScope, status: JobStatus) -> Result<Vec<Job>>;
    async fn get_jobs_by_agent_id(&self, scope: &RequestScope, agent_id: Uuid) -> Result<Vec<Job>>;
    /// Oldest `pending` job bound to `agent_id` (spec §4.1
    /// `GetAvailableJobForAgent`), ordered `(created_at asc, id asc)`.
    async fn get_available_job_for_agent(&self, scope: &RequestScope, agent_id: Uuid) -> Result<Job>;
    /// Oldest `pending` or `assigned` job bound to `agent_id` (spec §4.5(b)
    /// pull), ordered `(created_at asc, id asc)`.
    async fn get_next_job_for_agent(&self, scope: &RequestScope, agent_id: Uuid) -> Result<Job>;
    async fn update_job(&self, scope: &RequestScope, id: Uuid, update: JobUpdate) -> Result<Job>;
    /// Single atomic write of progress/speed/eta, serialised per job at the
    /// row-lock level (spec §4.1).
    async fn update_job_progress(
        &self,
        scope: &RequestScope,
        id: Uuid,
        progress: i32,
        speed: i64,
        eta: Option<DateTime<Utc>>,
    ) -> Result<Job>;

    // -- hash files / wordlists --
    async fn create_hash_file(&self, scope: &RequestScope, new_file: NewHashFile) -> Result<HashFile>;
    async fn get_hash_file_by_id(&self, scope: &RequestScope, id: Uuid) -> Result<HashFile>;
    async fn get_hash_file_by_orig_name(&self, scope: &RequestScope, orig_name: &str) -> Result<HashFile>;
    async fn get_all_hash_files(&self, scope: &RequestScope) -> Result<Vec<HashFile>>;

    async fn create_wordlist(&self, scope: &RequestScope, new_wordlist: NewWordlist) -> Result<Wordlist>;
    async fn get_wordlist_by_id(&self, scope: &RequestScope, id: Uuid) -> Result<Wordlist>;
    async fn get_wordlist_by_orig_name(&self, scope: &RequestScope, orig_name: &str) -> Result<Wordlist>;
    async fn get_all_wordlists(&self, scope: &RequestScope) -> Result<Vec<Wordlist>>;
}
