//! Postgres-backed [`Store`]. Prepared statements are reused via `sqlx`'s
//! per-connection statement cache (set by `max_connections` on the pool in
//! `PgStore::connect`); that reuse is purely an implementation detail and is
//! not part of the `Store` contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::{
    Agent, AgentKey, AgentKeyStatus, AgentStatus, HashFile, Job, JobStatus, Wordlist,
};
use crate::error::{CoreError, Result};
use crate::scope::RequestScope;

use super::{
    AgentUpdate, JobUpdate, NewAgent, NewAgentKey, NewHashFile, NewJob, NewWordlist, Store,
};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|err| CoreError::Transient(err.to_string()))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_agent_key(&self, scope: &RequestScope, new_key: NewAgentKey) -> Result<AgentKey> {
        scope.ensure_alive()?;
        sqlx::query_as::<_, AgentKey>(
            "INSERT INTO agent_keys (id, key, display_name, description, status, created_at, expires_at, last_used_at, agent_id)
             VALUES ($1, $2, $3, $4, 'active', now(), $5, NULL, NULL)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&new_key.key)
        .bind(&new_key.display_name)
        .bind(&new_key.description)
        .bind(new_key.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn get_agent_key_by_key(&self, scope: &RequestScope, key: &str) -> Result<AgentKey> {
        scope.ensure_alive()?;
        sqlx::query_as::<_, AgentKey>("SELECT * FROM agent_keys WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::not_found("agent_key", key))
    }

    async fn get_all_agent_keys(&self, scope: &RequestScope) -> Result<Vec<AgentKey>> {
        scope.ensure_alive()?;
        sqlx::query_as::<_, AgentKey>("SELECT * FROM agent_keys ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn revoke_agent_key(&self, scope: &RequestScope, key: &str) -> Result<AgentKey> {
        scope.ensure_alive()?;
        sqlx::query_as::<_, AgentKey>(
            "UPDATE agent_keys SET status = 'revoked' WHERE key = $1 RETURNING *",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CoreError::not_found("agent_key", key))
    }

    async fn bind_agent_key(&self, scope: &RequestScope, key_id: Uuid, agent_id: Uuid) -> Result<()> {
        scope.ensure_alive()?;
        let result = sqlx::query("UPDATE agent_keys SET agent_id = $1 WHERE id = $2")
            .bind(agent_id)
            .bind(key_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("agent_key", key_id.to_string()));
        }
        Ok(())
    }

    async fn touch_agent_key_used(&self, scope: &RequestScope, key_id: Uuid, used_at: DateTime<Utc>) -> Result<()> {
        scope.ensure_alive()?;
        sqlx::query("UPDATE agent_keys SET last_used_at = $1 WHERE id = $2")
            .bind(used_at)
            .bind(key_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_agent(&self, scope: &RequestScope, new_agent: NewAgent) -> Result<Agent> {
        scope.ensure_alive()?;
        sqlx::query_as::<_, Agent>(
            "INSERT INTO agents (id, name, ip_address, port, status, capabilities, last_seen, agent_key_id, created_at, updated_at)
             VALUES ($1, $2, $3, $4, 'online', $5, now(), $6, now(), now())
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&new_agent.name)
        .bind(&new_agent.ip_address)
        .bind(new_agent.port)
        .bind(&new_agent.capabilities)
        .bind(new_agent.agent_key_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn get_agent_by_id(&self, scope: &RequestScope, id: Uuid) -> Result<Agent> {
        scope.ensure_alive()?;
        sqlx::query_as::<_, Agent>("SELECT * FROM agents WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::not_found("agent", id.to_string()))
    }

    async fn get_agent_by_name_ip(&self, scope: &RequestScope, name: &str, ip_address: &str) -> Result<Agent> {
        scope.ensure_alive()?;
        sqlx::query_as::<_, Agent>("SELECT * FROM agents WHERE name = $1 AND ip_address = $2")
            .bind(name)
            .bind(ip_address)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::not_found("agent", format!("{name}@{ip_address}")))
    }

    async fn get_all_agents(&self, scope: &RequestScope) -> Result<Vec<Agent>> {
        scope.ensure_alive()?;
        sqlx::query_as::<_, Agent>("SELECT * FROM agents ORDER BY last_seen DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn get_agents_by_status(&self, scope: &RequestScope, status: AgentStatus) -> Result<Vec<Agent>> {
        scope.ensure_alive()?;
        sqlx::query_as::<_, Agent>("SELECT * FROM agents WHERE status = $1 ORDER BY last_seen DESC")
            .bind(status)
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn update_agent(&self, scope: &RequestScope, id: Uuid, update: AgentUpdate) -> Result<Agent> {
        scope.ensure_alive()?;
        let current = self.get_agent_by_id(scope, id).await?;
        let port = update.port.unwrap_or(current.port);
        let capabilities = update.capabilities.unwrap_or(current.capabilities);
        let status = update.status.unwrap_or(current.status);
        let last_seen = update.last_seen.unwrap_or(current.last_seen);
        sqlx::query_as::<_, Agent>(
            "UPDATE agents SET port = $1, capabilities = $2, status = $3, last_seen = $4, updated_at = now()
             WHERE id = $5 RETURNING *",
        )
        .bind(port)
        .bind(capabilities)
        .bind(status)
        .bind(last_seen)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CoreError::not_found("agent", id.to_string()))
    }

    async fn delete_agent(&self, scope: &RequestScope, id: Uuid) -> Result<()> {
        scope.ensure_alive()?;
        let mut tx = self.pool.begin().await.map_err(CoreError::from)?;
        sqlx::query("UPDATE jobs SET agent_id = NULL WHERE agent_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE agent_keys SET agent_id = NULL WHERE agent_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM agents WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("agent", id.to_string()));
        }
        tx.commit().await.map_err(CoreError::from)?;
        Ok(())
    }

    async fn create_job(&self, scope: &RequestScope, new_job: NewJob) -> Result<Job> {
        scope.ensure_alive()?;
        self.get_hash_file_by_id(scope, new_job.hash_file_id)
            .await
            .map_err(|_| CoreError::invalid("invalid_reference", format!("hash_file {} does not exist", new_job.hash_file_id)))?;
        self.get_wordlist_by_id(scope, new_job.wordlist_id)
            .await
            .map_err(|_| CoreError::invalid("invalid_reference", format!("wordlist {} does not exist", new_job.wordlist_id)))?;
        if let Some(agent_id) = new_job.agent_id {
            self.get_agent_by_id(scope, agent_id)
                .await
                .map_err(|_| CoreError::invalid("invalid_reference", format!("agent {agent_id} does not exist")))?;
        }
        let status = if new_job.agent_id.is_some() { JobStatus::Assigned } else { JobStatus::Pending };
        sqlx::query_as::<_, Job>(
            "INSERT INTO jobs (id, name, status, hash_type, attack_mode, hash_file_id, wordlist_id, rules, agent_id, progress, speed, eta, result, created_at, updated_at, started_at, completed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0, 0, NULL, NULL, now(), now(), NULL, NULL)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&new_job.name)
        .bind(status)
        .bind(new_job.hash_type)
        .bind(new_job.attack_mode)
        .bind(new_job.hash_file_id)
        .bind(new_job.wordlist_id)
        .bind(&new_job.rules)
        .bind(new_job.agent_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn get_job_by_id(&self, scope: &RequestScope, id: Uuid) -> Result<Job> {
        scope.ensure_alive()?;
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::not_found("job", id.to_string()))
    }

    async fn get_all_jobs(&self, scope: &RequestScope) -> Result<Vec<Job>> {
        scope.ensure_alive()?;
        sqlx::query_as::<_, Job>("SELECT * FROM jobs ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn get_jobs_by_status(&self, scope: &RequestScope, status: JobStatus) -> Result<Vec<Job>> {
        scope.ensure_alive()?;
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE status = $1 ORDER BY created_at ASC")
            .bind(status)
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn get_jobs_by_agent_id(&self, scope: &RequestScope, agent_id: Uuid) -> Result<Vec<Job>> {
        scope.ensure_alive()?;
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE agent_id = $1 ORDER BY created_at ASC")
            .bind(agent_id)
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn get_available_job_for_agent(&self, scope: &RequestScope, agent_id: Uuid) -> Result<Job> {
        scope.ensure_alive()?;
        sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE status = 'pending' AND agent_id = $1
             ORDER BY created_at ASC, id ASC LIMIT 1",
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CoreError::not_found("job", format!("pending for agent {agent_id}")))
    }

    async fn get_next_job_for_agent(&self, scope: &RequestScope, agent_id: Uuid) -> Result<Job> {
        scope.ensure_alive()?;
        sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE status IN ('pending', 'assigned') AND agent_id = $1
             ORDER BY created_at ASC, id ASC LIMIT 1",
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CoreError::not_found("job", format!("next for agent {agent_id}")))
    }

    async fn update_job(&self, scope: &RequestScope, id: Uuid, update: JobUpdate) -> Result<Job> {
        scope.ensure_alive()?;
        let current = self.get_job_by_id(scope, id).await?;
        let status = update.status.unwrap_or(current.status);
        let agent_id = update.agent_id.unwrap_or(current.agent_id);
        let progress = update.progress.unwrap_or(current.progress);
        let speed = update.speed.unwrap_or(current.speed);
        let eta = update.eta.unwrap_or(current.eta);
        let result = update.result.unwrap_or(current.result);
        let started_at = update.started_at.unwrap_or(current.started_at);
        let completed_at = update.completed_at.unwrap_or(current.completed_at);
        sqlx::query_as::<_, Job>(
            "UPDATE jobs SET status = $1, agent_id = $2, progress = $3, speed = $4, eta = $5,
             result = $6, started_at = $7, completed_at = $8, updated_at = now()
             WHERE id = $9 RETURNING *",
        )
        .bind(status)
        .bind(agent_id)
        .bind(progress)
        .bind(speed)
        .bind(eta)
        .bind(result)
        .bind(started_at)
        .bind(completed_at)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CoreError::not_found("job", id.to_string()))
    }

    async fn update_job_progress(
        &self,
        scope: &RequestScope,
        id: Uuid,
        progress: i32,
        speed: i64,
        eta: Option<DateTime<Utc>>,
    ) -> Result<Job> {
        scope.ensure_alive()?;
        sqlx::query_as::<_, Job>(
            "UPDATE jobs SET progress = $1, speed = $2, eta = $3, updated_at = now()
             WHERE id = $4 RETURNING *",
        )
        .bind(progress)
        .bind(speed)
        .bind(eta)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CoreError::not_found("job", id.to_string()))
    }

    async fn create_hash_file(&self, scope: &RequestScope, new_file: NewHashFile) -> Result<HashFile> {
        scope.ensure_alive()?;
        sqlx::query_as::<_, HashFile>(
            "INSERT INTO hash_files (id, name, orig_name, size_bytes, content_type, created_at)
             VALUES ($1, $2, $3, $4, $5, now()) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&new_file.name)
        .bind(&new_file.orig_name)
        .bind(new_file.size_bytes)
        .bind(&new_file.content_type)
        .fetch_one(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn get_hash_file_by_id(&self, scope: &RequestScope, id: Uuid) -> Result<HashFile> {
        scope.ensure_alive()?;
        sqlx::query_as::<_, HashFile>("SELECT * FROM hash_files WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::not_found("hash_file", id.to_string()))
    }

    async fn get_hash_file_by_orig_name(&self, scope: &RequestScope, orig_name: &str) -> Result<HashFile> {
        scope.ensure_alive()?;
        sqlx::query_as::<_, HashFile>("SELECT * FROM hash_files WHERE orig_name = $1")
            .bind(orig_name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::not_found("hash_file", orig_name))
    }

    async fn get_all_hash_files(&self, scope: &RequestScope) -> Result<Vec<HashFile>> {
        scope.ensure_alive()?;
        sqlx::query_as::<_, HashFile>("SELECT * FROM hash_files ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn create_wordlist(&self, scope: &RequestScope, new_wordlist: NewWordlist) -> Result<Wordlist> {
        scope.ensure_alive()?;
        sqlx::query_as::<_, Wordlist>(
            "INSERT INTO wordlists (id, name, orig_name, size_bytes, content_type, word_count, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, now()) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&new_wordlist.name)
        .bind(&new_wordlist.orig_name)
        .bind(new_wordlist.size_bytes)
        .bind(&new_wordlist.content_type)
        .bind(new_wordlist.word_count)
        .fetch_one(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn get_wordlist_by_id(&self, scope: &RequestScope, id: Uuid) -> Result<Wordlist> {
        scope.ensure_alive()?;
        sqlx::query_as::<_, Wordlist>("SELECT * FROM wordlists WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::not_found("wordlist", id.to_string()))
    }

    async fn get_wordlist_by_orig_name(&self, scope: &RequestScope, orig_name: &str) -> Result<Wordlist> {
        scope.ensure_alive()?;
        sqlx::query_as::<_, Wordlist>("SELECT * FROM wordlists WHERE orig_name = $1")
            .bind(orig_name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::not_found("wordlist", orig_name))
    }

    async fn get_all_wordlists(&self, scope: &RequestScope) -> Result<Vec<Wordlist>> {
        scope.ensure_alive()?;
        sqlx::query_as::<_, Wordlist>("SELECT * FROM wordlists ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into)
    }
}

