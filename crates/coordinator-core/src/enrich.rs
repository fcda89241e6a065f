//! Enrichment view (spec §4.8, component C8): a read-model that joins jobs
//! with the display names of the agent, wordlist and hash file they
//! reference, for presentation only. Never fails the caller — an unresolved
//! reference becomes an empty string rather than an error.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::cache::{keys, Cache};
use crate::entities::Job;
use crate::error::Result;
use crate::registry::AgentRegistry;
use crate::scope::RequestScope;
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct EnrichedJob {
    #[serde(flatten)]
    pub job: Job,
    pub agent_name: String,
    pub wordlist_name: String,
    pub hash_file_name: String,
}

pub struct EnrichmentView {
    store: Arc<dyn Store>,
    cache: Arc<Cache>,
    registry: Arc<AgentRegistry>,
}

impl EnrichmentView {
    pub fn new(store: Arc<dyn Store>, cache: Arc<Cache>, registry: Arc<AgentRegistry>) -> Self {
        Self { store, cache, registry }
    }

    async fn agent_name(&self, scope: &RequestScope, agent_id: Option<Uuid>) -> String {
        let Some(agent_id) = agent_id else { return String::new() };
        self.registry.get(scope, agent_id).await.map(|a| a.name).unwrap_or_default()
    }

    async fn wordlist_name(&self, scope: &RequestScope, wordlist_id: Uuid) -> String {
        let key = keys::entity("wordlist", wordlist_id);
        if let Some(orig_name) = self.cache.get::<String>(&key) {
            return orig_name;
        }
        match self.store.get_wordlist_by_id(scope, wordlist_id).await {
            Ok(wordlist) => {
                self.cache.put(key, &wordlist.orig_name, self.cache.ttls().entity);
                wordlist.orig_name
            }
            Err(_) => String::new(),
        }
    }

    async fn hash_file_name(&self, scope: &RequestScope, hash_file_id: Uuid) -> String {
        let key = keys::entity("hash_file", hash_file_id);
        if let Some(orig_name) = self.cache.get::<String>(&key) {
            return orig_name;
        }
        match self.store.get_hash_file_by_id(scope, hash_file_id).await {
            Ok(hash_file) => {
                self.cache.put(key, &hash_file.orig_name, self.cache.ttls().entity);
                hash_file.orig_name
            }
            Err(_) => String::new(),
        }
    }

    async fn enrich_one(&self, scope: &RequestScope, job: Job) -> EnrichedJob {
        let agent_name = self.agent_name(scope, job.agent_id).await;
        let wordlist_name = self.wordlist_name(scope, job.wordlist_id).await;
        let hash_file_name = self.hash_file_name(scope, job.hash_file_id).await;
        EnrichedJob { job, agent_name, wordlist_name, hash_file_name }
    }

    /// `EnrichJobs(jobs)` (spec §4.8). Honours cancellation between
    /// iterations so a large listing does not run past a caller's deadline,
    /// per the suspension-point rule in spec §5 — but never turns a lookup
    /// failure into an error for the caller.
    pub async fn enrich_jobs(&self, scope: &RequestScope, jobs: Vec<Job>) -> Result<Vec<EnrichedJob>> {
        let mut enriched = Vec::with_capacity(jobs.len());
        for job in jobs {
            scope.ensure_alive()?;
            enriched.push(self.enrich_one(scope, job).await);
        }
        Ok(enriched)
    }

    pub async fn enrich_job(&self, scope: &RequestScope, job: Job) -> EnrichedJob {
        self.enrich_one(scope, job).await
    }
}

/// `/cache/stats` payload (spec §4.8 and §6): monotonic since process start
/// except when an operator explicitly clears the cache.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsView {
    pub hits: u64,
    pub misses: u64,
    pub total_lookups: u64,
    pub hit_rate: f64,
    pub entries: usize,
    pub entries_by_kind: BTreeMap<String, usize>,
}

pub fn cache_stats_view(cache: &Cache) -> CacheStatsView {
    let stats = cache.stats();
    let hit_rate = if stats.total_lookups == 0 { 0.0 } else { stats.hits as f64 / stats.total_lookups as f64 };
    CacheStatsView {
        hits: stats.hits,
        misses: stats.misses,
        total_lookups: stats.total_lookups,
        hit_rate,
        entries: stats.entries,
        entries_by_kind: cache.entries_by_kind(),
    }
}
