//! Top-level facade (spec §2 "Ownership", §4.3 `DeleteAgent`): wires the
//! store, cache, event bus and every subsystem together, and owns the
//! handful of operations that legitimately need more than one subsystem at
//! once — cascading agent deletion and the two background tasks.

use std::sync::Arc;

use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::cache::Cache;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::entities::JobStatus;
use crate::enrich::EnrichmentView;
use crate::error::Result;
use crate::events::EventBus;
use crate::jobs::JobMachine;
use crate::progress::ProgressIngestor;
use crate::registry::AgentRegistry;
use crate::scope::RequestScope;
use crate::store::Store;
use crate::sweeper::LivenessSweeper;

pub struct Coordinator {
    pub registry: Arc<AgentRegistry>,
    pub jobs: Arc<JobMachine>,
    pub dispatcher: Arc<Dispatcher>,
    pub progress: Arc<ProgressIngestor>,
    pub enrichment: Arc<EnrichmentView>,
    pub events: Arc<EventBus>,
    pub cache: Arc<Cache>,
    store: Arc<dyn Store>,
    sweeper: Arc<LivenessSweeper>,
    cache_sweep_cadence: std::time::Duration,
}

impl Coordinator {
    pub fn new(store: Arc<dyn Store>, config: &Config) -> Self {
        let ttls = config.cache.to_ttls();
        let cache = Arc::new(Cache::new(ttls));
        let events = Arc::new(EventBus::new(config.cache.max_subscriber_buffer));
        let registry = Arc::new(AgentRegistry::new(store.clone(), cache.clone(), events.clone(), config.dispatch.liveness_window()));
        let jobs = Arc::new(JobMachine::new(store.clone(), cache.clone(), events.clone(), registry.clone()));
        let dispatcher = Arc::new(Dispatcher::new(jobs.clone()));
        let progress = Arc::new(ProgressIngestor::new(jobs.clone()));
        let enrichment = Arc::new(EnrichmentView::new(store.clone(), cache.clone(), registry.clone()));
        let sweeper = Arc::new(LivenessSweeper::new(registry.clone(), jobs.clone()));
        let smallest_ttl = ttls.agent.min(ttls.entity).min(ttls.job);

        Self {
            registry,
            jobs,
            dispatcher,
            progress,
            enrichment,
            events,
            cache,
            store,
            sweeper,
            cache_sweep_cadence: smallest_ttl / 2,
        }
    }

    /// `DeleteAgent(agent_id)` (spec §4.3): any `running` job the agent
    /// owns is failed with reason `agent_removed` before the row itself is
    /// removed, so that after this call returns, no job anywhere still
    /// references the deleted agent in a non-terminal state (spec §8
    /// invariant "After Delete(agent), no job anywhere references that
    /// agent's id").
    pub async fn delete_agent(&self, scope: &RequestScope, agent_id: Uuid) -> Result<()> {
        let owned = self.store.get_jobs_by_agent_id(scope, agent_id).await?;
        for job in owned.into_iter().filter(|j| j.status == JobStatus::Running) {
            self.jobs
                .finish(scope, job.id, JobStatus::Failed, Some("agent_removed".into()), None, &[JobStatus::Running])
                .await?;
        }
        self.registry.delete(scope, agent_id).await
    }

    /// Starts the liveness sweeper (`W/4`) and the cache expiry sweep
    /// (smallest configured TTL / 2). Both log and continue on a failed
    /// pass; neither ever exits while the process is alive.
    pub fn spawn_background_tasks(&self) -> Vec<JoinHandle<()>> {
        let cache = self.cache.clone();
        let cadence = self.cache_sweep_cadence.max(std::time::Duration::from_secs(1));
        let cache_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cadence);
            loop {
                ticker.tick().await;
                cache.sweep_expired();
            }
        });
        vec![self.sweeper.clone().spawn(), cache_task]
    }
}
