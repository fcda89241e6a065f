//! End-to-end scenarios from spec §8, driven directly against the
//! `Coordinator` facade rather than through HTTP (the transport is
//! `coordinator-api`'s concern; these tests exercise the dispatch core on
//! its own).

use std::sync::Arc;

use chrono::Utc;
use coordinator_core::config::{Config, ConfigOverrides};
use coordinator_core::entities::{AgentStatus, JobStatus};
use coordinator_core::events::Topic;
use coordinator_core::store::memory::MemoryStore;
use coordinator_core::store::{AgentUpdate, NewHashFile, NewJob, NewWordlist, Store};
use coordinator_core::{Coordinator, RequestScope};

fn test_config() -> Config {
    coordinator_core::config::load(ConfigOverrides::default()).expect("embedded default config loads")
}

async fn seed_assets(store: &Arc<dyn Store>, scope: &RequestScope) -> (uuid::Uuid, uuid::Uuid) {
    let hash_file = store
        .create_hash_file(scope, NewHashFile { name: "target".into(), orig_name: "target.hash".into(), size_bytes: 64, content_type: "text/plain".into() })
        .await
        .unwrap();
    let wordlist = store
        .create_wordlist(scope, NewWordlist { name: "rockyou".into(), orig_name: "rockyou.txt".into(), size_bytes: 139921497, content_type: "text/plain".into(), word_count: Some(14344392) })
        .await
        .unwrap();
    (hash_file.id, wordlist.id)
}

#[tokio::test]
async fn scenario_1_register_then_pull() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let coordinator = Coordinator::new(store.clone(), &test_config());
    let scope = RequestScope::unbounded();
    let (hash_file_id, wordlist_id) = seed_assets(&store, &scope).await;

    let minted = coordinator.registry.generate_key(&scope, "a1", None, None).await.unwrap();
    let a1 = coordinator.registry.register_agent(&scope, &minted.key, "a1", "10.0.0.1", 9000, "").await.unwrap();
    assert_eq!(a1.status, AgentStatus::Online);

    let job = coordinator
        .jobs
        .create_job(&scope, NewJob { name: "j1".into(), hash_type: 2500, attack_mode: 0, hash_file_id, wordlist_id, rules: None, agent_id: None })
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Pending);

    let assigned = coordinator.dispatcher.assign_jobs_to_agents(&scope).await.unwrap();
    assert_eq!(assigned.len(), 1);
    assert_eq!(assigned[0].agent_id, Some(a1.id));
    let a1_after_assign = coordinator.registry.get(&scope, a1.id).await.unwrap();
    assert_eq!(a1_after_assign.status, AgentStatus::Busy);

    let pulled = coordinator.dispatcher.get_next_job_for_agent(&scope, a1.id).await.unwrap();
    assert_eq!(pulled.id, job.id);
    assert_eq!(pulled.status, JobStatus::Assigned);

    let started = coordinator.jobs.start_job(&scope, job.id, a1.id).await.unwrap();
    assert_eq!(started.status, JobStatus::Running);
}

#[tokio::test]
async fn scenario_2_monotone_progress_then_complete() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let coordinator = Coordinator::new(store.clone(), &test_config());
    let scope = RequestScope::unbounded();
    let (hash_file_id, wordlist_id) = seed_assets(&store, &scope).await;

    let minted = coordinator.registry.generate_key(&scope, "a1", None, None).await.unwrap();
    let a1 = coordinator.registry.register_agent(&scope, &minted.key, "a1", "10.0.0.1", 9000, "").await.unwrap();
    let job = coordinator
        .jobs
        .create_job(&scope, NewJob { name: "j1".into(), hash_type: 2500, attack_mode: 0, hash_file_id, wordlist_id, rules: None, agent_id: None })
        .await
        .unwrap();
    coordinator.jobs.assign(&scope, job.id, a1.id).await.unwrap();
    coordinator.jobs.start_job(&scope, job.id, a1.id).await.unwrap();

    coordinator.progress.update_progress(&scope, job.id, 10, 1000, None).await.unwrap();
    let rejected = coordinator.progress.update_progress(&scope, job.id, 5, 1000, None).await.unwrap_err();
    assert_eq!(rejected.code(), "non_monotone_progress");
    coordinator.progress.update_progress(&scope, job.id, 50, 1000, None).await.unwrap();

    coordinator.progress.complete_job(&scope, job.id, "Password found: hunter2".into(), 1000).await.unwrap();

    let a1_after = coordinator.registry.get(&scope, a1.id).await.unwrap();
    assert_eq!(a1_after.status, AgentStatus::Online);
}

#[tokio::test]
async fn scenario_3_agent_timeout_fails_running_job() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let coordinator = Coordinator::new(store.clone(), &test_config());
    let scope = RequestScope::unbounded();
    let (hash_file_id, wordlist_id) = seed_assets(&store, &scope).await;

    let minted = coordinator.registry.generate_key(&scope, "a1", None, None).await.unwrap();
    let a1 = coordinator.registry.register_agent(&scope, &minted.key, "a1", "10.0.0.1", 9000, "").await.unwrap();
    let job = coordinator
        .jobs
        .create_job(&scope, NewJob { name: "j2".into(), hash_type: 2500, attack_mode: 0, hash_file_id, wordlist_id, rules: None, agent_id: None })
        .await
        .unwrap();
    coordinator.jobs.assign(&scope, job.id, a1.id).await.unwrap();
    coordinator.jobs.start_job(&scope, job.id, a1.id).await.unwrap();

    let mut agent_status_rx = coordinator.events.subscribe(Topic::AgentStatus);
    let mut job_status_rx = coordinator.events.subscribe(Topic::JobStatus);

    store
        .update_agent(&scope, a1.id, AgentUpdate { last_seen: Some(Utc::now() - chrono::Duration::seconds(121)), ..Default::default() })
        .await
        .unwrap();

    let sweeper = coordinator_core::sweeper::LivenessSweeper::new(coordinator.registry.clone(), coordinator.jobs.clone());
    let swept = sweeper.sweep_once().await.unwrap();
    assert_eq!(swept, 1);

    let a1_after = coordinator.registry.get(&scope, a1.id).await.unwrap();
    assert_eq!(a1_after.status, AgentStatus::Offline);
    let job_after = coordinator.jobs.get(&scope, job.id).await.unwrap();
    assert_eq!(job_after.status, JobStatus::Failed);
    assert_eq!(job_after.result.as_deref(), Some("agent_timeout"));

    let agent_event = agent_status_rx.try_recv().unwrap();
    assert_eq!(agent_event.data["status"], "offline");
    let job_event = job_status_rx.try_recv().unwrap();
    assert_eq!(job_event.data["status"], "failed");
}

#[tokio::test]
async fn scenario_4_duplicate_registration_conflicts() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let coordinator = Coordinator::new(store.clone(), &test_config());
    let scope = RequestScope::unbounded();

    let key_a = coordinator.registry.generate_key(&scope, "a1", None, None).await.unwrap();
    let key_b = coordinator.registry.generate_key(&scope, "a1-dup", None, None).await.unwrap();

    let first = coordinator.registry.register_agent(&scope, &key_a.key, "a1", "10.0.0.1", 9000, "").await;
    let second = coordinator.registry.register_agent(&scope, &key_b.key, "a1", "10.0.0.1", 9000, "").await;
    assert!(first.is_ok());
    let err = second.unwrap_err();
    assert_eq!(err.code(), "agent_exists");
}

#[tokio::test]
async fn scenario_5_revoked_key_is_unauthorized() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let coordinator = Coordinator::new(store.clone(), &test_config());
    let scope = RequestScope::unbounded();

    let minted = coordinator.registry.generate_key(&scope, "a1", None, None).await.unwrap();
    coordinator.registry.revoke_key(&scope, &minted.key).await.unwrap();
    let err = coordinator.registry.register_agent(&scope, &minted.key, "a1", "10.0.0.1", 9000, "").await.unwrap_err();
    assert_eq!(err.code(), "invalid_agent_key");
}

#[tokio::test]
async fn scenario_6_cache_coherence_after_progress_write() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let coordinator = Coordinator::new(store.clone(), &test_config());
    let scope = RequestScope::unbounded();
    let (hash_file_id, wordlist_id) = seed_assets(&store, &scope).await;

    let minted = coordinator.registry.generate_key(&scope, "a1", None, None).await.unwrap();
    let a1 = coordinator.registry.register_agent(&scope, &minted.key, "a1", "10.0.0.1", 9000, "").await.unwrap();
    let job = coordinator
        .jobs
        .create_job(&scope, NewJob { name: "j1".into(), hash_type: 2500, attack_mode: 0, hash_file_id, wordlist_id, rules: None, agent_id: None })
        .await
        .unwrap();
    coordinator.jobs.assign(&scope, job.id, a1.id).await.unwrap();
    coordinator.jobs.start_job(&scope, job.id, a1.id).await.unwrap();

    let listed = coordinator.jobs.list(&scope).await.unwrap();
    assert_eq!(listed.iter().find(|j| j.id == job.id).unwrap().progress, 0);

    coordinator.progress.update_progress(&scope, job.id, 42, 900, None).await.unwrap();

    let listed_after = coordinator.jobs.list(&scope).await.unwrap();
    assert_eq!(listed_after.iter().find(|j| j.id == job.id).unwrap().progress, 42);
}

#[tokio::test]
async fn creating_a_job_against_an_unknown_hash_file_is_invalid() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let coordinator = Coordinator::new(store.clone(), &test_config());
    let scope = RequestScope::unbounded();
    let (_, wordlist_id) = seed_assets(&store, &scope).await;

    let err = coordinator
        .jobs
        .create_job(&scope, NewJob { name: "j1".into(), hash_type: 2500, attack_mode: 0, hash_file_id: uuid::Uuid::new_v4(), wordlist_id, rules: None, agent_id: None })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_reference");
}

#[tokio::test]
async fn delete_agent_cascades_and_fails_its_running_job() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let coordinator = Coordinator::new(store.clone(), &test_config());
    let scope = RequestScope::unbounded();
    let (hash_file_id, wordlist_id) = seed_assets(&store, &scope).await;

    let minted = coordinator.registry.generate_key(&scope, "a1", None, None).await.unwrap();
    let a1 = coordinator.registry.register_agent(&scope, &minted.key, "a1", "10.0.0.1", 9000, "").await.unwrap();
    let job = coordinator
        .jobs
        .create_job(&scope, NewJob { name: "j1".into(), hash_type: 2500, attack_mode: 0, hash_file_id, wordlist_id, rules: None, agent_id: None })
        .await
        .unwrap();
    coordinator.jobs.assign(&scope, job.id, a1.id).await.unwrap();
    coordinator.jobs.start_job(&scope, job.id, a1.id).await.unwrap();

    coordinator.delete_agent(&scope, a1.id).await.unwrap();

    let job_after = coordinator.jobs.get(&scope, job.id).await.unwrap();
    assert_eq!(job_after.status, JobStatus::Failed);
    assert_eq!(job_after.result.as_deref(), Some("agent_removed"));
    assert_eq!(job_after.agent_id, None);
    assert_eq!(coordinator.registry.get(&scope, a1.id).await.unwrap_err().code(), "not_found");
}
