//! Read-through cache (spec §4.2, component C2).
//!
//! Grounded in the same lock-guarded `HashMap` shape as
//! `noa_gateway::rate_limit`'s in-memory rate store, but storing a JSON blob
//! per entry so that both writes and reads go through a serialise/deserialise
//! round trip — the spec's "deep copies on write *and* read" requirement —
//! rather than handing callers a live reference into the cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

struct Entry {
    payload: serde_json::Value,
    expires_at: Instant,
}

#[derive(Debug, Clone, Copy)]
pub struct CacheTtls {
    pub agent: Duration,
    pub entity: Duration,
    pub job: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            agent: Duration::from_secs(30),
            entity: Duration::from_secs(60),
            job: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub total_lookups: u64,
    pub entries: usize,
}

pub struct Cache {
    entries: RwLock<HashMap<String, Entry>>,
    ttls: CacheTtls,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Cache {
    pub fn new(ttls: CacheTtls) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttls,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn ttls(&self) -> CacheTtls {
        self.ttls
    }

    /// Read-through: returns `Some` only for a live, non-expired entry.
    /// Expiry is lazy on top of the periodic sweep: a read past expiry is
    /// always treated as a miss even if the sweep has not run yet.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        let hit = {
            let entries = self.entries.read();
            entries.get(key).filter(|e| e.expires_at > now).map(|e| e.payload.clone())
        };
        match hit {
            Some(payload) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                serde_json::from_value(payload).ok()
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put<T: Serialize>(&self, key: impl Into<String>, value: &T, ttl: Duration) {
        if let Ok(payload) = serde_json::to_value(value) {
            self.entries.write().insert(key.into(), Entry { payload, expires_at: Instant::now() + ttl });
        }
    }

    /// Invalidate one key. Safe to call for a key that was never cached.
    pub fn invalidate(&self, key: &str) {
        self.entries.write().remove(key);
    }

    pub fn invalidate_many<'a>(&self, keys: impl IntoIterator<Item = &'a str>) {
        let mut entries = self.entries.write();
        for key in keys {
            entries.remove(key);
        }
    }

    pub fn clear(&self) {
        self.entries.write().clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        CacheStats {
            hits,
            misses,
            total_lookups: hits + misses,
            entries: self.entries.read().len(),
        }
    }

    /// Live entry count grouped by the prefix before the first `:` in each
    /// key (`"agent"`, `"agents"`, `"job"`, ...) — the "entries by type"
    /// breakdown the `/cache/stats` endpoint exposes (spec §4.8).
    pub fn entries_by_kind(&self) -> std::collections::BTreeMap<String, usize> {
        let mut counts = std::collections::BTreeMap::new();
        for key in self.entries.read().keys() {
            let kind = key.split(':').next().unwrap_or(key).to_string();
            *counts.entry(kind).or_insert(0) += 1;
        }
        counts
    }

    /// Drop expired entries. Intended to run on a `TTL/2` cadence from a
    /// background task (spec §4.2 "Cleanup of expired entries").
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "cache sweep removed expired entries");
        }
    }
}

pub mod keys {
    use uuid::Uuid;

    pub fn entity(kind: &str, id: Uuid) -> String {
        format!("{kind}:{id}")
    }

    pub fn list(kind: &str) -> String {
        format!("{kind}s:all")
    }

    pub fn agent_key(key: &str) -> String {
        format!("agent:key:{key}")
    }
}
