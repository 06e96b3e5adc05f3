//! In-memory `SharedStore`, used in single-replica development and in the
//! integration tests. A `DashMap`-backed shared map, no locking needed
//! across `.await` points.

use super::{EntryFields, SharedStore, StoreResult};
use async_trait::async_trait;
use dashmap::DashMap;
use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, Instant},
};

struct HashEntry {
    fields: EntryFields,
    expires_at: Instant,
}

pub struct MemoryStore {
    hashes: DashMap<String, HashEntry>,
    windows: DashMap<String, (BTreeMap<i64, ()>, Instant)>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            hashes: DashMap::new(),
            windows: DashMap::new(),
        })
    }

    fn live(&self, hostname: &str) -> Option<EntryFields> {
        let entry = self.hashes.get(hostname)?;
        if entry.expires_at < Instant::now() {
            return None;
        }
        Some(entry.fields.clone())
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn put_registration(&self, hostname: &str, json: &str, ttl: Duration) -> StoreResult<()> {
        let mut entry = self.hashes.entry(hostname.to_string()).or_insert_with(|| HashEntry {
            fields: EntryFields::default(),
            expires_at: Instant::now() + ttl,
        });
        entry.fields.registration = Some(json.to_string());
        entry.expires_at = Instant::now() + ttl;
        Ok(())
    }

    async fn put_health(&self, hostname: &str, json: &str, ttl: Duration) -> StoreResult<()> {
        let mut entry = self.hashes.entry(hostname.to_string()).or_insert_with(|| HashEntry {
            fields: EntryFields::default(),
            expires_at: Instant::now() + ttl,
        });
        entry.fields.health = Some(json.to_string());
        entry.expires_at = Instant::now() + ttl;
        Ok(())
    }

    async fn put_prometheus(&self, hostname: &str, json: &str) -> StoreResult<()> {
        if let Some(mut entry) = self.hashes.get_mut(hostname) {
            entry.fields.prometheus = Some(json.to_string());
        }
        // No local entry yet for a hostname with only a Prometheus signal.
        Ok(())
    }

    async fn scan_hostnames(&self) -> StoreResult<Vec<String>> {
        let now = Instant::now();
        Ok(self
            .hashes
            .iter()
            .filter(|e| e.expires_at >= now)
            .map(|e| e.key().clone())
            .collect())
    }

    async fn get_entry(&self, hostname: &str) -> StoreResult<EntryFields> {
        Ok(self.live(hostname).unwrap_or_default())
    }

    async fn sliding_window_hit(&self, key: &str, now_micros: i64, interval: Duration) -> StoreResult<u64> {
        let cutoff = now_micros - interval.as_micros() as i64;
        let mut window = self.windows.entry(key.to_string()).or_insert_with(|| (BTreeMap::new(), Instant::now()));
        window.0.retain(|&ts, _| ts > cutoff);
        window.0.insert(now_micros, ());
        window.1 = Instant::now() + interval;
        Ok(window.0.len() as u64)
    }
}
