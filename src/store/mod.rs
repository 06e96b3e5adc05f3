//! The shared, cross-replica mutable store: a hash per hostname
//! with fields `Registration`/`Health`/`Prometheus`, and sorted sets of
//! timestamps for the sliding-window rate limiter. All operations the
//! tracker and limiter need are single-round-trip (pipelined) so no lock is
//! ever held across a store round-trip.

pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use std::time::Duration;

/// A hostname's three hash fields, as raw JSON blobs (undecoded — the
/// caller, `fleet::tracker`, owns (de)serialization so the store stays a
/// dumb key/value backend).
#[derive(Debug, Clone, Default)]
pub struct EntryFields {
    pub registration: Option<String>,
    pub health: Option<String>,
    pub prometheus: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Every admission and tracker operation the core needs from the shared
/// store. Implementations MUST make each method a single round-trip
/// (pipelined) so no lock is ever held across a store round-trip, and so
/// rate-limit checks stay a single round-trip.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Upserts the `Registration` field and refreshes the whole hash's TTL.
    async fn put_registration(&self, hostname: &str, json: &str, ttl: Duration) -> StoreResult<()>;

    /// Upserts the `Health` field and refreshes the whole hash's TTL.
    async fn put_health(&self, hostname: &str, json: &str, ttl: Duration) -> StoreResult<()>;

    /// Upserts the `Prometheus` field WITHOUT touching the TTL (a
    /// missing heartbeat must still expire even if Prometheus keeps writing).
    async fn put_prometheus(&self, hostname: &str, json: &str) -> StoreResult<()>;

    /// All hostnames currently present (`SCAN`).
    async fn scan_hostnames(&self) -> StoreResult<Vec<String>>;

    /// All three fields for one hostname (`HGETALL`).
    async fn get_entry(&self, hostname: &str) -> StoreResult<EntryFields>;

    /// Atomically: drop entries with score <= now-interval, add `now`,
    /// refresh TTL to `interval`, return resulting cardinality. This is the
    /// sliding-window primitive backing the rate limiter.
    async fn sliding_window_hit(&self, key: &str, now_micros: i64, interval: Duration) -> StoreResult<u64>;
}
