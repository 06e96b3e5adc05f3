//! Sliding-window counters backed by the shared store: for a key
//! `K`, atomically drop stale entries, add `now`, refresh TTL, and return
//! the resulting cardinality. Limited when cardinality exceeds `max_events`.

use crate::store::SharedStore;
use std::{sync::Arc, time::Duration};
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct WindowConfig {
    pub interval: Duration,
    pub max_events: u64,
}

pub struct SlidingWindowLimiter {
    store: Arc<dyn SharedStore>,
}

impl SlidingWindowLimiter {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// Fails open (returns `false`, i.e. not limited) on any store error,
    /// logging the failure — on any store error the limiter
    /// fails open."
    pub async fn hit(&self, key: &str, now_micros: i64, cfg: WindowConfig) -> bool {
        match self.store.sliding_window_hit(key, now_micros, cfg.interval).await {
            Ok(cardinality) => cardinality > cfg.max_events,
            Err(e) => {
                warn!(error = %e, key = %key, "rate_limit_store_error_failing_open");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn admits_exactly_max_events_per_window() {
        let store = MemoryStore::new();
        let limiter = SlidingWindowLimiter::new(store);
        let cfg = WindowConfig {
            interval: Duration::from_secs(3600),
            max_events: 2,
        };
        let base = 1_700_000_000_000_000i64;
        assert!(!limiter.hit("k", base, cfg).await);
        assert!(!limiter.hit("k", base + 1, cfg).await);
        assert!(limiter.hit("k", base + 2, cfg).await);
    }

    #[tokio::test]
    async fn old_entries_fall_out_of_the_window() {
        let store = MemoryStore::new();
        let limiter = SlidingWindowLimiter::new(store);
        let cfg = WindowConfig {
            interval: Duration::from_secs(1),
            max_events: 1,
        };
        let base = 1_700_000_000_000_000i64;
        assert!(!limiter.hit("k", base, cfg).await);
        // 2 seconds later: the first hit has aged out of the 1s window.
        assert!(!limiter.hit("k", base + 2_000_000, cfg).await);
    }
}
