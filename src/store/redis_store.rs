//! Redis-backed `SharedStore` — the real cross-replica backend.
//! Hash fields map directly onto `HSET`/`HGETALL`/`EXPIRE`; sliding windows
//! map onto sorted sets (`ZADD`/`ZREMRANGEBYSCORE`/`ZCARD`), exactly the
//! shape documented on `SharedStore` ("Sliding-window counters are sorted sets of `now`
//! timestamps... key TTL = window length").

use super::{EntryFields, SharedStore, StoreResult};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use std::time::Duration;

pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

fn err(e: impl std::fmt::Display) -> super::StoreError {
    super::StoreError::Unavailable(e.to_string())
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn put_registration(&self, hostname: &str, json: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .hset(hostname, "Registration", json)
            .ignore()
            .expire(hostname, ttl.as_secs() as i64)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(err)
    }

    async fn put_health(&self, hostname: &str, json: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .hset(hostname, "Health", json)
            .ignore()
            .expire(hostname, ttl.as_secs() as i64)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(err)
    }

    async fn put_prometheus(&self, hostname: &str, json: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        // Deliberately no EXPIRE: a Prometheus-only write must never keep an
        // otherwise-stale hostname alive.
        conn.hset::<_, _, _, ()>(hostname, "Prometheus", json).await.map_err(err)
    }

    async fn scan_hostnames(&self) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut out = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("COUNT")
                .arg(1000)
                .query_async(&mut conn)
                .await
                .map_err(err)?;
            out.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(out)
    }

    async fn get_entry(&self, hostname: &str) -> StoreResult<EntryFields> {
        let mut conn = self.conn.clone();
        let fields: std::collections::HashMap<String, String> =
            conn.hgetall(hostname).await.map_err(err)?;
        Ok(EntryFields {
            registration: fields.get("Registration").cloned(),
            health: fields.get("Health").cloned(),
            prometheus: fields.get("Prometheus").cloned(),
        })
    }

    async fn sliding_window_hit(&self, key: &str, now_micros: i64, interval: Duration) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let cutoff = now_micros - interval.as_micros() as i64;
        let (_, _, _, card): (i64, i64, bool, u64) = redis::pipe()
            .atomic()
            .zrembyscore(key, "-inf", cutoff)
            .zadd(key, now_micros, now_micros)
            .expire(key, interval.as_secs().max(1) as i64)
            .zcard(key)
            .query_async(&mut conn)
            .await
            .map_err(err)?;
        Ok(card)
    }
}
