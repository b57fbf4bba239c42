//! Generic key/value cache with per-key time-to-live.
//!
//! Shared by the price oracle and the ENS resolver, which namespace their
//! own keys (`price:*`, `ens:*`). Two implementations:
//! - `RedisCache`: production store, expiry handled server-side via SET EX
//! - `MemoryCache`: in-process map with lazy eviction on read, used by
//!   tests and Redis-less runs

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::{Duration, Instant};

/// String key/value cache with per-entry TTL.
#[async_trait]
pub trait TtlCache: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()>;
}

/// Redis-backed cache. All keys are namespaced under a configurable prefix
/// so multiple instances can share a single Redis without collisions.
#[derive(Clone)]
pub struct RedisCache {
    conn: MultiplexedConnection,
    prefix: String,
}

impl RedisCache {
    pub fn new(conn: MultiplexedConnection, prefix: &str) -> Self {
        Self {
            conn,
            prefix: prefix.to_string(),
        }
    }

    /// Build a namespaced key: "{prefix}:{suffix}"
    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.prefix, suffix)
    }
}

#[async_trait]
impl TtlCache for RedisCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(self.key(key)).await?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(self.key(key), value, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }
}

struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

/// In-process cache. Expired entries are evicted lazily when read; there is
/// no background sweep.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, MemoryEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TtlCache for MemoryCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.expires_at <= Instant::now() => true,
            Some(entry) => return Ok(Some(entry.value.clone())),
            None => return Ok(None),
        };
        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_cache_stores_and_returns_values() {
        let cache = MemoryCache::new();
        cache
            .put("price:eth_usd", "2500", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            cache.get("price:eth_usd").await.unwrap(),
            Some("2500".to_string())
        );
        assert_eq!(cache.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_cache_lazily_evicts_expired_entries() {
        let cache = MemoryCache::new();
        cache
            .put("k", "v", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(cache.get("k").await.unwrap(), None);
        // the read removed the entry, not just masked it
        assert!(cache.entries.get("k").is_none());
    }

    #[tokio::test]
    async fn memory_cache_overwrites_existing_entry() {
        let cache = MemoryCache::new();
        cache.put("k", "old", Duration::from_secs(60)).await.unwrap();
        cache.put("k", "new", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("new".to_string()));
    }

    #[tokio::test]
    async fn memory_cache_keeps_empty_marker_distinct_from_absent() {
        let cache = MemoryCache::new();
        cache.put("ens:0xabc", "", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("ens:0xabc").await.unwrap(), Some(String::new()));
    }
}
