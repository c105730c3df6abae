use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use deadpool_redis::Pool;
use redis::{AsyncCommands, Script};
use std::time::Duration;

use crate::cache::CacheEntry;
use crate::error::GatewayError;

// `set` is last-writer-wins on fetched_at_ms and returns Ok(false) when the
// write was dropped. `delete` leaves a purge watermark behind: writes from
// fetches that started before it are dropped too.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, GatewayError>;

    async fn set(&self, key: &str, entry: &CacheEntry) -> Result<bool, GatewayError>;

    async fn delete(&self, key: &str, purged_at_ms: i64) -> Result<(), GatewayError>;

    async fn health_check(&self) -> bool;
}

// Single-instance mode
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: DashMap<String, CacheEntry>,
    purged_at: DashMap<String, i64>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, GatewayError> {
        Ok(self.entries.get(key).map(|entry| entry.clone()))
    }

    async fn set(&self, key: &str, entry: &CacheEntry) -> Result<bool, GatewayError> {
        // the entry lock is held across both checks, so a purge cannot interleave
        let slot = self.entries.entry(key.to_string());
        if let Some(purged_at) = self.purged_at.get(key) {
            if entry.fetched_at_ms < *purged_at {
                return Ok(false);
            }
        }

        match slot {
            Entry::Occupied(mut current) => {
                if current.get().fetched_at_ms > entry.fetched_at_ms {
                    return Ok(false);
                }
                current.insert(entry.clone());
            }
            Entry::Vacant(slot) => {
                slot.insert(entry.clone());
            }
        }
        Ok(true)
    }

    async fn delete(&self, key: &str, purged_at_ms: i64) -> Result<(), GatewayError> {
        let slot = self.entries.entry(key.to_string());
        self.purged_at
            .entry(key.to_string())
            .and_modify(|current| *current = (*current).max(purged_at_ms))
            .or_insert(purged_at_ms);
        if let Entry::Occupied(current) = slot {
            current.remove();
        }
        Ok(())
    }

    async fn health_check(&self) -> bool {
        true
    }
}

// The entry lives in a hash: `fetched_at` for the last-writer-wins check,
// `body` for the JSON-encoded entry, `purged_at` for the last purge.
// PEXPIRE drops it once it can no longer be served.
const SET_SCRIPT: &str = r#"
local purged = redis.call('HGET', KEYS[1], 'purged_at')
if purged and tonumber(purged) > tonumber(ARGV[1]) then
    return 0
end
local stored = redis.call('HGET', KEYS[1], 'fetched_at')
if stored and tonumber(stored) > tonumber(ARGV[1]) then
    return 0
end
redis.call('HSET', KEYS[1], 'fetched_at', ARGV[1], 'body', ARGV[2])
redis.call('PEXPIRE', KEYS[1], ARGV[3])
return 1
"#;

// Drops the entry but keeps the newest purge watermark for ARGV[2] ms.
const PURGE_SCRIPT: &str = r#"
redis.call('HDEL', KEYS[1], 'fetched_at', 'body')
local purged = redis.call('HGET', KEYS[1], 'purged_at')
if not purged or tonumber(purged) < tonumber(ARGV[1]) then
    redis.call('HSET', KEYS[1], 'purged_at', ARGV[1])
end
redis.call('PEXPIRE', KEYS[1], ARGV[2])
return 1
"#;

pub struct RedisCacheStore {
    pool: Pool,
    set_script: Script,
    purge_script: Script,
    // must outlive any fetch still running when the purge happened
    purge_retention: Duration,
}

impl RedisCacheStore {
    pub fn new(pool: Pool, purge_retention: Duration) -> Self {
        Self {
            pool,
            set_script: Script::new(SET_SCRIPT),
            purge_script: Script::new(PURGE_SCRIPT),
            purge_retention,
        }
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, GatewayError> {
        let mut conn = self.pool.get().await?;
        let body: Option<String> = conn.hget(key, "body").await?;

        match body {
            Some(body) => match serde_json::from_str(&body) {
                Ok(entry) => Ok(Some(entry)),
                Err(e) => {
                    // unreadable entries are misses, the next fetch overwrites them
                    tracing::warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, entry: &CacheEntry) -> Result<bool, GatewayError> {
        let body = serde_json::to_string(entry)
            .map_err(|e| GatewayError::UpstreamUnavailable(format!("encode cache entry: {e}")))?;

        let mut conn = self.pool.get().await?;
        let written: u8 = self
            .set_script
            .key(key)
            .arg(entry.fetched_at_ms)
            .arg(body)
            .arg(entry.max_staleness_ms.max(1))
            .invoke_async(&mut conn)
            .await?;

        Ok(written == 1)
    }

    async fn delete(&self, key: &str, purged_at_ms: i64) -> Result<(), GatewayError> {
        let mut conn = self.pool.get().await?;
        let _: u8 = self
            .purge_script
            .key(key)
            .arg(purged_at_ms)
            .arg((self.purge_retention.as_millis() as u64).max(1))
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn health_check(&self) -> bool {
        let Ok(mut conn) = self.pool.get().await else {
            return false;
        };
        let pong: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
        pong.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Catalog;
    use std::sync::Arc;

    fn entry(fetched_at_ms: i64, total: usize) -> CacheEntry {
        CacheEntry {
            key: "confscout:v1:conferences".to_string(),
            schema_version: 1,
            payload: Arc::new(Catalog {
                conferences: Vec::new(),
                total,
                generated_at: None,
            }),
            fetched_at_ms,
            ttl_ms: 60_000,
            max_staleness_ms: 300_000,
        }
    }

    #[tokio::test]
    async fn older_write_does_not_replace_newer_entry() {
        let store = MemoryCacheStore::new();
        let key = "confscout:v1:conferences";

        assert!(store.set(key, &entry(2_000, 2)).await.unwrap());
        assert!(!store.set(key, &entry(1_000, 1)).await.unwrap());

        let stored = store.get(key).await.unwrap().unwrap();
        assert_eq!(stored.fetched_at_ms, 2_000);
        assert_eq!(stored.payload.total, 2);
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let store = MemoryCacheStore::new();
        let key = "confscout:v1:conferences";
        store.set(key, &entry(1_000, 1)).await.unwrap();

        store.delete(key, 1_500).await.unwrap();

        assert!(store.get(key).await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn write_from_before_a_purge_is_dropped() {
        let store = MemoryCacheStore::new();
        let key = "confscout:v1:conferences";

        store.delete(key, 5_000).await.unwrap();
        // started before the purge, finished after it
        assert!(!store.set(key, &entry(4_000, 1)).await.unwrap());
        assert!(store.is_empty());

        assert!(store.set(key, &entry(5_000, 2)).await.unwrap());
        assert_eq!(store.get(key).await.unwrap().unwrap().payload.total, 2);

        // an older purge does not move the watermark back
        store.delete(key, 3_000).await.unwrap();
        assert!(!store.set(key, &entry(4_000, 3)).await.unwrap());
    }
}
