//! Cache store trait and the in-process implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Key/value store with per-key expiry.
///
/// Implementations must be safe for concurrent `get`/`set` from independent
/// requests. No compare-and-swap is needed: the last `set` to complete wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch a value. Entries past their expiry read as a miss.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Store a value. A zero `ttl` stores the entry without expiry.
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<()>;

    /// Whether a live entry exists for `key`.
    async fn has(&self, key: &str) -> Result<bool>;

    /// Remove an entry. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Fetch and deserialize a cached value.
///
/// Backend errors and undecodable entries are logged and read as a miss, so
/// a broken cache degrades to recomputation instead of failing requests.
pub async fn get_typed<T: DeserializeOwned>(cache: &dyn CacheStore, key: &str) -> Option<T> {
    match cache.get(key).await {
        Ok(Some(value)) => match serde_json::from_value(value) {
            Ok(typed) => {
                debug!(cache_key = key, "cache hit");
                Some(typed)
            }
            Err(e) => {
                warn!(cache_key = key, error = %e, "discarding undecodable cache entry");
                None
            }
        },
        Ok(None) => {
            debug!(cache_key = key, "cache miss");
            None
        }
        Err(e) => {
            warn!(cache_key = key, error = %e, "cache read failed, treating as miss");
            None
        }
    }
}

/// Serialize and store a value, logging (not propagating) failures.
pub async fn set_typed<T: Serialize>(cache: &dyn CacheStore, key: &str, value: &T, ttl: Duration) {
    let value = match serde_json::to_value(value) {
        Ok(v) => v,
        Err(e) => {
            warn!(cache_key = key, error = %e, "value not serializable, skipping cache write");
            return;
        }
    };

    if let Err(e) = cache.set(key, value, ttl).await {
        warn!(cache_key = key, error = %e, "cache write failed");
    }
}

#[derive(Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|t| now < t)
    }
}

/// Thread-safe in-memory cache.
///
/// Expired entries are skipped on read. They are dropped on the next write to
/// the same key, by [`MemoryCacheStore::purge_expired`], or by the background
/// sweep from [`MemoryCacheStore::spawn_sweeper`].
#[derive(Clone, Default)]
pub struct MemoryCacheStore {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    /// Purge expired entries every `every` until the store is dropped.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let entries = Arc::downgrade(&self.entries);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(entries) = entries.upgrade() else {
                    break;
                };
                let now = Instant::now();
                let mut entries = entries.write().await;
                let before = entries.len();
                entries.retain(|_, entry| entry.is_live(now));
                let removed = before - entries.len();
                if removed > 0 {
                    debug!(removed, remaining = entries.len(), "purged expired cache entries");
                }
            }
        })
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let entries = self.entries.read().await;
        let now = Instant::now();
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        };

        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_has_delete() {
        let cache = MemoryCacheStore::new();

        assert!(cache.get("k").await.unwrap().is_none());
        assert!(!cache.has("k").await.unwrap());

        cache.set("k", json!({"a": 1}), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(json!({"a": 1})));
        assert!(cache.has("k").await.unwrap());

        cache.delete("k").await.unwrap();
        assert!(!cache.has("k").await.unwrap());

        // Deleting again is fine.
        cache.delete("k").await.unwrap();
    }

    #[tokio::test]
    async fn test_last_set_wins() {
        let cache = MemoryCacheStore::new();
        cache.set("k", json!(1), Duration::from_secs(60)).await.unwrap();
        cache.set("k", json!(2), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_expired_entry_reads_as_miss() {
        let cache = MemoryCacheStore::new();
        cache.set("k", json!("v"), Duration::from_millis(20)).await.unwrap();
        assert!(cache.has("k").await.unwrap());

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(cache.get("k").await.unwrap().is_none());
        assert!(!cache.has("k").await.unwrap());
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.purge_expired().await, 1);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_sweeper_shrinks_map() {
        let cache = MemoryCacheStore::new();
        for i in 0..1001 {
            cache
                .set(&format!("k{}", i), json!(i), Duration::from_millis(10))
                .await
                .unwrap();
        }
        cache.set("live", json!(true), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.len().await, 1002);

        let sweeper = cache.spawn_sweeper(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(cache.len().await, 1);
        assert!(cache.has("live").await.unwrap());
        sweeper.abort();
    }

    #[tokio::test]
    async fn test_sweeper_stops_with_store() {
        let cache = MemoryCacheStore::new();
        let sweeper = cache.spawn_sweeper(Duration::from_millis(5));
        drop(cache);
        tokio::time::timeout(Duration::from_secs(1), sweeper)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_zero_ttl_never_expires() {
        let cache = MemoryCacheStore::new();
        cache.set("k", json!(true), Duration::ZERO).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cache.has("k").await.unwrap());
        assert_eq!(cache.purge_expired().await, 0);
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        let cache = MemoryCacheStore::new();
        set_typed(&cache, "n", &42_i64, Duration::from_secs(60)).await;
        assert_eq!(get_typed::<i64>(&cache, "n").await, Some(42));

        // Wrong shape is discarded as a miss.
        assert_eq!(get_typed::<Vec<String>>(&cache, "n").await, None);
    }

    #[tokio::test]
    async fn test_concurrent_writers() {
        let cache = MemoryCacheStore::new();
        let mut handles = Vec::new();
        for i in 0..16 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .set(&format!("k{}", i % 4), json!(i), Duration::from_secs(60))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(cache.len().await, 4);
    }
}
