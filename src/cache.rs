use crate::config::{CacheBackend, CacheConfig};
use crate::error::Result;
use crate::telemetry::runtime_counters;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::warn;

/// TTL key-value store shared across subscriptions. Values are JSON
/// documents; the store never hands back an expired entry.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<JsonValue>;
    async fn set(&self, key: &str, value: JsonValue);
    async fn set_with_ttl(&self, key: &str, value: JsonValue, ttl: Duration);
    async fn invalidate(&self, key: &str);
    async fn len(&self) -> usize;
}

pub fn from_config(config: &CacheConfig) -> Result<Arc<dyn Cache>> {
    let default_ttl = config.ttl()?;
    Ok(match config.backend {
        CacheBackend::Memory => Arc::new(MemoryCache::new(default_ttl)),
        CacheBackend::None => Arc::new(NoCache),
    })
}

/// Build a cache key from its non-empty components, `prefix:sub:rg:name`.
pub fn cache_key(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(":")
}

/// Serve `key` from the cache, falling back to `fetch` on a miss (or when
/// `refresh` bypasses the lookup). Successful fetch results are written back
/// with `ttl`. A cached document that no longer deserializes is treated as a
/// miss and overwritten.
pub async fn cached_fetch<T, F, Fut>(
    cache: &dyn Cache,
    key: &str,
    ttl: Duration,
    refresh: bool,
    fetch: F,
) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if !refresh {
        if let Some(document) = cache.get(key).await {
            match serde_json::from_value(document) {
                Ok(value) => {
                    runtime_counters().inc_cache_hit();
                    return Ok(value);
                }
                Err(err) => {
                    warn!(key, error = %err, "cached document no longer deserializes, refetching");
                }
            }
        }
    }

    runtime_counters().inc_cache_miss();
    let value = fetch().await?;
    match serde_json::to_value(&value) {
        Ok(document) => cache.set_with_ttl(key, document, ttl).await,
        Err(err) => warn!(key, error = %err, "failed to serialize value for caching"),
    }
    Ok(value)
}

struct MemoryEntry {
    value: JsonValue,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// In-memory TTL cache guarded by an async rwlock. Expired entries are
/// dropped lazily on read.
pub struct MemoryCache {
    default_ttl: Duration,
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

impl MemoryCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<JsonValue> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Entry was present but stale; drop it under the write lock. Another
        // writer may have refreshed it in between, so re-check the deadline.
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
        }
        entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone())
    }

    async fn set(&self, key: &str, value: JsonValue) {
        self.set_with_ttl(key, value, self.default_ttl).await;
    }

    async fn set_with_ttl(&self, key: &str, value: JsonValue, ttl: Duration) {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Instant::now().checked_add(ttl)
        };
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), MemoryEntry { value, expires_at });
    }

    async fn invalidate(&self, key: &str) {
        let mut entries = self.entries.write().await;
        entries.remove(key);
    }

    async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }
}

/// Pass-through backend: every lookup misses.
pub struct NoCache;

#[async_trait]
impl Cache for NoCache {
    async fn get(&self, _key: &str) -> Option<JsonValue> {
        None
    }

    async fn set(&self, _key: &str, _value: JsonValue) {}

    async fn set_with_ttl(&self, _key: &str, _value: JsonValue, _ttl: Duration) {}

    async fn invalidate(&self, _key: &str) {}

    async fn len(&self) -> usize {
        0
    }
}
