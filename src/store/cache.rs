//! Short-term key-value cache
//!
//! Interface over the external cache the controller consumes. The in-process
//! implementation keeps TTL-expired entries out of reads; eviction is lazy.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::warn;

/// Cache key conventions shared with the wider platform
pub mod keys {
    use uuid::Uuid;

    pub fn field_config(field_id: &str) -> String {
        format!("field:config:{field_id}")
    }

    pub fn irrigation_status(schedule_id: Uuid) -> String {
        format!("irrigation:status:{schedule_id}")
    }

    pub fn irrigation_field(field_id: &str) -> String {
        format!("irrigation:field:{field_id}")
    }

    pub fn rainfall(field_id: &str) -> String {
        format!("awd:rainfall:{field_id}")
    }

    pub fn water_level(field_id: &str) -> String {
        format!("awd:water-level:{field_id}")
    }

    pub fn moisture(field_id: &str) -> String {
        format!("awd:moisture:{field_id}")
    }

    pub fn weather(field_id: &str) -> String {
        format!("awd:weather:{field_id}")
    }

    pub fn prediction(field_id: &str) -> String {
        format!("awd:prediction:{field_id}")
    }
}

/// Key-value cache with per-entry TTL
#[async_trait]
pub trait KvCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>);

    async fn delete(&self, key: &str);
}

/// Read and deserialize a cached JSON value; decode failures count as a miss
pub async fn read_json<T: serde::de::DeserializeOwned>(
    cache: &dyn KvCache,
    key: &str,
) -> Option<T> {
    let raw = cache.get(key).await?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, error = %e, "Discarding undecodable cache entry");
            cache.delete(key).await;
            None
        }
    }
}

/// Serialize and store a JSON value; serialization failures are logged, the
/// cache is best-effort
pub async fn write_json<T: serde::Serialize>(
    cache: &dyn KvCache,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) {
    match serde_json::to_string(value) {
        Ok(raw) => cache.set(key, raw, ttl).await,
        Err(e) => warn!(key, error = %e, "Could not serialize value for cache"),
    }
}

struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-process cache used as the embedded default
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let hit = match self.entries.get(key) {
            Some(entry) if !entry.expired() => Some(entry.value.clone()),
            Some(_) => None,
            None => return None,
        };
        if hit.is_none() {
            self.entries.remove(key);
        }
        hit
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
    }

    async fn delete(&self, key: &str) {
        self.entries.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete() {
        let cache = MemoryCache::new();
        cache.set("k", "v".into(), None).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));

        cache.delete("k").await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn ttl_expires_entries() {
        let cache = MemoryCache::new();
        cache
            .set("k", "v".into(), Some(Duration::from_millis(10)))
            .await;
        assert!(cache.get("k").await.is_some());

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn json_round_trip_preserves_fields() {
        let cache = MemoryCache::new();
        let status = serde_json::json!({"current_level_cm": 6.5, "anomalies_detected": 2});
        write_json(&cache, "irrigation:status:x", &status, None).await;

        let restored: serde_json::Value = read_json(&cache, "irrigation:status:x")
            .await
            .unwrap();
        assert_eq!(restored, status);
    }
}
