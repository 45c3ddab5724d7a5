//! In-process cache provider backed by `moka`, used in tests and
//! single-pod deployments.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use moka::future::Cache as MokaInner;
use moka::Expiry;

use super::{Cache, CacheError};

/// Cached value paired with the TTL it was inserted with, so a per-call
/// TTL narrower (or wider) than the map default is actually honored by
/// `TtlExpiry` below, rather than always falling back to the map-wide
/// default.
#[derive(Clone)]
struct StoredValue {
    value: String,
    ttl: Option<Duration>,
}

struct TtlExpiry {
    default_ttl: Duration,
}

impl Expiry<String, StoredValue> for TtlExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredValue,
        _current_time: std::time::Instant,
    ) -> Option<Duration> {
        Some(value.ttl.unwrap_or(self.default_ttl))
    }
}

/// One `moka::future::Cache<String, StoredValue>` per named map, keyed by
/// the map name, created lazily on first use. Expiry is driven by
/// `TtlExpiry`, which honors a per-entry TTL supplied via `set_with_ttl`
/// and falls back to `default_ttl` (1 hour unless overridden) otherwise.
#[derive(Debug)]
pub struct MokaCache {
    maps: DashMap<String, Arc<MokaInner<String, StoredValue>>>,
    default_ttl: Duration,
}

impl MokaCache {
    pub fn new() -> Self {
        Self::with_default_ttl(Duration::from_secs(3600))
    }

    pub fn with_default_ttl(default_ttl: Duration) -> Self {
        Self {
            maps: DashMap::new(),
            default_ttl,
        }
    }

    fn map(&self, map_name: &str) -> Arc<MokaInner<String, StoredValue>> {
        self.maps
            .entry(map_name.to_string())
            .or_insert_with(|| {
                Arc::new(
                    MokaInner::builder()
                        .expire_after(TtlExpiry {
                            default_ttl: self.default_ttl,
                        })
                        .build(),
                )
            })
            .clone()
    }
}

impl Default for MokaCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for MokaCache {
    async fn get(&self, map_name: &str, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.map(map_name).get(key).await.map(|stored| stored.value))
    }

    async fn set(&self, map_name: &str, key: &str, value: String) -> Result<(), CacheError> {
        self.map(map_name)
            .insert(key.to_string(), StoredValue { value, ttl: None })
            .await;
        Ok(())
    }

    async fn set_with_ttl(
        &self,
        map_name: &str,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.map(map_name)
            .insert(
                key.to_string(),
                StoredValue {
                    value,
                    ttl: Some(ttl),
                },
            )
            .await;
        Ok(())
    }

    async fn exists(&self, map_name: &str, key: &str) -> Result<bool, CacheError> {
        Ok(self.map(map_name).contains_key(key))
    }

    async fn remove(&self, map_name: &str, key: &str) -> Result<(), CacheError> {
        self.map(map_name).remove(key).await;
        Ok(())
    }

    async fn put_if_absent(
        &self,
        map_name: &str,
        key: &str,
        value: String,
    ) -> Result<Option<String>, CacheError> {
        let map = self.map(map_name);
        let to_insert = StoredValue { value, ttl: None };
        let entry = map
            .entry(key.to_string())
            .or_insert_with(|| to_insert.clone())
            .await;
        if entry.is_fresh() {
            Ok(None)
        } else {
            Ok(Some(entry.into_value().value))
        }
    }

    async fn get_all_entries(
        &self,
        map_name: &str,
    ) -> Result<Vec<(String, String)>, CacheError> {
        let map = self.map(map_name);
        Ok(map
            .iter()
            .map(|(k, v)| (k.as_ref().clone(), v.value.clone()))
            .collect())
    }

    async fn size(&self, map_name: &str) -> Result<usize, CacheError> {
        Ok(self.map(map_name).entry_count() as usize)
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = MokaCache::new();
        cache
            .set("m", "k", "v".to_string())
            .await
            .unwrap();
        assert_eq!(cache.get("m", "k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn get_missing_key_returns_none() {
        let cache = MokaCache::new();
        assert_eq!(cache.get("m", "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_if_absent_only_stores_once() {
        let cache = MokaCache::new();
        let first = cache
            .put_if_absent("m", "k", "first".to_string())
            .await
            .unwrap();
        assert_eq!(first, None);

        let second = cache
            .put_if_absent("m", "k", "second".to_string())
            .await
            .unwrap();
        assert_eq!(second, Some("first".to_string()));
        assert_eq!(cache.get("m", "k").await.unwrap(), Some("first".to_string()));
    }

    #[tokio::test]
    async fn remove_deletes_key() {
        let cache = MokaCache::new();
        cache.set("m", "k", "v".to_string()).await.unwrap();
        cache.remove("m", "k").await.unwrap();
        assert!(!cache.exists("m", "k").await.unwrap());
    }

    #[tokio::test]
    async fn maps_are_isolated_by_name() {
        let cache = MokaCache::new();
        cache.set("a", "k", "a-value".to_string()).await.unwrap();
        cache.set("b", "k", "b-value".to_string()).await.unwrap();
        assert_eq!(cache.get("a", "k").await.unwrap(), Some("a-value".to_string()));
        assert_eq!(cache.get("b", "k").await.unwrap(), Some("b-value".to_string()));
    }

    #[tokio::test]
    async fn is_healthy_is_always_true() {
        let cache = MokaCache::new();
        assert!(cache.is_healthy().await);
    }

    #[tokio::test]
    async fn set_with_ttl_expires_before_the_map_default() {
        let cache = MokaCache::with_default_ttl(Duration::from_secs(3600));
        cache
            .set_with_ttl("m", "k", "v".to_string(), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(cache.get("m", "k").await.unwrap(), Some("v".to_string()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.get("m", "k").await.unwrap(), None);
    }
}
