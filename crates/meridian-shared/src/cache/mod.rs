//! Distributed key/value cache (C1).
//!
//! Keyed maps holding string values with per-map TTL. All operations are
//! idempotent at the cache layer; ordering guarantees are per-key only.
//! Two providers sit behind one enum for zero-cost dispatch, mirroring this
//! workspace's `MessagingProvider`/`MessageRouterKind` pattern: `Moka` for
//! in-process/single-pod deployments (and tests), `Redis` for distributed,
//! multi-pod deployments.

mod moka_provider;
#[cfg(feature = "cache-redis")]
mod redis_provider;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use moka_provider::MokaCache;
#[cfg(feature = "cache-redis")]
pub use redis_provider::RedisCache;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("key not found: {key}")]
    NotFound { key: String },

    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[cfg(feature = "cache-redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Distributed key/value cache with TTL and atomic put-if-absent.
///
/// Keys are opaque strings; the cache does not interpret them. Failures
/// bubble up — callers decide recovery (`spec.md` §4.1).
#[async_trait]
pub trait Cache: Send + Sync + std::fmt::Debug {
    async fn get(&self, map_name: &str, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, map_name: &str, key: &str, value: String) -> Result<(), CacheError>;

    async fn set_with_ttl(
        &self,
        map_name: &str,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    async fn exists(&self, map_name: &str, key: &str) -> Result<bool, CacheError>;

    async fn remove(&self, map_name: &str, key: &str) -> Result<(), CacheError>;

    /// Atomically stores `value` only if `key` is absent; returns the
    /// previous value (`None` if the store happened).
    async fn put_if_absent(
        &self,
        map_name: &str,
        key: &str,
        value: String,
    ) -> Result<Option<String>, CacheError>;

    async fn get_all_entries(
        &self,
        map_name: &str,
    ) -> Result<Vec<(String, String)>, CacheError>;

    async fn size(&self, map_name: &str) -> Result<usize, CacheError>;

    async fn is_healthy(&self) -> bool;
}

/// Enum-dispatch wrapper over the two cache providers.
#[derive(Debug, Clone)]
pub enum CacheProvider {
    Moka(std::sync::Arc<MokaCache>),
    #[cfg(feature = "cache-redis")]
    Redis(std::sync::Arc<RedisCache>),
}

impl CacheProvider {
    pub fn provider_name(&self) -> &'static str {
        match self {
            CacheProvider::Moka(_) => "moka",
            #[cfg(feature = "cache-redis")]
            CacheProvider::Redis(_) => "redis",
        }
    }
}

#[async_trait]
impl Cache for CacheProvider {
    async fn get(&self, map_name: &str, key: &str) -> Result<Option<String>, CacheError> {
        match self {
            CacheProvider::Moka(c) => c.get(map_name, key).await,
            #[cfg(feature = "cache-redis")]
            CacheProvider::Redis(c) => c.get(map_name, key).await,
        }
    }

    async fn set(&self, map_name: &str, key: &str, value: String) -> Result<(), CacheError> {
        match self {
            CacheProvider::Moka(c) => c.set(map_name, key, value).await,
            #[cfg(feature = "cache-redis")]
            CacheProvider::Redis(c) => c.set(map_name, key, value).await,
        }
    }

    async fn set_with_ttl(
        &self,
        map_name: &str,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        match self {
            CacheProvider::Moka(c) => c.set_with_ttl(map_name, key, value, ttl).await,
            #[cfg(feature = "cache-redis")]
            CacheProvider::Redis(c) => c.set_with_ttl(map_name, key, value, ttl).await,
        }
    }

    async fn exists(&self, map_name: &str, key: &str) -> Result<bool, CacheError> {
        match self {
            CacheProvider::Moka(c) => c.exists(map_name, key).await,
            #[cfg(feature = "cache-redis")]
            CacheProvider::Redis(c) => c.exists(map_name, key).await,
        }
    }

    async fn remove(&self, map_name: &str, key: &str) -> Result<(), CacheError> {
        match self {
            CacheProvider::Moka(c) => c.remove(map_name, key).await,
            #[cfg(feature = "cache-redis")]
            CacheProvider::Redis(c) => c.remove(map_name, key).await,
        }
    }

    async fn put_if_absent(
        &self,
        map_name: &str,
        key: &str,
        value: String,
    ) -> Result<Option<String>, CacheError> {
        match self {
            CacheProvider::Moka(c) => c.put_if_absent(map_name, key, value).await,
            #[cfg(feature = "cache-redis")]
            CacheProvider::Redis(c) => c.put_if_absent(map_name, key, value).await,
        }
    }

    async fn get_all_entries(
        &self,
        map_name: &str,
    ) -> Result<Vec<(String, String)>, CacheError> {
        match self {
            CacheProvider::Moka(c) => c.get_all_entries(map_name).await,
            #[cfg(feature = "cache-redis")]
            CacheProvider::Redis(c) => c.get_all_entries(map_name).await,
        }
    }

    async fn size(&self, map_name: &str) -> Result<usize, CacheError> {
        match self {
            CacheProvider::Moka(c) => c.size(map_name).await,
            #[cfg(feature = "cache-redis")]
            CacheProvider::Redis(c) => c.size(map_name).await,
        }
    }

    async fn is_healthy(&self) -> bool {
        match self {
            CacheProvider::Moka(c) => c.is_healthy().await,
            #[cfg(feature = "cache-redis")]
            CacheProvider::Redis(c) => c.is_healthy().await,
        }
    }
}

/// Well-known map names (`spec.md` §6), overridable via configuration.
pub mod map_names {
    pub const ORCHESTRATION_CACHE: &str = "orchestration-cache";
    pub const PROCESSOR_HEALTH: &str = "processor-health";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn provider_name_reflects_backend() {
        let provider = CacheProvider::Moka(std::sync::Arc::new(MokaCache::new()));
        assert_eq!(provider.provider_name(), "moka");
    }
}
