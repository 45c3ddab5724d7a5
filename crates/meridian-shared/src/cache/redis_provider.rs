//! Distributed cache provider backed by Redis, used for multi-pod
//! deployments. Map names become key prefixes (`{map_name}:{key}`).

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{Cache, CacheError};

#[derive(Debug, Clone)]
pub struct RedisCache {
    connection: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;
        let connection = client
            .get_connection_manager()
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;
        Ok(Self { connection })
    }

    fn namespaced(map_name: &str, key: &str) -> String {
        format!("{map_name}:{key}")
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, map_name: &str, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(Self::namespaced(map_name, key)).await?;
        Ok(value)
    }

    async fn set(&self, map_name: &str, key: &str, value: String) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        let _: () = conn.set(Self::namespaced(map_name, key), value).await?;
        Ok(())
    }

    async fn set_with_ttl(
        &self,
        map_name: &str,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .set_ex(Self::namespaced(map_name, key), value, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn exists(&self, map_name: &str, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.connection.clone();
        let exists: bool = conn.exists(Self::namespaced(map_name, key)).await?;
        Ok(exists)
    }

    async fn remove(&self, map_name: &str, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        let _: () = conn.del(Self::namespaced(map_name, key)).await?;
        Ok(())
    }

    /// Atomic `SET key value NX` (`spec.md` §4.1).
    async fn put_if_absent(
        &self,
        map_name: &str,
        key: &str,
        value: String,
    ) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection.clone();
        let namespaced = Self::namespaced(map_name, key);
        let stored: bool = redis::cmd("SET")
            .arg(&namespaced)
            .arg(&value)
            .arg("NX")
            .query_async(&mut conn)
            .await?;
        if stored {
            Ok(None)
        } else {
            let existing: Option<String> = conn.get(&namespaced).await?;
            Ok(existing)
        }
    }

    async fn get_all_entries(
        &self,
        map_name: &str,
    ) -> Result<Vec<(String, String)>, CacheError> {
        let mut conn = self.connection.clone();
        let prefix = format!("{map_name}:");
        let pattern = format!("{prefix}*");
        let keys: Vec<String> = conn.keys(pattern).await?;
        let mut entries = Vec::with_capacity(keys.len());
        for namespaced_key in keys {
            let value: Option<String> = conn.get(&namespaced_key).await?;
            if let Some(value) = value {
                let bare_key = namespaced_key
                    .strip_prefix(&prefix)
                    .unwrap_or(&namespaced_key)
                    .to_string();
                entries.push((bare_key, value));
            }
        }
        Ok(entries)
    }

    async fn size(&self, map_name: &str) -> Result<usize, CacheError> {
        Ok(self.get_all_entries(map_name).await?.len())
    }

    async fn is_healthy(&self) -> bool {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }
}
