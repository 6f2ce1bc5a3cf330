//! Key/value cache contract implemented by the Redis and in-process backends.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

use super::error::CacheError;
use super::stats::{Stats, StatsCollector};

/// String key/value store with TTLs and glob pattern deletes.
///
/// Backends honour the disabled pass-through policy: with caching disabled,
/// writes succeed without effect and reads report [`CacheError::Disabled`].
/// A zero TTL means the configured default TTL.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    async fn get(&self, key: &str) -> Result<String, CacheError>;

    /// Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Deletes every key matching the glob `pattern`; returns how many went.
    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Stores `value` only if `key` is absent; reports whether it was stored.
    async fn set_nx(&self, key: &str, value: String, ttl: Duration) -> Result<bool, CacheError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Remaining lifetime of `key`; `None` when it never expires.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError>;

    /// Drops every key in the backend's namespace.
    async fn clear(&self) -> Result<(), CacheError>;

    fn stats_collector(&self) -> &StatsCollector;

    fn stats(&self) -> Stats {
        self.stats_collector().snapshot()
    }
}

impl dyn Cache {
    pub async fn get_json<V>(&self, key: &str) -> Result<V, CacheError>
    where
        V: DeserializeOwned,
    {
        let raw = self.get(key).await?;
        serde_json::from_str(&raw).map_err(|source| {
            self.stats_collector().record_error();
            CacheError::Deserialization {
                key: key.to_string(),
                source,
            }
        })
    }

    pub async fn set_json<V>(&self, key: &str, value: &V, ttl: Duration) -> Result<(), CacheError>
    where
        V: Serialize + ?Sized,
    {
        let raw = serde_json::to_string(value).map_err(|source| {
            self.stats_collector().record_error();
            CacheError::Serialization {
                key: key.to_string(),
                source,
            }
        })?;
        self.set(key, raw, ttl).await
    }
}
