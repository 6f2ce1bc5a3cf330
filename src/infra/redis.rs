//! Redis-backed [`Cache`].
//!
//! Keys are stored under the configured key prefix. Pattern deletes walk the
//! keyspace with `SCAN MATCH` and delete in batches; [`Cache::clear`] removes
//! only this cache's namespace, never the whole database.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::RedisResult;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use crate::cache::{Cache, CacheConfig, CacheError, StatsCollector};
use crate::config::RedisSettings;

use super::error::InfraError;

const SCAN_BATCH: u64 = 200;

pub struct RedisCache {
    conn: ConnectionManager,
    config: Arc<CacheConfig>,
    key_prefix: String,
    namespace: String,
    operation_timeout: Duration,
    stats: StatsCollector,
}

impl RedisCache {
    /// Opens a self-reconnecting connection shared by every namespace.
    pub async fn connect(settings: &RedisSettings) -> Result<ConnectionManager, InfraError> {
        let client = redis::Client::open(settings.url.as_str())?;
        let conn = ConnectionManager::new(client).await?;
        info!(key_prefix = %settings.key_prefix, "Connected to Redis");
        Ok(conn)
    }

    pub fn new(
        conn: ConnectionManager,
        config: Arc<CacheConfig>,
        settings: &RedisSettings,
        namespace: impl Into<String>,
    ) -> Self {
        let stats = StatsCollector::new(config.enable_statistics);
        Self {
            conn,
            config,
            key_prefix: settings.key_prefix.clone(),
            namespace: namespace.into(),
            operation_timeout: Duration::from_millis(settings.operation_timeout_ms.get()),
            stats,
        }
    }

    fn physical_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn run<V, F>(&self, op: &'static str, key: &str, command: F) -> Result<V, CacheError>
    where
        F: Future<Output = RedisResult<V>>,
    {
        match tokio::time::timeout(self.operation_timeout, command).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                self.stats.record_error();
                Err(CacheError::backend(op, key, err))
            }
            Err(_) => {
                self.stats.record_error();
                Err(CacheError::backend(
                    op,
                    key,
                    format!(
                        "timed out after {}ms",
                        self.operation_timeout.as_millis()
                    ),
                ))
            }
        }
    }

    async fn scan_delete(&self, op: &'static str, pattern: &str) -> Result<u64, CacheError> {
        let physical = self.physical_key(pattern);
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = self
                .run(op, pattern, async {
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&physical)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn)
                        .await
                })
                .await?;
            if !keys.is_empty() {
                let deleted: u64 = self
                    .run(op, pattern, async {
                        redis::cmd("DEL").arg(&keys).query_async(&mut conn).await
                    })
                    .await?;
                removed += deleted;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        debug!(op, pattern = %physical, removed, "Deleted keys by pattern");
        Ok(removed)
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

/// Interprets a `PTTL` reply: `-2` missing key, `-1` no expiry.
fn ttl_from_pttl(key: &str, millis: i64) -> Result<Option<Duration>, CacheError> {
    match millis {
        -2 => Err(CacheError::miss(key)),
        -1 => Ok(None),
        ms => Ok(Some(Duration::from_millis(ms.max(0) as u64))),
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        if !self.config.enabled {
            return Ok(());
        }
        let physical = self.physical_key(key);
        let millis = ttl_millis(self.config.resolve_ttl(ttl));
        let mut conn = self.conn.clone();
        let () = self
            .run("set", key, async {
                redis::cmd("SET")
                    .arg(&physical)
                    .arg(&value)
                    .arg("PX")
                    .arg(millis)
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        self.stats.record_set();
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<String, CacheError> {
        if !self.config.enabled {
            return Err(CacheError::Disabled);
        }
        let physical = self.physical_key(key);
        let mut conn = self.conn.clone();
        let value: Option<String> = self
            .run("get", key, async {
                redis::cmd("GET").arg(&physical).query_async(&mut conn).await
            })
            .await?;
        match value {
            Some(value) => {
                self.stats.record_hit();
                Ok(value)
            }
            None => {
                self.stats.record_miss();
                Err(CacheError::miss(key))
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let physical = self.physical_key(key);
        let mut conn = self.conn.clone();
        let deleted: u64 = self
            .run("delete", key, async {
                redis::cmd("DEL").arg(&physical).query_async(&mut conn).await
            })
            .await?;
        self.stats.record_deletes(deleted);
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let removed = self.scan_delete("delete_pattern", pattern).await?;
        self.stats.record_deletes(removed);
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        if !self.config.enabled {
            return Ok(false);
        }
        let physical = self.physical_key(key);
        let mut conn = self.conn.clone();
        let count: u64 = self
            .run("exists", key, async {
                redis::cmd("EXISTS").arg(&physical).query_async(&mut conn).await
            })
            .await?;
        Ok(count > 0)
    }

    async fn set_nx(&self, key: &str, value: String, ttl: Duration) -> Result<bool, CacheError> {
        if !self.config.enabled {
            return Ok(false);
        }
        let physical = self.physical_key(key);
        let millis = ttl_millis(self.config.resolve_ttl(ttl));
        let mut conn = self.conn.clone();
        let reply: Option<String> = self
            .run("set_nx", key, async {
                redis::cmd("SET")
                    .arg(&physical)
                    .arg(&value)
                    .arg("PX")
                    .arg(millis)
                    .arg("NX")
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        let stored = reply.is_some();
        if stored {
            self.stats.record_set();
        }
        Ok(stored)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        let physical = self.physical_key(key);
        let millis = ttl_millis(ttl);
        let mut conn = self.conn.clone();
        let updated: u64 = self
            .run("expire", key, async {
                redis::cmd("PEXPIRE")
                    .arg(&physical)
                    .arg(millis)
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        if updated == 0 {
            return Err(CacheError::miss(key));
        }
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        let physical = self.physical_key(key);
        let mut conn = self.conn.clone();
        let millis: i64 = self
            .run("ttl", key, async {
                redis::cmd("PTTL").arg(&physical).query_async(&mut conn).await
            })
            .await?;
        ttl_from_pttl(key, millis)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let pattern = format!("{}:*", self.namespace);
        let removed = self.scan_delete("clear", &pattern).await?;
        self.stats.record_deletes(removed);
        Ok(())
    }

    fn stats_collector(&self) -> &StatsCollector {
        &self.stats
    }
}
