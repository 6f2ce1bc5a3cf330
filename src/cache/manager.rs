//! Typed read-through façade over one cache namespace.
//!
//! A [`CacheManager`] owns the key generator, invalidator and statistics for
//! a single entity type. Reads fall back to caller-supplied loaders; cache
//! failures on those paths are logged and counted, never returned.
//!
//! Every invalidation advances a monotonic epoch. Read-through writes
//! (`get_or_load`, `get_query`, background population) are skipped when the
//! epoch moved while their loader ran, so a value read before a write
//! committed is not written back after that write's invalidation.
//!
//! The epoch check and the write it guards run under a shared gate that
//! invalidations take exclusively. A write already past its check therefore
//! lands before the invalidation deletes it, and a write that has not
//! checked yet observes the new epoch.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::future::join_all;
use metrics::histogram;
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::{RwLock, RwLockWriteGuard};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::backend::Cache;
use super::config::{CacheConfig, InvalidationConfig};
use super::error::CacheError;
use super::invalidation::{InvalidationStrategy, Invalidator};
use super::keys::KeyGenerator;
use super::stats::{Stats, StatsCollector};
use crate::domain::entity::Entity;

pub(crate) const METRIC_CACHE_GET_MULTIPLE_MS: &str = "taxfaq_cache_get_multiple_ms";

pub type Epoch = u64;

pub struct CacheManager<T> {
    cache: Arc<dyn Cache>,
    keys: KeyGenerator<T>,
    invalidator: Invalidator<T>,
    stats: Arc<StatsCollector>,
    config: Arc<CacheConfig>,
    epoch: Arc<AtomicU64>,
    write_gate: Arc<RwLock<()>>,
}

impl<T> Clone for CacheManager<T> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            keys: self.keys.clone(),
            invalidator: self.invalidator.clone(),
            stats: Arc::clone(&self.stats),
            config: Arc::clone(&self.config),
            epoch: Arc::clone(&self.epoch),
            write_gate: Arc::clone(&self.write_gate),
        }
    }
}

impl<T: Entity> CacheManager<T> {
    pub fn new(
        cache: Arc<dyn Cache>,
        keys: KeyGenerator<T>,
        config: Arc<CacheConfig>,
        invalidation: &InvalidationConfig,
    ) -> Self {
        let invalidator = Invalidator::new(Arc::clone(&cache), keys.clone(), invalidation);
        let stats = Arc::new(StatsCollector::with_metrics(
            config.enable_statistics,
            keys.prefix(),
        ));
        Self {
            cache,
            keys,
            invalidator,
            stats,
            config,
            epoch: Arc::new(AtomicU64::new(0)),
            write_gate: Arc::new(RwLock::new(())),
        }
    }

    pub fn keys(&self) -> &KeyGenerator<T> {
        &self.keys
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn strategy(&self) -> &InvalidationStrategy {
        self.invalidator.strategy()
    }

    pub fn stats(&self) -> Stats {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    pub fn query_key<P>(&self, shape: &str, params: &P) -> String
    where
        P: Serialize + ?Sized,
    {
        self.keys.query_key(shape, params)
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Identity lookup. Misses are not populated.
    pub async fn get(&self, id: &T::Id) -> Result<T, CacheError> {
        let key = self.keys.key_by_id(id);
        match self.cache.get_json::<T>(&key).await {
            Ok(entity) => {
                self.stats.record_hit();
                Ok(entity)
            }
            Err(err) => {
                self.stats.record_miss();
                if !err.is_miss() {
                    self.stats.record_error();
                    warn!(op = "get", key = %key, error = %err, "Cache read failed; treating as miss");
                }
                Err(err)
            }
        }
    }

    /// Cached entity, or the loader's result cached with the default TTL.
    pub async fn get_or_load<F, Fut, E>(&self, id: &T::Id, loader: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let epoch = self.epoch();
        if let Ok(entity) = self.get(id).await {
            return Ok(entity);
        }

        let entity = loader().await?;
        self.set_if_current(&entity, epoch).await;
        Ok(entity)
    }

    /// Looks every id up concurrently, loads the misses with a single
    /// `loader` call and returns the entities in input order.
    ///
    /// Ids found neither in cache nor by the loader are dropped. Loaded
    /// entities are cached by a detached task; dropping the returned future
    /// aborts the outstanding lookups but not that task.
    pub async fn get_multiple<F, Fut, E>(&self, ids: &[T::Id], loader: F) -> Result<Vec<T>, E>
    where
        F: FnOnce(Vec<T::Id>) -> Fut,
        Fut: Future<Output = Result<HashMap<T::Id, T>, E>>,
    {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let started_at = Instant::now();
        let epoch = self.epoch();

        let mut lookups = JoinSet::new();
        for id in ids {
            let manager = self.clone();
            let id = id.clone();
            lookups.spawn(async move {
                let cached = manager.get(&id).await.ok();
                (id, cached)
            });
        }

        let mut found: HashMap<T::Id, T> = HashMap::with_capacity(ids.len());
        while let Some(joined) = lookups.join_next().await {
            match joined {
                Ok((id, Some(entity))) => {
                    found.insert(id, entity);
                }
                Ok((_, None)) => {}
                Err(err) => {
                    warn!(op = "get_multiple", error = %err, "Cache lookup task failed");
                }
            }
        }

        let mut requested = HashSet::new();
        let mut missing = Vec::new();
        for id in ids {
            if !found.contains_key(id) && requested.insert(id) {
                missing.push(id.clone());
            }
        }

        let hits = found.len();
        if !missing.is_empty() {
            let loaded = loader(missing).await?;
            self.populate_from(loaded.values().cloned().collect(), epoch);
            found.extend(loaded);
        }

        debug!(
            prefix = self.keys.prefix(),
            requested = ids.len(),
            hits,
            "Cache multi-get complete"
        );
        histogram!(METRIC_CACHE_GET_MULTIPLE_MS, "namespace" => self.keys.prefix().to_string())
            .record(started_at.elapsed().as_secs_f64() * 1000.0);

        Ok(ids.iter().filter_map(|id| found.get(id).cloned()).collect())
    }

    /// Read-through for results that are not keyed by entity identity.
    ///
    /// With caching disabled the loader is always called. A zero `ttl` means
    /// the default TTL.
    pub async fn get_query<R, F, Fut, E>(&self, key: &str, ttl: Duration, loader: F) -> Result<R, E>
    where
        R: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        if !self.config.enabled {
            return loader().await;
        }

        let epoch = self.epoch();
        match self.cache.get_json::<R>(key).await {
            Ok(cached) => {
                self.stats.record_hit();
                return Ok(cached);
            }
            Err(err) => {
                self.stats.record_miss();
                if !err.is_miss() {
                    self.stats.record_error();
                    warn!(op = "get_query", key, error = %err, "Cache read failed; treating as miss");
                }
            }
        }

        let value = loader().await?;
        let _gate = self.write_gate.read().await;
        if self.epoch() != epoch {
            debug!(op = "get_query", key, "Skipping cache write after concurrent invalidation");
            return Ok(value);
        }
        match self
            .cache
            .set_json(key, &value, self.config.resolve_ttl(ttl))
            .await
        {
            Ok(()) => self.stats.record_set(),
            Err(err) => {
                self.stats.record_error();
                warn!(op = "get_query", key, error = %err, "Failed to cache query result");
            }
        }
        Ok(value)
    }

    /// Writes `entity` under its identity key. Failures are returned.
    pub async fn set(&self, entity: &T, ttl: Duration) -> Result<(), CacheError> {
        if !self.config.enabled {
            return Ok(());
        }
        let key = self.keys.key(entity);
        match self
            .cache
            .set_json(&key, entity, self.config.resolve_ttl(ttl))
            .await
        {
            Ok(()) => {
                self.stats.record_set();
                Ok(())
            }
            Err(err) => {
                self.stats.record_error();
                Err(err)
            }
        }
    }

    /// Caches `entities` from a detached task bounded by the populate timeout.
    pub fn populate(&self, entities: Vec<T>) {
        self.populate_from(entities, self.epoch());
    }

    fn populate_from(&self, entities: Vec<T>, epoch: Epoch) {
        if entities.is_empty() || !self.config.enabled {
            return;
        }
        let manager = self.clone();
        let limit = self.config.populate_timeout;
        tokio::spawn(async move {
            let work = join_all(
                entities
                    .iter()
                    .map(|entity| manager.set_if_current(entity, epoch)),
            );
            if tokio::time::timeout(limit, work).await.is_err() {
                warn!(
                    prefix = manager.keys.prefix(),
                    timeout_ms = limit.as_millis() as u64,
                    "Background cache population timed out"
                );
            }
        });
    }

    async fn set_if_current(&self, entity: &T, epoch: Epoch) {
        let _gate = self.write_gate.read().await;
        if self.epoch() != epoch {
            debug!(
                prefix = self.keys.prefix(),
                "Skipping cache population after concurrent invalidation"
            );
            return;
        }
        if let Err(err) = self.set(entity, Duration::ZERO).await {
            warn!(
                op = "populate",
                key = %self.keys.key(entity),
                error = %err,
                "Failed to cache entity"
            );
        }
    }

    pub async fn invalidate(&self, entity: &T) -> Result<(), CacheError> {
        let _gate = self.begin_invalidation().await;
        let result = self.invalidator.invalidate_entity(entity).await;
        self.track_deletes(result)
    }

    pub async fn invalidate_multiple(&self, entities: &[T]) -> Result<(), CacheError> {
        if entities.is_empty() {
            return Ok(());
        }
        let _gate = self.begin_invalidation().await;
        let result = self.invalidator.invalidate_batch(entities).await;
        self.track_deletes(result)
    }

    pub async fn invalidate_by_id(&self, id: &T::Id) -> Result<(), CacheError> {
        let _gate = self.begin_invalidation().await;
        let result = self.invalidator.invalidate_by_id(id).await;
        self.track_deletes(result)
    }

    /// Purges query results: everything when aggressive, the registered
    /// query-key shapes when selective.
    pub async fn invalidate_queries(&self) -> Result<(), CacheError> {
        let _gate = self.begin_invalidation().await;
        let result = self.invalidator.invalidate_queries().await;
        self.track_deletes(result)
    }

    pub async fn invalidate_query(&self, key: &str) -> Result<(), CacheError> {
        let _gate = self.begin_invalidation().await;
        let result = self.cache.delete(key).await.map(|()| 1);
        self.track_deletes(result)
    }

    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<(), CacheError> {
        let _gate = self.begin_invalidation().await;
        let result = self.cache.delete_pattern(pattern).await;
        self.track_deletes(result)
    }

    pub async fn invalidate_all(&self) -> Result<(), CacheError> {
        let _gate = self.begin_invalidation().await;
        let result = self.invalidator.invalidate_all().await;
        self.track_deletes(result)
    }

    /// Waits for in-flight read-through writes, then advances the epoch.
    /// Hold the guard until the invalidation has finished deleting.
    async fn begin_invalidation(&self) -> RwLockWriteGuard<'_, ()> {
        let gate = self.write_gate.write().await;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        gate
    }

    fn track_deletes(&self, result: Result<u64, CacheError>) -> Result<(), CacheError> {
        match result {
            Ok(count) => {
                self.stats.record_deletes(count);
                Ok(())
            }
            Err(err) => {
                self.stats.record_error();
                Err(err)
            }
        }
    }
}
