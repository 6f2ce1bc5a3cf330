//! Repository decorator that layers read-through caching over any store.
//!
//! Reads are served by the [`CacheManager`] and fall back to the store on any
//! cache failure. Writes go to the store first; invalidation runs only after
//! the store succeeded and its failures are logged, never returned.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{instrument, warn};

use super::error::CacheError;
use super::keys::{SHAPE_ALL, SHAPE_COUNT, SHAPE_EXISTS, SHAPE_ONE, SHAPE_PAGINATED};
use super::manager::CacheManager;
use crate::application::query::{
    BulkOperationResult, FieldUpdates, Filters, PaginatedResult, QueryOptions,
};
use crate::application::repos::{RepoError, Repository, TransactionFn};
use crate::domain::entity::Entity;

pub struct CachedRepository<T> {
    store: Arc<dyn Repository<T>>,
    cache: CacheManager<T>,
}

impl<T: Entity> CachedRepository<T> {
    pub fn new(store: Arc<dyn Repository<T>>, cache: CacheManager<T>) -> Self {
        Self { store, cache }
    }

    pub fn cache(&self) -> &CacheManager<T> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn Repository<T>> {
        &self.store
    }

    fn query_ttl(&self, options: &QueryOptions) -> Duration {
        let config = self.cache.config();
        if options.is_filtered() {
            config.short_ttl
        } else {
            config.default_ttl
        }
    }

    fn filters_ttl(&self, filters: &Filters) -> Duration {
        let config = self.cache.config();
        if filters.is_empty() {
            config.default_ttl
        } else {
            config.short_ttl
        }
    }

    fn log_failure(&self, op: &'static str, result: Result<(), CacheError>) {
        if let Err(err) = result {
            warn!(
                op,
                prefix = self.cache.keys().prefix(),
                error = %err,
                "Cache invalidation failed after successful write"
            );
        }
    }

    /// Identity keys by id, then the query results the strategy covers.
    async fn invalidate_ids(&self, op: &'static str, ids: &[T::Id]) {
        for id in ids {
            self.log_failure(op, self.cache.invalidate_by_id(id).await);
        }
        self.log_failure(op, self.cache.invalidate_queries().await);
    }

    fn processed<I: Clone>(items: &[I], result: &BulkOperationResult) -> Vec<I> {
        items
            .iter()
            .enumerate()
            .filter(|(index, _)| result.succeeded(*index))
            .map(|(_, item)| item.clone())
            .collect()
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for CachedRepository<T> {
    #[instrument(skip_all, fields(prefix = self.cache.keys().prefix()))]
    async fn create(&self, entity: T) -> Result<T, RepoError> {
        let created = self.store.create(entity).await?;
        self.log_failure("create", self.cache.invalidate(&created).await);
        Ok(created)
    }

    #[instrument(skip_all, fields(prefix = self.cache.keys().prefix(), batch = entities.len()))]
    async fn create_batch(&self, entities: Vec<T>) -> Result<BulkOperationResult, RepoError> {
        let result = self.store.create_batch(entities.clone()).await?;
        let processed = Self::processed(&entities, &result);
        self.log_failure(
            "create_batch",
            self.cache.invalidate_multiple(&processed).await,
        );
        Ok(result)
    }

    async fn find_by_id(&self, id: &T::Id) -> Result<T, RepoError> {
        self.cache
            .get_or_load(id, || self.store.find_by_id(id))
            .await
    }

    #[instrument(skip_all, fields(prefix = self.cache.keys().prefix(), requested = ids.len()))]
    async fn find_by_ids(&self, ids: &[T::Id]) -> Result<Vec<T>, RepoError> {
        let store = &self.store;
        self.cache
            .get_multiple(ids, |missing| async move {
                let loaded = store.find_by_ids(&missing).await?;
                Ok::<_, RepoError>(
                    loaded
                        .into_iter()
                        .map(|entity| (entity.id().clone(), entity))
                        .collect(),
                )
            })
            .await
    }

    #[instrument(skip_all, fields(prefix = self.cache.keys().prefix()))]
    async fn update(&self, entity: T) -> Result<T, RepoError> {
        let updated = self.store.update(entity).await?;
        self.log_failure("update", self.cache.invalidate(&updated).await);
        Ok(updated)
    }

    #[instrument(skip_all, fields(prefix = self.cache.keys().prefix(), batch = entities.len()))]
    async fn update_batch(&self, entities: Vec<T>) -> Result<BulkOperationResult, RepoError> {
        let result = self.store.update_batch(entities.clone()).await?;
        let processed = Self::processed(&entities, &result);
        self.log_failure(
            "update_batch",
            self.cache.invalidate_multiple(&processed).await,
        );
        Ok(result)
    }

    async fn update_fields(&self, id: &T::Id, fields: FieldUpdates) -> Result<(), RepoError> {
        self.store.update_fields(id, fields).await?;
        self.invalidate_ids("update_fields", std::slice::from_ref(id))
            .await;
        Ok(())
    }

    #[instrument(skip_all, fields(prefix = self.cache.keys().prefix(), id = %id))]
    async fn delete(&self, id: &T::Id) -> Result<(), RepoError> {
        self.store.delete(id).await?;
        self.invalidate_ids("delete", std::slice::from_ref(id)).await;
        Ok(())
    }

    #[instrument(skip_all, fields(prefix = self.cache.keys().prefix(), batch = ids.len()))]
    async fn delete_batch(&self, ids: &[T::Id]) -> Result<BulkOperationResult, RepoError> {
        let result = self.store.delete_batch(ids).await?;
        let processed = Self::processed(ids, &result);
        self.invalidate_ids("delete_batch", &processed).await;
        Ok(result)
    }

    async fn soft_delete(&self, id: &T::Id) -> Result<(), RepoError> {
        self.store.soft_delete(id).await?;
        self.invalidate_ids("soft_delete", std::slice::from_ref(id))
            .await;
        Ok(())
    }

    async fn find_all(&self, options: &QueryOptions) -> Result<Vec<T>, RepoError> {
        let key = self.cache.query_key(SHAPE_ALL, options);
        self.cache
            .get_query(&key, self.query_ttl(options), || async {
                let items = self.store.find_all(options).await?;
                self.cache.populate(items.clone());
                Ok::<_, RepoError>(items)
            })
            .await
    }

    async fn find_one(&self, options: &QueryOptions) -> Result<T, RepoError> {
        let key = self.cache.query_key(SHAPE_ONE, options);
        self.cache
            .get_query(&key, self.query_ttl(options), || {
                self.store.find_one(options)
            })
            .await
    }

    async fn find_with_pagination(
        &self,
        options: &QueryOptions,
    ) -> Result<PaginatedResult<T>, RepoError> {
        let key = self.cache.query_key(SHAPE_PAGINATED, options);
        self.cache
            .get_query(&key, self.cache.config().short_ttl, || async {
                let page = self.store.find_with_pagination(options).await?;
                self.cache.populate(page.items.clone());
                Ok::<_, RepoError>(page)
            })
            .await
    }

    async fn count(&self, filters: &Filters) -> Result<u64, RepoError> {
        let key = self.cache.query_key(SHAPE_COUNT, filters);
        self.cache
            .get_query(&key, self.filters_ttl(filters), || self.store.count(filters))
            .await
    }

    async fn exists(&self, id: &T::Id) -> Result<bool, RepoError> {
        if self.cache.get(id).await.is_ok() {
            return Ok(true);
        }
        self.store.exists(id).await
    }

    async fn exists_by_fields(&self, filters: &Filters) -> Result<bool, RepoError> {
        let key = self.cache.query_key(SHAPE_EXISTS, filters);
        self.cache
            .get_query(&key, self.cache.config().short_ttl, || {
                self.store.exists_by_fields(filters)
            })
            .await
    }

    /// Writes made inside the transaction bypass the cache; the whole
    /// namespace is invalidated once it commits.
    #[instrument(skip_all, fields(prefix = self.cache.keys().prefix()))]
    async fn with_transaction(&self, work: TransactionFn<T>) -> Result<(), RepoError> {
        self.store.with_transaction(work).await?;
        self.log_failure("with_transaction", self.cache.invalidate_all().await);
        Ok(())
    }

    async fn refresh(&self, entity: &mut T) -> Result<(), RepoError> {
        self.log_failure("refresh", self.cache.invalidate_by_id(entity.id()).await);
        self.store.refresh(entity).await?;
        if let Err(err) = self.cache.set(entity, Duration::ZERO).await {
            warn!(
                op = "refresh",
                key = %self.cache.keys().key(entity),
                error = %err,
                "Failed to cache refreshed entity"
            );
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), RepoError> {
        self.store.clear().await?;
        self.log_failure("clear", self.cache.invalidate_all().await);
        self.cache.reset_stats();
        Ok(())
    }
}
