//! Invalidation strategies and the invalidator that runs them.

use std::sync::Arc;

use futures::future::try_join_all;

use super::backend::Cache;
use super::config::{InvalidationConfig, InvalidationMode};
use super::error::CacheError;
use super::keys::KeyGenerator;
use crate::domain::entity::Entity;

/// What a mutation purges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationStrategy {
    /// Clear the whole namespace regardless of which entities changed.
    Aggressive,
    /// Delete each entity's identity key, then every related pattern.
    Selective { related_patterns: Vec<String> },
}

impl InvalidationStrategy {
    pub fn from_config<T: Entity>(config: &InvalidationConfig, keys: &KeyGenerator<T>) -> Self {
        match config.mode {
            InvalidationMode::Aggressive => InvalidationStrategy::Aggressive,
            InvalidationMode::Selective => InvalidationStrategy::Selective {
                related_patterns: if config.invalidate_related {
                    keys.shape_patterns()
                } else {
                    Vec::new()
                },
            },
        }
    }

    pub fn mode(&self) -> InvalidationMode {
        match self {
            InvalidationStrategy::Aggressive => InvalidationMode::Aggressive,
            InvalidationStrategy::Selective { .. } => InvalidationMode::Selective,
        }
    }

    /// Returns the number of identity keys and pattern sweeps issued.
    pub async fn execute<T: Entity>(
        &self,
        cache: &dyn Cache,
        keys: &KeyGenerator<T>,
        entities: &[T],
        batch_size: usize,
    ) -> Result<u64, CacheError> {
        match self {
            InvalidationStrategy::Aggressive => {
                cache.clear().await?;
                Ok(1)
            }
            InvalidationStrategy::Selective { related_patterns } => {
                let identity: Vec<String> = entities.iter().map(|e| keys.key(e)).collect();
                for chunk in identity.chunks(batch_size.max(1)) {
                    try_join_all(chunk.iter().map(|key| cache.delete(key))).await?;
                }
                for pattern in related_patterns {
                    cache.delete_pattern(pattern).await?;
                }
                Ok((identity.len() + related_patterns.len()) as u64)
            }
        }
    }
}

/// Runs the configured strategy against one namespace.
pub struct Invalidator<T> {
    cache: Arc<dyn Cache>,
    keys: KeyGenerator<T>,
    strategy: InvalidationStrategy,
    batch_size: usize,
}

impl<T> Clone for Invalidator<T> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            keys: self.keys.clone(),
            strategy: self.strategy.clone(),
            batch_size: self.batch_size,
        }
    }
}

impl<T: Entity> Invalidator<T> {
    pub fn new(cache: Arc<dyn Cache>, keys: KeyGenerator<T>, config: &InvalidationConfig) -> Self {
        let strategy = InvalidationStrategy::from_config(config, &keys);
        Self {
            cache,
            keys,
            strategy,
            batch_size: config.batch_size,
        }
    }

    pub fn strategy(&self) -> &InvalidationStrategy {
        &self.strategy
    }

    pub async fn invalidate_entity(&self, entity: &T) -> Result<u64, CacheError> {
        self.invalidate_batch(std::slice::from_ref(entity)).await
    }

    pub async fn invalidate_batch(&self, entities: &[T]) -> Result<u64, CacheError> {
        self.strategy
            .execute(self.cache.as_ref(), &self.keys, entities, self.batch_size)
            .await
    }

    /// Deletes the identity key only, bypassing the strategy.
    pub async fn invalidate_by_id(&self, id: &T::Id) -> Result<u64, CacheError> {
        self.cache.delete(&self.keys.key_by_id(id)).await?;
        Ok(1)
    }

    /// Runs the strategy with no entities: a full clear when aggressive, a
    /// sweep of the related patterns when selective.
    pub async fn invalidate_queries(&self) -> Result<u64, CacheError> {
        self.invalidate_batch(&[]).await
    }

    pub async fn invalidate_all(&self) -> Result<u64, CacheError> {
        self.cache.clear().await?;
        Ok(1)
    }
}
