//! Repository contract shared by durable stores and the caching layer.
//!
//! Stores (`infra::memory`, `infra::db`) implement [`Repository`] directly;
//! [`crate::cache::repository::CachedRepository`] wraps any of them and exposes
//! the same surface, so callers cannot tell whether caching is interposed.

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;

use crate::application::query::{
    BulkOperationResult, FieldUpdates, Filters, PaginatedResult, QueryOptions,
};
use crate::domain::entity::Entity;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("resource not found")]
    NotFound,
    #[error("duplicate record violates unique constraint `{constraint}`")]
    AlreadyExists { constraint: String },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("persistence error: {0}")]
    Internal(String),
    #[error("constraint violated: {message}")]
    Constraint { message: String },
    #[error("database timeout")]
    Timeout,
    #[error("transaction failed: {message}")]
    Transaction { message: String },
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Internal(err.to_string())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Unit of work run by [`Repository::with_transaction`].
///
/// The closure receives a repository view bound to the open transaction;
/// returning an error rolls the transaction back.
pub type TransactionFn<T> = Box<
    dyn for<'r> FnOnce(&'r dyn Repository<T>) -> BoxFuture<'r, Result<(), RepoError>> + Send,
>;

/// Boxes a closure as a [`TransactionFn`].
///
/// ```ignore
/// repo.with_transaction(transaction(move |tx| {
///     Box::pin(async move {
///         tx.create(first).await?;
///         tx.create(second).await?;
///         Ok(())
///     })
/// }))
/// .await?;
/// ```
pub fn transaction<T, F>(work: F) -> TransactionFn<T>
where
    T: Entity,
    F: for<'r> FnOnce(&'r dyn Repository<T>) -> BoxFuture<'r, Result<(), RepoError>>
        + Send
        + 'static,
{
    Box::new(work)
}

#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    /// Persists a new entity and returns it with its write timestamps set.
    async fn create(&self, entity: T) -> Result<T, RepoError>;

    async fn create_batch(&self, entities: Vec<T>) -> Result<BulkOperationResult, RepoError>;

    async fn find_by_id(&self, id: &T::Id) -> Result<T, RepoError>;

    /// Returns the live entities among `ids`; unknown ids are skipped.
    async fn find_by_ids(&self, ids: &[T::Id]) -> Result<Vec<T>, RepoError>;

    async fn update(&self, entity: T) -> Result<T, RepoError>;

    async fn update_batch(&self, entities: Vec<T>) -> Result<BulkOperationResult, RepoError>;

    async fn update_fields(&self, id: &T::Id, fields: FieldUpdates) -> Result<(), RepoError>;

    async fn delete(&self, id: &T::Id) -> Result<(), RepoError>;

    async fn delete_batch(&self, ids: &[T::Id]) -> Result<BulkOperationResult, RepoError>;

    /// Hides the entity from every read without removing it from storage.
    async fn soft_delete(&self, id: &T::Id) -> Result<(), RepoError>;

    async fn find_all(&self, options: &QueryOptions) -> Result<Vec<T>, RepoError>;

    async fn find_one(&self, options: &QueryOptions) -> Result<T, RepoError>;

    async fn find_with_pagination(
        &self,
        options: &QueryOptions,
    ) -> Result<PaginatedResult<T>, RepoError>;

    async fn count(&self, filters: &Filters) -> Result<u64, RepoError>;

    async fn exists(&self, id: &T::Id) -> Result<bool, RepoError>;

    async fn exists_by_fields(&self, filters: &Filters) -> Result<bool, RepoError>;

    async fn with_transaction(&self, work: TransactionFn<T>) -> Result<(), RepoError>;

    /// Reloads `entity` from storage in place.
    async fn refresh(&self, entity: &mut T) -> Result<(), RepoError>;

    async fn clear(&self) -> Result<(), RepoError>;
}
