//! Postgres-backed [`Repository`] implementation.
//!
//! One generic [`PostgresStore`] serves every table described by a
//! [`PgEntity`]. Statements are assembled at runtime with `QueryBuilder`;
//! soft-deleted rows stay in the table with `deleted_at` set and are hidden
//! from every read.

mod faqs;
mod schema;
mod sql;
mod testimonials;
mod util;

pub use schema::{Column, ColumnKind, PgEntity};
pub use util::map_sqlx_error;

use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{PgConnection, Postgres, Transaction};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, instrument};

use crate::application::query::{
    BulkOperationResult, FieldUpdates, Filters, PaginatedResult, Pagination, QueryOptions,
};
use crate::application::repos::{RepoError, Repository, TransactionFn};
use crate::config::DatabaseSettings;

use super::error::InfraError;

pub async fn connect(settings: &DatabaseSettings) -> Result<PgPool, InfraError> {
    let url = settings
        .url
        .as_deref()
        .ok_or_else(|| InfraError::configuration("database.url is not set"))?;
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections.get())
        .connect(url)
        .await?;
    info!(
        max_connections = settings.max_connections.get(),
        "Connected to Postgres"
    );
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), InfraError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations applied");
    Ok(())
}

enum Handle {
    Pool(PgPool),
    Transaction(Mutex<Transaction<'static, Postgres>>),
}

enum Conn<'a> {
    Pooled(PoolConnection<Postgres>),
    Transaction(MutexGuard<'a, Transaction<'static, Postgres>>),
}

impl Deref for Conn<'_> {
    type Target = PgConnection;

    fn deref(&self) -> &PgConnection {
        match self {
            Self::Pooled(conn) => &**conn,
            Self::Transaction(tx) => &***tx,
        }
    }
}

impl DerefMut for Conn<'_> {
    fn deref_mut(&mut self) -> &mut PgConnection {
        match self {
            Self::Pooled(conn) => &mut **conn,
            Self::Transaction(tx) => &mut ***tx,
        }
    }
}

pub struct PostgresStore<T> {
    handle: Handle,
    _entity: PhantomData<fn() -> T>,
}

impl<T: PgEntity> PostgresStore<T> {
    pub fn new(pool: PgPool) -> Self {
        Self {
            handle: Handle::Pool(pool),
            _entity: PhantomData,
        }
    }

    fn in_transaction(tx: Transaction<'static, Postgres>) -> Self {
        Self {
            handle: Handle::Transaction(Mutex::new(tx)),
            _entity: PhantomData,
        }
    }

    /// Statements issued through a transaction view serialize on its
    /// single connection.
    async fn conn(&self) -> Result<Conn<'_>, RepoError> {
        match &self.handle {
            Handle::Pool(pool) => pool
                .acquire()
                .await
                .map(Conn::Pooled)
                .map_err(map_sqlx_error),
            Handle::Transaction(tx) => Ok(Conn::Transaction(tx.lock().await)),
        }
    }

    pub async fn health_check(&self) -> Result<(), RepoError> {
        let mut conn = self.conn().await?;
        sqlx::query("SELECT 1")
            .execute(&mut *conn)
            .await
            .map(|_| ())
            .map_err(map_sqlx_error)
    }
}

#[async_trait]
impl<T: PgEntity> Repository<T> for PostgresStore<T> {
    async fn create(&self, entity: T) -> Result<T, RepoError> {
        let mut conn = self.conn().await?;
        sql::insert_one(&mut conn, entity).await
    }

    #[instrument(skip_all, fields(table = T::TABLE, batch = entities.len()))]
    async fn create_batch(&self, entities: Vec<T>) -> Result<BulkOperationResult, RepoError> {
        let mut conn = self.conn().await?;
        sql::insert_each(&mut conn, entities).await
    }

    async fn find_by_id(&self, id: &T::Id) -> Result<T, RepoError> {
        let mut conn = self.conn().await?;
        sql::find_by_id(&mut conn, *id).await
    }

    async fn find_by_ids(&self, ids: &[T::Id]) -> Result<Vec<T>, RepoError> {
        let mut conn = self.conn().await?;
        sql::find_by_ids(&mut conn, ids).await
    }

    async fn update(&self, entity: T) -> Result<T, RepoError> {
        let mut conn = self.conn().await?;
        sql::update_one(&mut conn, entity).await
    }

    #[instrument(skip_all, fields(table = T::TABLE, batch = entities.len()))]
    async fn update_batch(&self, entities: Vec<T>) -> Result<BulkOperationResult, RepoError> {
        let mut conn = self.conn().await?;
        sql::update_each(&mut conn, entities).await
    }

    async fn update_fields(&self, id: &T::Id, fields: FieldUpdates) -> Result<(), RepoError> {
        let mut conn = self.conn().await?;
        sql::update_fields::<T>(&mut conn, *id, &fields).await
    }

    async fn delete(&self, id: &T::Id) -> Result<(), RepoError> {
        let mut conn = self.conn().await?;
        sql::delete_one::<T>(&mut conn, *id).await
    }

    #[instrument(skip_all, fields(table = T::TABLE, batch = ids.len()))]
    async fn delete_batch(&self, ids: &[T::Id]) -> Result<BulkOperationResult, RepoError> {
        let mut conn = self.conn().await?;
        sql::delete_each::<T>(&mut conn, ids).await
    }

    async fn soft_delete(&self, id: &T::Id) -> Result<(), RepoError> {
        let mut conn = self.conn().await?;
        sql::soft_delete::<T>(&mut conn, *id).await
    }

    async fn find_all(&self, options: &QueryOptions) -> Result<Vec<T>, RepoError> {
        let mut conn = self.conn().await?;
        sql::find_all(&mut conn, options).await
    }

    async fn find_one(&self, options: &QueryOptions) -> Result<T, RepoError> {
        let first = QueryOptions {
            pagination: Some(Pagination {
                offset: options.pagination.map_or(0, |p| p.offset),
                limit: 1,
            }),
            ..options.clone()
        };
        let mut conn = self.conn().await?;
        sql::find_all::<T>(&mut conn, &first)
            .await?
            .into_iter()
            .next()
            .ok_or(RepoError::NotFound)
    }

    async fn find_with_pagination(
        &self,
        options: &QueryOptions,
    ) -> Result<PaginatedResult<T>, RepoError> {
        let pagination = options
            .pagination
            .ok_or_else(|| RepoError::invalid_input("pagination is required"))?;
        let mut conn = self.conn().await?;
        let total = sql::count::<T>(&mut conn, &options.filters).await?;
        let items = sql::find_all(&mut conn, options).await?;
        Ok(PaginatedResult::new(items, total, pagination))
    }

    async fn count(&self, filters: &Filters) -> Result<u64, RepoError> {
        let mut conn = self.conn().await?;
        sql::count::<T>(&mut conn, filters).await
    }

    async fn exists(&self, id: &T::Id) -> Result<bool, RepoError> {
        match self.find_by_id(id).await {
            Ok(_) => Ok(true),
            Err(RepoError::NotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn exists_by_fields(&self, filters: &Filters) -> Result<bool, RepoError> {
        let mut conn = self.conn().await?;
        sql::exists_by_fields::<T>(&mut conn, filters).await
    }

    #[instrument(skip_all, fields(table = T::TABLE))]
    async fn with_transaction(&self, work: TransactionFn<T>) -> Result<(), RepoError> {
        let pool = match &self.handle {
            Handle::Pool(pool) => pool,
            Handle::Transaction(_) => {
                return Err(RepoError::transaction(
                    "nested transactions are not supported",
                ));
            }
        };
        let tx = pool.begin().await.map_err(map_sqlx_error)?;
        let view = Self::in_transaction(tx);

        let outcome = work(&view).await;

        let Handle::Transaction(tx) = view.handle else {
            return Err(RepoError::transaction("transaction handle was replaced"));
        };
        let tx = tx.into_inner();
        match outcome {
            Ok(()) => tx
                .commit()
                .await
                .map_err(|err| RepoError::transaction(err.to_string())),
            Err(err) => {
                tx.rollback().await.map_err(map_sqlx_error)?;
                Err(err)
            }
        }
    }

    async fn refresh(&self, entity: &mut T) -> Result<(), RepoError> {
        *entity = self.find_by_id(entity.id()).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), RepoError> {
        let mut conn = self.conn().await?;
        sql::clear::<T>(&mut conn).await
    }
}
