//! In-process [`Repository`] used for tests, demos and cache-only deployments.
//!
//! Filters and sort keys address the entity's serialized JSON fields.
//! Transactions run against a private copy of the state that replaces the
//! live state only when the work succeeds.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::application::query::{
    BulkOperationResult, FieldUpdates, Filters, Pagination, PaginatedResult, QueryOptions, SortBy,
    SortOrder,
};
use crate::application::repos::{RepoError, Repository, TransactionFn};
use crate::cache::{rw_read, rw_write};
use crate::domain::entity::Entity;

const SOURCE: &str = "infra::memory";

/// Fields `update_fields` refuses to touch.
const IMMUTABLE_FIELDS: [&str; 3] = ["id", "created_at", "updated_at"];

struct Row<T> {
    entity: T,
    deleted_at: Option<OffsetDateTime>,
}

impl<T: Clone> Clone for Row<T> {
    fn clone(&self) -> Self {
        Self {
            entity: self.entity.clone(),
            deleted_at: self.deleted_at,
        }
    }
}

impl<T> Row<T> {
    fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

type Rows<T> = HashMap<<T as Entity>::Id, Row<T>>;

pub struct MemoryStore<T: Entity> {
    rows: Arc<RwLock<Rows<T>>>,
    writer: Mutex<()>,
    in_transaction: bool,
}

impl<T: Entity> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> MemoryStore<T> {
    pub fn new() -> Self {
        Self::from_rows(HashMap::new(), false)
    }

    fn from_rows(rows: Rows<T>, in_transaction: bool) -> Self {
        Self {
            rows: Arc::new(RwLock::new(rows)),
            writer: Mutex::new(()),
            in_transaction,
        }
    }

    /// Number of rows, soft-deleted ones included.
    pub fn len(&self) -> usize {
        rw_read(&self.rows, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live(&self, id: &T::Id) -> Result<T, RepoError> {
        rw_read(&self.rows, SOURCE, "live")
            .get(id)
            .filter(|row| row.is_live())
            .map(|row| row.entity.clone())
            .ok_or(RepoError::NotFound)
    }

    fn insert_new(rows: &mut Rows<T>, mut entity: T) -> Result<T, RepoError> {
        if rows.contains_key(entity.id()) {
            return Err(RepoError::AlreadyExists {
                constraint: "primary_key".to_string(),
            });
        }
        let now = OffsetDateTime::now_utc();
        entity.set_created_at(now);
        entity.set_updated_at(now);
        rows.insert(
            entity.id().clone(),
            Row {
                entity: entity.clone(),
                deleted_at: None,
            },
        );
        Ok(entity)
    }

    fn replace(rows: &mut Rows<T>, mut entity: T) -> Result<T, RepoError> {
        let row = rows
            .get_mut(entity.id())
            .filter(|row| row.is_live())
            .ok_or(RepoError::NotFound)?;
        entity.set_created_at(row.entity.created_at());
        entity.set_updated_at(OffsetDateTime::now_utc());
        row.entity = entity.clone();
        Ok(entity)
    }

    fn remove(rows: &mut Rows<T>, id: &T::Id) -> Result<(), RepoError> {
        if !rows.get(id).is_some_and(Row::is_live) {
            return Err(RepoError::NotFound);
        }
        rows.remove(id);
        Ok(())
    }

    fn select(&self, filters: &Filters) -> Result<Vec<T>, RepoError> {
        let rows = rw_read(&self.rows, SOURCE, "select");
        let mut selected = Vec::new();
        for row in rows.values().filter(|row| row.is_live()) {
            if matches_filters(&row.entity, filters)? {
                selected.push(row.entity.clone());
            }
        }
        Ok(selected)
    }

    fn query(&self, options: &QueryOptions) -> Result<Vec<T>, RepoError> {
        let mut items = self.select(&options.filters)?;
        sort_entities(&mut items, &options.sort_by)?;
        Ok(match options.pagination {
            Some(Pagination { offset, limit }) => items
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .collect(),
            None => items,
        })
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for MemoryStore<T> {
    async fn create(&self, entity: T) -> Result<T, RepoError> {
        let _writer = self.writer.lock().await;
        Self::insert_new(&mut rw_write(&self.rows, SOURCE, "create"), entity)
    }

    async fn create_batch(&self, entities: Vec<T>) -> Result<BulkOperationResult, RepoError> {
        let _writer = self.writer.lock().await;
        let mut rows = rw_write(&self.rows, SOURCE, "create_batch");
        let mut result = BulkOperationResult::default();
        for (index, entity) in entities.into_iter().enumerate() {
            match Self::insert_new(&mut rows, entity) {
                Ok(_) => result.record_success(),
                Err(err) => result.record_failure(index, err.to_string()),
            }
        }
        Ok(result)
    }

    async fn find_by_id(&self, id: &T::Id) -> Result<T, RepoError> {
        self.live(id)
    }

    async fn find_by_ids(&self, ids: &[T::Id]) -> Result<Vec<T>, RepoError> {
        let rows = rw_read(&self.rows, SOURCE, "find_by_ids");
        Ok(ids
            .iter()
            .filter_map(|id| rows.get(id))
            .filter(|row| row.is_live())
            .map(|row| row.entity.clone())
            .collect())
    }

    async fn update(&self, entity: T) -> Result<T, RepoError> {
        let _writer = self.writer.lock().await;
        Self::replace(&mut rw_write(&self.rows, SOURCE, "update"), entity)
    }

    async fn update_batch(&self, entities: Vec<T>) -> Result<BulkOperationResult, RepoError> {
        let _writer = self.writer.lock().await;
        let mut rows = rw_write(&self.rows, SOURCE, "update_batch");
        let mut result = BulkOperationResult::default();
        for (index, entity) in entities.into_iter().enumerate() {
            match Self::replace(&mut rows, entity) {
                Ok(_) => result.record_success(),
                Err(err) => result.record_failure(index, err.to_string()),
            }
        }
        Ok(result)
    }

    async fn update_fields(&self, id: &T::Id, fields: FieldUpdates) -> Result<(), RepoError> {
        let _writer = self.writer.lock().await;
        let mut rows = rw_write(&self.rows, SOURCE, "update_fields");
        let row = rows
            .get_mut(id)
            .filter(|row| row.is_live())
            .ok_or(RepoError::NotFound)?;

        let mut patched = document(&row.entity)?;
        for (field, value) in fields {
            if IMMUTABLE_FIELDS.contains(&field.as_str()) {
                return Err(RepoError::invalid_input(format!(
                    "field `{field}` cannot be updated"
                )));
            }
            match patched.get_mut(&field) {
                Some(slot) => *slot = value,
                None => {
                    return Err(RepoError::invalid_input(format!("unknown field `{field}`")));
                }
            }
        }
        let mut updated: T = serde_json::from_value(Value::Object(patched))
            .map_err(|err| RepoError::invalid_input(err.to_string()))?;
        updated.set_updated_at(OffsetDateTime::now_utc());
        row.entity = updated;
        Ok(())
    }

    async fn delete(&self, id: &T::Id) -> Result<(), RepoError> {
        let _writer = self.writer.lock().await;
        Self::remove(&mut rw_write(&self.rows, SOURCE, "delete"), id)
    }

    async fn delete_batch(&self, ids: &[T::Id]) -> Result<BulkOperationResult, RepoError> {
        let _writer = self.writer.lock().await;
        let mut rows = rw_write(&self.rows, SOURCE, "delete_batch");
        let mut result = BulkOperationResult::default();
        for (index, id) in ids.iter().enumerate() {
            match Self::remove(&mut rows, id) {
                Ok(()) => result.record_success(),
                Err(err) => result.record_failure(index, err.to_string()),
            }
        }
        Ok(result)
    }

    async fn soft_delete(&self, id: &T::Id) -> Result<(), RepoError> {
        let _writer = self.writer.lock().await;
        let mut rows = rw_write(&self.rows, SOURCE, "soft_delete");
        let row = rows
            .get_mut(id)
            .filter(|row| row.is_live())
            .ok_or(RepoError::NotFound)?;
        row.deleted_at = Some(OffsetDateTime::now_utc());
        Ok(())
    }

    async fn find_all(&self, options: &QueryOptions) -> Result<Vec<T>, RepoError> {
        self.query(options)
    }

    async fn find_one(&self, options: &QueryOptions) -> Result<T, RepoError> {
        let first = QueryOptions {
            pagination: Some(Pagination {
                offset: options.pagination.map_or(0, |p| p.offset),
                limit: 1,
            }),
            ..options.clone()
        };
        self.query(&first)?
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
        let total = self.select(&options.filters)?.len() as u64;
        let items = self.query(options)?;
        Ok(PaginatedResult::new(items, total, pagination))
    }

    async fn count(&self, filters: &Filters) -> Result<u64, RepoError> {
        Ok(self.select(filters)?.len() as u64)
    }

    async fn exists(&self, id: &T::Id) -> Result<bool, RepoError> {
        Ok(rw_read(&self.rows, SOURCE, "exists")
            .get(id)
            .is_some_and(|row| row.is_live()))
    }

    async fn exists_by_fields(&self, filters: &Filters) -> Result<bool, RepoError> {
        Ok(!self.select(filters)?.is_empty())
    }

    async fn with_transaction(&self, work: TransactionFn<T>) -> Result<(), RepoError> {
        if self.in_transaction {
            return Err(RepoError::transaction("nested transactions are not supported"));
        }
        let _writer = self.writer.lock().await;
        let snapshot = rw_read(&self.rows, SOURCE, "begin").clone();
        let tx = Self::from_rows(snapshot, true);

        work(&tx).await?;

        let committed = std::mem::take(&mut *rw_write(&tx.rows, SOURCE, "commit"));
        *rw_write(&self.rows, SOURCE, "commit") = committed;
        Ok(())
    }

    async fn refresh(&self, entity: &mut T) -> Result<(), RepoError> {
        *entity = self.live(entity.id())?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), RepoError> {
        let _writer = self.writer.lock().await;
        rw_write(&self.rows, SOURCE, "clear").clear();
        Ok(())
    }
}

fn document<T: Entity>(entity: &T) -> Result<serde_json::Map<String, Value>, RepoError> {
    match serde_json::to_value(entity) {
        Ok(Value::Object(document)) => Ok(document),
        Ok(_) => Err(RepoError::invalid_input("entity is not a JSON object")),
        Err(err) => Err(RepoError::from_persistence(err)),
    }
}

fn matches_filters<T: Entity>(entity: &T, filters: &Filters) -> Result<bool, RepoError> {
    if filters.is_empty() {
        return Ok(true);
    }
    let document = document(entity)?;
    for (field, expected) in filters {
        match document.get(field) {
            Some(actual) if actual == expected => {}
            Some(_) => return Ok(false),
            None => {
                return Err(RepoError::invalid_input(format!(
                    "unknown filter field `{field}`"
                )));
            }
        }
    }
    Ok(true)
}

/// Sorts by the requested fields, falling back to creation time.
fn sort_entities<T: Entity>(items: &mut Vec<T>, sort_by: &[SortBy]) -> Result<(), RepoError> {
    if sort_by.is_empty() {
        items.sort_by_key(|entity| entity.created_at());
        return Ok(());
    }

    let mut keyed = Vec::with_capacity(items.len());
    for entity in items.drain(..) {
        let document = document(&entity)?;
        let mut key = Vec::with_capacity(sort_by.len());
        for sort in sort_by {
            let value = document.get(&sort.field).cloned().ok_or_else(|| {
                RepoError::invalid_input(format!("unknown sort field `{}`", sort.field))
            })?;
            key.push(value);
        }
        keyed.push((key, entity));
    }

    keyed.sort_by(|(left, a), (right, b)| {
        for ((l, r), sort) in left.iter().zip(right).zip(sort_by) {
            let ordering = match sort.order {
                SortOrder::Asc => compare_values(l, r),
                SortOrder::Desc => compare_values(r, l),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        a.created_at().cmp(&b.created_at())
    });
    items.extend(keyed.into_iter().map(|(_, entity)| entity));
    Ok(())
}

fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l
            .as_f64()
            .zip(r.as_f64())
            .and_then(|(l, r)| l.partial_cmp(&r))
            .unwrap_or(Ordering::Equal),
        (Value::String(l), Value::String(r)) => l.cmp(r),
        (Value::Bool(l), Value::Bool(r)) => l.cmp(r),
        (Value::Array(l), Value::Array(r)) => l
            .iter()
            .zip(r)
            .map(|(l, r)| compare_values(l, r))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or_else(|| l.len().cmp(&r.len())),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::application::repos::transaction;
    use crate::domain::faq::Faq;

    fn faq(question: &str, category: &str) -> Faq {
        Faq::new(question, "An answer that is long enough.", category).expect("valid faq")
    }

    #[tokio::test]
    async fn create_rejects_duplicate_ids() {
        let store = MemoryStore::<Faq>::new();
        let entity = faq("What is form W-2 for?", "forms");
        store.create(entity.clone()).await.expect("create");
        let err = store.create(entity).await.expect_err("duplicate");
        assert!(matches!(err, RepoError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn soft_deleted_rows_are_hidden() {
        let store = MemoryStore::<Faq>::new();
        let entity = store
            .create(faq("What is form W-2 for?", "forms"))
            .await
            .expect("create");
        store.soft_delete(&entity.id).await.expect("soft delete");

        assert!(store.find_by_id(&entity.id).await.expect_err("hidden").is_not_found());
        assert!(!store.exists(&entity.id).await.expect("exists"));
        assert_eq!(store.len(), 1);
        assert!(store.delete(&entity.id).await.expect_err("gone").is_not_found());
    }

    #[tokio::test]
    async fn filters_sort_and_paginate() {
        let store = MemoryStore::<Faq>::new();
        for (question, category, priority) in [
            ("What is form W-2 for?", "forms", 10),
            ("What is form 1099 for?", "forms", 30),
            ("When are taxes due?", "deadlines", 20),
        ] {
            let mut entity = faq(question, category);
            entity.set_priority(priority).expect("priority");
            store.create(entity).await.expect("create");
        }

        let options = QueryOptions::new()
            .with_filter("category", "forms")
            .with_sort("priority", SortOrder::Desc);
        let found = store.find_all(&options).await.expect("find");
        let priorities: Vec<_> = found.iter().map(|f| f.priority).collect();
        assert_eq!(priorities, vec![30, 10]);

        let page = store
            .find_with_pagination(&options.clone().with_pagination(1, 1))
            .await
            .expect("page");
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].priority, 10);
        assert!(page.has_prev);
        assert!(!page.has_next);

        let mut by_category = Filters::new();
        by_category.insert("category".into(), json!("deadlines"));
        assert_eq!(store.count(&by_category).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn unknown_filter_field_is_invalid_input() {
        let store = MemoryStore::<Faq>::new();
        let options = QueryOptions::new().with_filter("colour", "blue");
        let err = store.find_all(&options).await.expect_err("unknown field");
        assert!(matches!(err, RepoError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn pagination_is_required_for_paged_queries() {
        let store = MemoryStore::<Faq>::new();
        assert!(matches!(
            store.find_with_pagination(&QueryOptions::new()).await,
            Err(RepoError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn update_fields_patches_json_fields() {
        let store = MemoryStore::<Faq>::new();
        let entity = store
            .create(faq("What is form W-2 for?", "forms"))
            .await
            .expect("create");

        let mut fields = FieldUpdates::new();
        fields.insert("priority".into(), json!(75));
        fields.insert("is_active".into(), json!(false));
        store.update_fields(&entity.id, fields).await.expect("patch");

        let stored = store.find_by_id(&entity.id).await.expect("find");
        assert_eq!(stored.priority, 75);
        assert!(!stored.is_active);
        assert!(stored.updated_at >= entity.updated_at);

        let mut forbidden = FieldUpdates::new();
        forbidden.insert("id".into(), json!("nope"));
        assert!(store.update_fields(&entity.id, forbidden).await.is_err());
    }

    #[tokio::test]
    async fn failed_transaction_leaves_state_untouched() {
        let store = MemoryStore::<Faq>::new();
        let first = faq("What is form W-2 for?", "forms");
        let second = faq("What is form 1099 for?", "forms");
        let first_id = first.id;

        let result = store
            .with_transaction(transaction(move |tx| {
                Box::pin(async move {
                    tx.create(first).await?;
                    tx.create(second).await?;
                    Err(RepoError::transaction("abort"))
                })
            }))
            .await;

        assert!(result.is_err());
        assert!(store.is_empty());
        assert!(!store.exists(&first_id).await.expect("exists"));
    }

    #[tokio::test]
    async fn committed_transaction_is_visible() {
        let store = MemoryStore::<Faq>::new();
        let entity = faq("What is form W-2 for?", "forms");
        let id = entity.id;

        store
            .with_transaction(transaction(move |tx| {
                Box::pin(async move {
                    tx.create(entity).await?;
                    Ok(())
                })
            }))
            .await
            .expect("commit");

        assert!(store.exists(&id).await.expect("exists"));
    }

    #[tokio::test]
    async fn batch_results_report_failed_indexes() {
        let store = MemoryStore::<Faq>::new();
        let existing = store
            .create(faq("What is form W-2 for?", "forms"))
            .await
            .expect("create");
        let result = store
            .delete_batch(&[existing.id, uuid::Uuid::new_v4()])
            .await
            .expect("batch");
        assert_eq!(result.success_count, 1);
        assert!(!result.succeeded(1));
    }
}
