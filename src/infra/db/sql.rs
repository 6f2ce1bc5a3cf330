//! Statement builders and executors shared by pooled and transactional stores.

use std::collections::HashMap;

use sqlx::{Connection, PgConnection, Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::query::{
    BulkOperationResult, FieldUpdates, Filters, Pagination, QueryOptions, SortBy,
};
use crate::application::repos::RepoError;

use super::schema::{IMMUTABLE_COLUMNS, PgEntity, column, column_list, document, push_value};
use super::util::{convert_bound, convert_count, map_sqlx_error};

type Builder = QueryBuilder<'static, Postgres>;

fn push_where<T: PgEntity>(qb: &mut Builder, filters: &Filters) -> Result<(), RepoError> {
    qb.push(" WHERE deleted_at IS NULL");
    for (field, value) in filters {
        let column = column::<T>(field)?;
        qb.push(" AND ");
        qb.push(column.name);
        if value.is_null() {
            qb.push(" IS NULL");
        } else {
            qb.push(" = ");
            push_value(qb, &column, value)?;
        }
    }
    Ok(())
}

fn push_order<T: PgEntity>(qb: &mut Builder, sort_by: &[SortBy]) -> Result<(), RepoError> {
    qb.push(" ORDER BY ");
    for sort in sort_by {
        let column = column::<T>(&sort.field)?;
        qb.push(column.name);
        qb.push(" ");
        qb.push(sort.order.as_sql());
        qb.push(", ");
    }
    qb.push("created_at ASC");
    Ok(())
}

fn push_pagination(qb: &mut Builder, pagination: Pagination) -> Result<(), RepoError> {
    qb.push(" LIMIT ");
    qb.push_bind(convert_bound("limit", pagination.limit)?);
    qb.push(" OFFSET ");
    qb.push_bind(convert_bound("offset", pagination.offset)?);
    Ok(())
}

pub(super) fn select<T: PgEntity>(options: &QueryOptions) -> Result<Builder, RepoError> {
    let mut qb = QueryBuilder::new(format!("SELECT {} FROM {}", column_list::<T>(), T::TABLE));
    push_where::<T>(&mut qb, &options.filters)?;
    push_order::<T>(&mut qb, &options.sort_by)?;
    if let Some(pagination) = options.pagination {
        push_pagination(&mut qb, pagination)?;
    }
    Ok(qb)
}

fn count_query<T: PgEntity>(filters: &Filters) -> Result<Builder, RepoError> {
    let mut qb = QueryBuilder::new(format!("SELECT COUNT(*) FROM {}", T::TABLE));
    push_where::<T>(&mut qb, filters)?;
    Ok(qb)
}

fn exists_query<T: PgEntity>(filters: &Filters) -> Result<Builder, RepoError> {
    let mut qb = QueryBuilder::new(format!("SELECT EXISTS (SELECT 1 FROM {}", T::TABLE));
    push_where::<T>(&mut qb, filters)?;
    qb.push(")");
    Ok(qb)
}

pub(super) fn insert<T: PgEntity>(entity: &T) -> Result<Builder, RepoError> {
    let document = document(entity)?;
    let mut qb = QueryBuilder::new(format!(
        "INSERT INTO {} ({}) VALUES (",
        T::TABLE,
        column_list::<T>()
    ));
    for (index, column) in T::COLUMNS.iter().enumerate() {
        if index > 0 {
            qb.push(", ");
        }
        let value = document.get(column.name).unwrap_or(&serde_json::Value::Null);
        push_value(&mut qb, column, value)?;
    }
    qb.push(format!(") RETURNING {}", column_list::<T>()));
    Ok(qb)
}

/// Rewrites every mutable column; `created_at` keeps its stored value.
pub(super) fn update<T: PgEntity>(entity: &T) -> Result<Builder, RepoError> {
    let document = document(entity)?;
    let mut qb = QueryBuilder::new(format!("UPDATE {} SET ", T::TABLE));
    let mut first = true;
    for column in T::COLUMNS
        .iter()
        .filter(|column| column.name != "id" && column.name != "created_at")
    {
        if !first {
            qb.push(", ");
        }
        first = false;
        qb.push(column.name);
        qb.push(" = ");
        let value = document.get(column.name).unwrap_or(&serde_json::Value::Null);
        push_value(&mut qb, column, value)?;
    }
    qb.push(" WHERE id = ");
    qb.push_bind(*entity.id());
    qb.push(format!(
        " AND deleted_at IS NULL RETURNING {}",
        column_list::<T>()
    ));
    Ok(qb)
}

pub(super) fn update_fields_query<T: PgEntity>(
    id: Uuid,
    fields: &FieldUpdates,
    now: OffsetDateTime,
) -> Result<Builder, RepoError> {
    let mut qb = QueryBuilder::new(format!("UPDATE {} SET ", T::TABLE));
    for (field, value) in fields {
        if IMMUTABLE_COLUMNS.contains(&field.as_str()) {
            return Err(RepoError::invalid_input(format!(
                "field `{field}` cannot be updated"
            )));
        }
        let column = column::<T>(field)?;
        qb.push(column.name);
        qb.push(" = ");
        push_value(&mut qb, &column, value)?;
        qb.push(", ");
    }
    qb.push("updated_at = ");
    qb.push_bind(now);
    qb.push(" WHERE id = ");
    qb.push_bind(id);
    qb.push(" AND deleted_at IS NULL");
    Ok(qb)
}

pub(super) async fn insert_one<T: PgEntity>(
    conn: &mut PgConnection,
    mut entity: T,
) -> Result<T, RepoError> {
    let now = OffsetDateTime::now_utc();
    entity.set_created_at(now);
    entity.set_updated_at(now);
    let mut qb = insert(&entity)?;
    let row = qb
        .build_query_as::<T::Row>()
        .fetch_one(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    Ok(row.into())
}

pub(super) async fn update_one<T: PgEntity>(
    conn: &mut PgConnection,
    mut entity: T,
) -> Result<T, RepoError> {
    entity.set_updated_at(OffsetDateTime::now_utc());
    let mut qb = update(&entity)?;
    let row = qb
        .build_query_as::<T::Row>()
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_error)?
        .ok_or(RepoError::NotFound)?;
    Ok(row.into())
}

pub(super) async fn delete_one<T: PgEntity>(
    conn: &mut PgConnection,
    id: Uuid,
) -> Result<(), RepoError> {
    let mut qb = QueryBuilder::<Postgres>::new(format!("DELETE FROM {} WHERE id = ", T::TABLE));
    qb.push_bind(id);
    qb.push(" AND deleted_at IS NULL");
    let done = qb
        .build()
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    if done.rows_affected() == 0 {
        return Err(RepoError::NotFound);
    }
    Ok(())
}

pub(super) async fn insert_each<T: PgEntity>(
    conn: &mut PgConnection,
    entities: Vec<T>,
) -> Result<BulkOperationResult, RepoError> {
    let mut result = BulkOperationResult::default();
    for (index, entity) in entities.into_iter().enumerate() {
        let mut item = conn.begin().await.map_err(map_sqlx_error)?;
        match insert_one(&mut item, entity).await {
            Ok(_) => {
                item.commit().await.map_err(map_sqlx_error)?;
                result.record_success();
            }
            Err(err) => {
                item.rollback().await.map_err(map_sqlx_error)?;
                result.record_failure(index, err.to_string());
            }
        }
    }
    Ok(result)
}

pub(super) async fn update_each<T: PgEntity>(
    conn: &mut PgConnection,
    entities: Vec<T>,
) -> Result<BulkOperationResult, RepoError> {
    let mut result = BulkOperationResult::default();
    for (index, entity) in entities.into_iter().enumerate() {
        let mut item = conn.begin().await.map_err(map_sqlx_error)?;
        match update_one(&mut item, entity).await {
            Ok(_) => {
                item.commit().await.map_err(map_sqlx_error)?;
                result.record_success();
            }
            Err(err) => {
                item.rollback().await.map_err(map_sqlx_error)?;
                result.record_failure(index, err.to_string());
            }
        }
    }
    Ok(result)
}

pub(super) async fn delete_each<T: PgEntity>(
    conn: &mut PgConnection,
    ids: &[Uuid],
) -> Result<BulkOperationResult, RepoError> {
    let mut result = BulkOperationResult::default();
    for (index, id) in ids.iter().enumerate() {
        match delete_one::<T>(conn, *id).await {
            Ok(()) => result.record_success(),
            Err(err) => result.record_failure(index, err.to_string()),
        }
    }
    Ok(result)
}

pub(super) async fn update_fields<T: PgEntity>(
    conn: &mut PgConnection,
    id: Uuid,
    fields: &FieldUpdates,
) -> Result<(), RepoError> {
    let mut qb = update_fields_query::<T>(id, fields, OffsetDateTime::now_utc())?;
    let done = qb
        .build()
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    if done.rows_affected() == 0 {
        return Err(RepoError::NotFound);
    }
    Ok(())
}

pub(super) async fn soft_delete<T: PgEntity>(
    conn: &mut PgConnection,
    id: Uuid,
) -> Result<(), RepoError> {
    let mut qb = QueryBuilder::<Postgres>::new(format!("UPDATE {} SET deleted_at = ", T::TABLE));
    qb.push_bind(OffsetDateTime::now_utc());
    qb.push(" WHERE id = ");
    qb.push_bind(id);
    qb.push(" AND deleted_at IS NULL");
    let done = qb
        .build()
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    if done.rows_affected() == 0 {
        return Err(RepoError::NotFound);
    }
    Ok(())
}

pub(super) async fn find_by_id<T: PgEntity>(
    conn: &mut PgConnection,
    id: Uuid,
) -> Result<T, RepoError> {
    let mut qb = QueryBuilder::<Postgres>::new(format!(
        "SELECT {} FROM {} WHERE deleted_at IS NULL AND id = ",
        column_list::<T>(),
        T::TABLE
    ));
    qb.push_bind(id);
    qb.build_query_as::<T::Row>()
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_error)?
        .map(Into::into)
        .ok_or(RepoError::NotFound)
}

/// Live rows for `ids`, in the order the ids were given.
pub(super) async fn find_by_ids<T: PgEntity>(
    conn: &mut PgConnection,
    ids: &[Uuid],
) -> Result<Vec<T>, RepoError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut qb = QueryBuilder::<Postgres>::new(format!(
        "SELECT {} FROM {} WHERE deleted_at IS NULL AND id = ANY(",
        column_list::<T>(),
        T::TABLE
    ));
    qb.push_bind(ids.to_vec());
    qb.push(")");
    let rows = qb
        .build_query_as::<T::Row>()
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

    let mut found: HashMap<Uuid, T> = rows
        .into_iter()
        .map(|row| {
            let entity: T = row.into();
            (*entity.id(), entity)
        })
        .collect();
    Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
}

pub(super) async fn find_all<T: PgEntity>(
    conn: &mut PgConnection,
    options: &QueryOptions,
) -> Result<Vec<T>, RepoError> {
    let mut qb = select::<T>(options)?;
    let rows = qb
        .build_query_as::<T::Row>()
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    Ok(rows.into_iter().map(Into::into).collect())
}

pub(super) async fn count<T: PgEntity>(
    conn: &mut PgConnection,
    filters: &Filters,
) -> Result<u64, RepoError> {
    let mut qb = count_query::<T>(filters)?;
    let total: i64 = qb
        .build_query_scalar()
        .fetch_one(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    convert_count(total)
}

pub(super) async fn exists_by_fields<T: PgEntity>(
    conn: &mut PgConnection,
    filters: &Filters,
) -> Result<bool, RepoError> {
    let mut qb = exists_query::<T>(filters)?;
    qb.build_query_scalar::<bool>()
        .fetch_one(&mut *conn)
        .await
        .map_err(map_sqlx_error)
}

pub(super) async fn clear<T: PgEntity>(conn: &mut PgConnection) -> Result<(), RepoError> {
    QueryBuilder::<Postgres>::new(format!("DELETE FROM {}", T::TABLE))
        .build()
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::application::query::SortOrder;
    use crate::domain::faq::Faq;

    #[test]
    fn select_applies_filters_sort_and_pagination() {
        let options = QueryOptions::new()
            .with_filter("category", "forms")
            .with_sort("priority", SortOrder::Desc)
            .with_pagination(20, 10);
        let qb = select::<Faq>(&options).expect("valid query");
        assert_eq!(
            qb.sql(),
            format!(
                "SELECT {} FROM faqs WHERE deleted_at IS NULL AND category = $1 \
                 ORDER BY priority DESC, created_at ASC LIMIT $2 OFFSET $3",
                column_list::<Faq>()
            )
        );
    }

    #[test]
    fn unknown_filter_field_is_invalid_input() {
        let options = QueryOptions::new().with_filter("password", "x");
        let err = select::<Faq>(&options).err().expect("unknown column");
        assert!(matches!(err, RepoError::InvalidInput { .. }));
    }

    #[test]
    fn mistyped_filter_value_is_invalid_input() {
        let options = QueryOptions::new().with_filter("priority", "high");
        let err = select::<Faq>(&options).err().expect("priority is an integer");
        assert!(err.to_string().contains("priority"));
    }

    #[test]
    fn null_filter_becomes_is_null() {
        let filters = Filters::from([("category".to_string(), serde_json::Value::Null)]);
        let qb = count_query::<Faq>(&filters).expect("valid query");
        assert_eq!(
            qb.sql(),
            "SELECT COUNT(*) FROM faqs WHERE deleted_at IS NULL AND category IS NULL"
        );
    }

    #[test]
    fn update_fields_rejects_immutable_columns() {
        let mut fields = FieldUpdates::new();
        fields.insert("created_at".to_string(), json!(null));
        let err = update_fields_query::<Faq>(Uuid::new_v4(), &fields, OffsetDateTime::now_utc())
            .err().expect("immutable");
        assert!(err.to_string().contains("cannot be updated"));
    }

    #[test]
    fn update_fields_sets_updated_at_last() {
        let mut fields = FieldUpdates::new();
        fields.insert("priority".to_string(), json!(7));
        let qb = update_fields_query::<Faq>(Uuid::new_v4(), &fields, OffsetDateTime::now_utc())
            .expect("valid update");
        assert_eq!(
            qb.sql(),
            "UPDATE faqs SET priority = $1, updated_at = $2 WHERE id = $3 AND deleted_at IS NULL"
        );
    }

    #[test]
    fn update_leaves_created_at_alone() {
        let faq = Faq::new(
            "How long should I keep tax records?",
            "Keep records for at least three years after filing.",
            "records",
        )
        .expect("valid faq");
        let qb = update(&faq).expect("valid update");
        assert!(!qb.sql().contains("created_at ="));
        assert!(qb.sql().contains("updated_at ="));
    }
}
