//! Column metadata that lets one generic store serve every table.
//!
//! Entity values travel through their serialized JSON form, the same shape
//! filters and field updates use, and are decoded per column kind before
//! binding.

use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::RepoError;
use crate::domain::entity::Entity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Uuid,
    Text,
    NullableText,
    Bool,
    Int,
    Timestamp,
    NullableTimestamp,
}

impl ColumnKind {
    fn is_nullable(self) -> bool {
        matches!(self, Self::NullableText | Self::NullableTimestamp)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
}

impl Column {
    pub const fn new(name: &'static str, kind: ColumnKind) -> Self {
        Self { name, kind }
    }
}

/// An [`Entity`] persisted in its own table keyed by a UUID `id`.
///
/// Every table also carries `created_at`, `updated_at` and a nullable
/// `deleted_at` used for soft deletes; only the first two appear in
/// [`PgEntity::COLUMNS`].
pub trait PgEntity: Entity<Id = Uuid> {
    type Row: for<'r> FromRow<'r, PgRow> + Into<Self> + Send + Unpin;

    const TABLE: &'static str;

    const COLUMNS: &'static [Column];
}

pub(super) const IMMUTABLE_COLUMNS: [&str; 3] = ["id", "created_at", "updated_at"];

pub(super) fn column<T: PgEntity>(field: &str) -> Result<Column, RepoError> {
    T::COLUMNS
        .iter()
        .find(|column| column.name == field)
        .copied()
        .ok_or_else(|| RepoError::invalid_input(format!("unknown field `{field}`")))
}

pub(super) fn column_list<T: PgEntity>() -> String {
    T::COLUMNS
        .iter()
        .map(|column| column.name)
        .collect::<Vec<_>>()
        .join(", ")
}

pub(super) fn document<T: Entity>(entity: &T) -> Result<serde_json::Map<String, Value>, RepoError> {
    match serde_json::to_value(entity) {
        Ok(Value::Object(document)) => Ok(document),
        Ok(_) => Err(RepoError::invalid_input("entity is not a JSON object")),
        Err(err) => Err(RepoError::from_persistence(err)),
    }
}

fn decode<V: DeserializeOwned>(column: &Column, value: &Value) -> Result<V, RepoError> {
    serde_json::from_value(value.clone()).map_err(|err| {
        RepoError::invalid_input(format!("invalid value for `{}`: {err}", column.name))
    })
}

/// Binds `value` decoded as `column`'s SQL type.
pub(super) fn push_value(
    qb: &mut QueryBuilder<'static, Postgres>,
    column: &Column,
    value: &Value,
) -> Result<(), RepoError> {
    if value.is_null() && !column.kind.is_nullable() {
        return Err(RepoError::invalid_input(format!(
            "`{}` cannot be null",
            column.name
        )));
    }
    match column.kind {
        ColumnKind::Uuid => {
            qb.push_bind(decode::<Uuid>(column, value)?);
        }
        ColumnKind::Text => {
            qb.push_bind(decode::<String>(column, value)?);
        }
        ColumnKind::NullableText => {
            qb.push_bind(decode::<Option<String>>(column, value)?);
        }
        ColumnKind::Bool => {
            qb.push_bind(decode::<bool>(column, value)?);
        }
        ColumnKind::Int => {
            qb.push_bind(decode::<i32>(column, value)?);
        }
        ColumnKind::Timestamp => {
            qb.push_bind(decode::<OffsetDateTime>(column, value)?);
        }
        ColumnKind::NullableTimestamp => {
            qb.push_bind(decode::<Option<OffsetDateTime>>(column, value)?);
        }
    }
    Ok(())
}
