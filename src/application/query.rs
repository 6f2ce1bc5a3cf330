//! Query, pagination and bulk-result models shared by stores and caches.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Field filters. Ordered so that serialization is canonical.
pub type Filters = BTreeMap<String, serde_json::Value>;

/// Partial updates applied by `update_fields`.
pub type FieldUpdates = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortBy {
    pub field: String,
    pub order: SortOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    pub pagination: Option<Pagination>,
    pub sort_by: Vec<SortBy>,
    pub filters: Filters,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pagination(mut self, offset: u64, limit: u64) -> Self {
        self.pagination = Some(Pagination { offset, limit });
        self
    }

    pub fn with_sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort_by.push(SortBy {
            field: field.into(),
            order,
        });
        self
    }

    pub fn with_filter(mut self, field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.filters.insert(field.into(), value.into());
        self
    }

    pub fn with_filters(filters: Filters) -> Self {
        Self {
            filters,
            ..Self::default()
        }
    }

    /// Filtered or paginated results are cached with the short TTL.
    pub fn is_filtered(&self) -> bool {
        !self.filters.is_empty() || self.pagination.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
    pub has_next: bool,
    pub has_prev: bool,
    pub total_pages: u64,
}

impl<T> PaginatedResult<T> {
    pub fn new(items: Vec<T>, total: u64, pagination: Pagination) -> Self {
        let Pagination { offset, limit } = pagination;
        let total_pages = if limit == 0 { 0 } else { total.div_ceil(limit) };
        Self {
            items,
            total,
            offset,
            limit,
            has_next: offset.saturating_add(limit) < total,
            has_prev: offset > 0,
            total_pages,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItemError {
    pub index: usize,
    pub message: String,
}

/// Outcome of a batch store operation, item by item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkOperationResult {
    pub success_count: usize,
    pub failure_count: usize,
    pub errors: Vec<BulkItemError>,
}

impl BulkOperationResult {
    pub fn record_success(&mut self) {
        self.success_count += 1;
    }

    pub fn record_failure(&mut self, index: usize, message: impl Into<String>) {
        self.failure_count += 1;
        self.errors.push(BulkItemError {
            index,
            message: message.into(),
        });
    }

    /// Whether the item at `index` of the submitted batch was processed.
    pub fn succeeded(&self, index: usize) -> bool {
        !self.errors.iter().any(|error| error.index == index)
    }

    pub fn is_complete(&self) -> bool {
        self.failure_count == 0
    }
}
