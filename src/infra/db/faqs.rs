use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::faq::Faq;

use super::schema::{Column, ColumnKind, PgEntity};

#[derive(FromRow)]
pub struct FaqRow {
    id: Uuid,
    question: String,
    answer: String,
    category: String,
    is_active: bool,
    priority: i32,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<FaqRow> for Faq {
    fn from(row: FaqRow) -> Self {
        Self {
            id: row.id,
            question: row.question,
            answer: row.answer,
            category: row.category,
            is_active: row.is_active,
            priority: row.priority,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl PgEntity for Faq {
    type Row = FaqRow;

    const TABLE: &'static str = "faqs";

    const COLUMNS: &'static [Column] = &[
        Column::new("id", ColumnKind::Uuid),
        Column::new("question", ColumnKind::Text),
        Column::new("answer", ColumnKind::Text),
        Column::new("category", ColumnKind::Text),
        Column::new("is_active", ColumnKind::Bool),
        Column::new("priority", ColumnKind::Int),
        Column::new("created_at", ColumnKind::Timestamp),
        Column::new("updated_at", ColumnKind::Timestamp),
    ];
}
