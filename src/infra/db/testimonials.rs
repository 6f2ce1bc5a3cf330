use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::testimonial::Testimonial;

use super::schema::{Column, ColumnKind, PgEntity};

#[derive(FromRow)]
pub struct TestimonialRow {
    id: Uuid,
    content: String,
    author: String,
    author_email: String,
    rating: i32,
    is_approved: bool,
    is_active: bool,
    approved_at: Option<OffsetDateTime>,
    approved_by: Option<String>,
    company: Option<String>,
    position: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<TestimonialRow> for Testimonial {
    fn from(row: TestimonialRow) -> Self {
        Self {
            id: row.id,
            content: row.content,
            author: row.author,
            author_email: row.author_email,
            rating: row.rating,
            is_approved: row.is_approved,
            is_active: row.is_active,
            approved_at: row.approved_at,
            approved_by: row.approved_by,
            company: row.company,
            position: row.position,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl PgEntity for Testimonial {
    type Row = TestimonialRow;

    const TABLE: &'static str = "testimonials";

    const COLUMNS: &'static [Column] = &[
        Column::new("id", ColumnKind::Uuid),
        Column::new("content", ColumnKind::Text),
        Column::new("author", ColumnKind::Text),
        Column::new("author_email", ColumnKind::Text),
        Column::new("rating", ColumnKind::Int),
        Column::new("is_approved", ColumnKind::Bool),
        Column::new("is_active", ColumnKind::Bool),
        Column::new("approved_at", ColumnKind::NullableTimestamp),
        Column::new("approved_by", ColumnKind::NullableText),
        Column::new("company", ColumnKind::NullableText),
        Column::new("position", ColumnKind::NullableText),
        Column::new("created_at", ColumnKind::Timestamp),
        Column::new("updated_at", ColumnKind::Timestamp),
    ];
}
