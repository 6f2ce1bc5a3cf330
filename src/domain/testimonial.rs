//! Customer testimonials awaiting or past moderation.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::entity::impl_entity;
use super::error::DomainError;

const ENTITY: &str = "testimonial";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Testimonial {
    pub id: Uuid,
    pub content: String,
    pub author: String,
    pub author_email: String,
    pub rating: i32,
    pub is_approved: bool,
    pub is_active: bool,
    pub approved_at: Option<OffsetDateTime>,
    pub approved_by: Option<String>,
    pub company: Option<String>,
    pub position: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl_entity!(Testimonial, Uuid);

impl Testimonial {
    /// New testimonials start active and unapproved.
    pub fn new(
        content: &str,
        author: &str,
        author_email: &str,
        rating: i32,
    ) -> Result<Self, DomainError> {
        let now = OffsetDateTime::now_utc();
        let testimonial = Self {
            id: Uuid::new_v4(),
            content: content.trim().to_string(),
            author: author.trim().to_string(),
            author_email: author_email.trim().to_string(),
            rating,
            is_approved: false,
            is_active: true,
            approved_at: None,
            approved_by: None,
            company: None,
            position: None,
            created_at: now,
            updated_at: now,
        };
        testimonial.validate()?;
        Ok(testimonial)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        let content_len = self.content.chars().count();
        if !(10..=1000).contains(&content_len) {
            return Err(DomainError::validation(
                ENTITY,
                "content must be between 10 and 1000 characters",
            ));
        }
        let author_len = self.author.chars().count();
        if !(2..=100).contains(&author_len) {
            return Err(DomainError::validation(
                ENTITY,
                "author must be between 2 and 100 characters",
            ));
        }
        match self.author_email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => {}
            _ => {
                return Err(DomainError::validation(
                    ENTITY,
                    "author email must be a valid address",
                ));
            }
        }
        if !(1..=5).contains(&self.rating) {
            return Err(DomainError::validation(
                ENTITY,
                "rating must be between 1 and 5",
            ));
        }
        Ok(())
    }

    pub fn update_content(&mut self, content: &str) -> Result<(), DomainError> {
        self.content = content.trim().to_string();
        self.updated_at = OffsetDateTime::now_utc();
        self.validate()
    }

    /// Rating is left untouched when out of range.
    pub fn update_rating(&mut self, rating: i32) -> Result<(), DomainError> {
        if !(1..=5).contains(&rating) {
            return Err(DomainError::validation(
                ENTITY,
                "rating must be between 1 and 5",
            ));
        }
        self.rating = rating;
        self.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    /// Blank values clear the field.
    pub fn set_affiliation(&mut self, company: Option<&str>, position: Option<&str>) {
        let normalize = |value: &str| {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        };
        if let Some(company) = company {
            self.company = normalize(company);
        }
        if let Some(position) = position {
            self.position = normalize(position);
        }
        self.updated_at = OffsetDateTime::now_utc();
    }

    pub fn approve(&mut self, approved_by: &str) {
        let now = OffsetDateTime::now_utc();
        self.is_approved = true;
        self.approved_at = Some(now);
        self.approved_by = Some(approved_by.to_string());
        self.updated_at = now;
    }

    pub fn activate(&mut self) {
        self.is_active = true;
        self.updated_at = OffsetDateTime::now_utc();
    }

    pub fn deactivate(&mut self) {
        self.is_active = false;
        self.updated_at = OffsetDateTime::now_utc();
    }

    /// Only approved, active testimonials are shown publicly.
    pub fn is_public(&self) -> bool {
        self.is_approved && self.is_active
    }
}
