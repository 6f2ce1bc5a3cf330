//! Testimonial moderation and cached statistics.
//!
//! Reads and writes go through the repository; the aggregate statistics are
//! cached here under the `stats` shape and dropped after every write.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::application::error::AppError;
use crate::application::query::{
    BulkOperationResult, Filters, PaginatedResult, QueryOptions, SortOrder,
};
use crate::application::repos::Repository;
use crate::cache::{CacheManager, KeyGenerator};
use crate::domain::testimonial::Testimonial;

pub const TESTIMONIAL_NAMESPACE: &str = "testimonial";

pub const SHAPE_STATS: &str = "stats";

const RECENT_WINDOW: TimeDuration = TimeDuration::days(30);
const MAX_PAGE_SIZE: u64 = 100;

/// Key generator for the testimonial namespace with the stats shape registered.
pub fn testimonial_keys() -> KeyGenerator<Testimonial> {
    KeyGenerator::with_shapes(TESTIMONIAL_NAMESPACE, [SHAPE_STATS])
}

/// Fields an update may change; `None` leaves the field as is.
#[derive(Debug, Clone, Default)]
pub struct TestimonialChanges {
    pub content: Option<String>,
    pub rating: Option<i32>,
    pub company: Option<String>,
    pub position: Option<String>,
}

impl TestimonialChanges {
    fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.rating.is_none()
            && self.company.is_none()
            && self.position.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestimonialStats {
    /// Active testimonials, approved or not.
    pub total_count: u64,
    pub approved_count: u64,
    pub pending_count: u64,
    /// Mean rating of public testimonials; zero when there are none.
    pub average_rating: f64,
    /// Public testimonials per rating, every rating from 1 to 5 present.
    pub rating_distribution: BTreeMap<i32, u64>,
    /// Active testimonials created in the last 30 days.
    pub recent_count: u64,
}

pub struct TestimonialService {
    repo: Arc<dyn Repository<Testimonial>>,
    cache: CacheManager<Testimonial>,
}

impl TestimonialService {
    pub fn new(repo: Arc<dyn Repository<Testimonial>>, cache: CacheManager<Testimonial>) -> Self {
        Self { repo, cache }
    }

    pub fn cache(&self) -> &CacheManager<Testimonial> {
        &self.cache
    }

    /// New testimonials await approval.
    #[instrument(skip_all, fields(rating = rating))]
    pub async fn create(
        &self,
        content: &str,
        author: &str,
        author_email: &str,
        rating: i32,
    ) -> Result<Testimonial, AppError> {
        let testimonial = Testimonial::new(content, author, author_email, rating)?;
        let created = self.repo.create(testimonial).await?;
        self.invalidate_stats().await;
        Ok(created)
    }

    pub async fn get(&self, id: Uuid) -> Result<Testimonial, AppError> {
        Ok(self.repo.find_by_id(&id).await?)
    }

    pub async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<Testimonial>, AppError> {
        Ok(self.repo.find_by_ids(ids).await?)
    }

    #[instrument(skip_all, fields(id = %id))]
    pub async fn update(&self, id: Uuid, changes: TestimonialChanges) -> Result<Testimonial, AppError> {
        if changes.is_empty() {
            return Err(AppError::validation("nothing to update"));
        }
        let mut testimonial = self.repo.find_by_id(&id).await?;
        if let Some(content) = changes.content.as_deref() {
            testimonial.update_content(content)?;
        }
        if let Some(rating) = changes.rating {
            testimonial.update_rating(rating)?;
        }
        testimonial.set_affiliation(changes.company.as_deref(), changes.position.as_deref());
        self.save(testimonial).await
    }

    #[instrument(skip_all, fields(id = %id))]
    pub async fn approve(&self, id: Uuid, approved_by: &str) -> Result<Testimonial, AppError> {
        let approved_by = moderator(approved_by)?;
        let mut testimonial = self.repo.find_by_id(&id).await?;
        testimonial.approve(approved_by);
        self.save(testimonial).await
    }

    pub async fn activate(&self, id: Uuid) -> Result<Testimonial, AppError> {
        let mut testimonial = self.repo.find_by_id(&id).await?;
        testimonial.activate();
        self.save(testimonial).await
    }

    pub async fn deactivate(&self, id: Uuid) -> Result<Testimonial, AppError> {
        let mut testimonial = self.repo.find_by_id(&id).await?;
        testimonial.deactivate();
        self.save(testimonial).await
    }

    #[instrument(skip_all, fields(id = %id))]
    pub async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        self.repo.delete(&id).await?;
        self.invalidate_stats().await;
        Ok(())
    }

    #[instrument(skip_all, fields(batch = ids.len()))]
    pub async fn bulk_approve(
        &self,
        ids: &[Uuid],
        approved_by: &str,
    ) -> Result<BulkOperationResult, AppError> {
        let approved_by = moderator(approved_by)?;
        self.bulk_apply(ids, |testimonial| testimonial.approve(approved_by))
            .await
    }

    pub async fn bulk_activate(&self, ids: &[Uuid]) -> Result<BulkOperationResult, AppError> {
        self.bulk_apply(ids, Testimonial::activate).await
    }

    pub async fn bulk_deactivate(&self, ids: &[Uuid]) -> Result<BulkOperationResult, AppError> {
        self.bulk_apply(ids, Testimonial::deactivate).await
    }

    #[instrument(skip_all, fields(batch = ids.len()))]
    pub async fn bulk_delete(&self, ids: &[Uuid]) -> Result<BulkOperationResult, AppError> {
        let result = self.repo.delete_batch(ids).await?;
        self.invalidate_stats().await;
        Ok(result)
    }

    /// Approved, active testimonials, newest first.
    pub async fn list_approved(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<PaginatedResult<Testimonial>, AppError> {
        self.page(public_filters(), offset, limit).await
    }

    /// Active testimonials awaiting approval, newest first.
    pub async fn list_pending(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<PaginatedResult<Testimonial>, AppError> {
        let filters = Filters::from([
            ("is_approved".to_string(), json!(false)),
            ("is_active".to_string(), json!(true)),
        ]);
        self.page(filters, offset, limit).await
    }

    /// Public testimonials with exactly `rating` stars, newest first.
    pub async fn list_by_rating(&self, rating: i32) -> Result<Vec<Testimonial>, AppError> {
        if !(1..=5).contains(&rating) {
            return Err(AppError::validation("rating must be between 1 and 5"));
        }
        let mut filters = public_filters();
        filters.insert("rating".to_string(), json!(rating));
        let options =
            QueryOptions::with_filters(filters).with_sort("created_at", SortOrder::Desc);
        Ok(self.repo.find_all(&options).await?)
    }

    pub async fn stats(&self) -> Result<TestimonialStats, AppError> {
        let key = self.cache.query_key(SHAPE_STATS, &json!({}));
        let ttl = self.cache.config().short_ttl;
        self.cache
            .get_query(&key, ttl, || self.compute_stats())
            .await
    }

    async fn compute_stats(&self) -> Result<TestimonialStats, AppError> {
        let active = Filters::from([("is_active".to_string(), json!(true))]);
        let total_count = self.repo.count(&active).await?;
        let approved_count = self.repo.count(&public_filters()).await?;
        let pending_count = total_count.saturating_sub(approved_count);

        let public = self
            .repo
            .find_all(&QueryOptions::with_filters(public_filters()))
            .await?;
        let mut rating_distribution: BTreeMap<i32, u64> = (1..=5).map(|r| (r, 0)).collect();
        for testimonial in &public {
            *rating_distribution.entry(testimonial.rating).or_insert(0) += 1;
        }
        let average_rating = if public.is_empty() {
            0.0
        } else {
            public.iter().map(|t| f64::from(t.rating)).sum::<f64>() / public.len() as f64
        };

        let since = OffsetDateTime::now_utc() - RECENT_WINDOW;
        let recent_count = self
            .repo
            .find_all(&QueryOptions::with_filters(active))
            .await?
            .iter()
            .filter(|testimonial| testimonial.created_at >= since)
            .count() as u64;

        Ok(TestimonialStats {
            total_count,
            approved_count,
            pending_count,
            average_rating,
            rating_distribution,
            recent_count,
        })
    }

    async fn page(
        &self,
        filters: Filters,
        offset: u64,
        limit: u64,
    ) -> Result<PaginatedResult<Testimonial>, AppError> {
        if !(1..=MAX_PAGE_SIZE).contains(&limit) {
            return Err(AppError::validation(format!(
                "limit must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        let options = QueryOptions::with_filters(filters)
            .with_sort("created_at", SortOrder::Desc)
            .with_pagination(offset, limit);
        Ok(self.repo.find_with_pagination(&options).await?)
    }

    /// Loads `ids`, applies `change` and stores the batch. Unknown ids are
    /// reported at their input position.
    async fn bulk_apply<F>(&self, ids: &[Uuid], change: F) -> Result<BulkOperationResult, AppError>
    where
        F: Fn(&mut Testimonial),
    {
        let mut result = BulkOperationResult::default();
        if ids.is_empty() {
            return Ok(result);
        }
        let mut loaded: HashMap<Uuid, Testimonial> = self
            .repo
            .find_by_ids(ids)
            .await?
            .into_iter()
            .map(|testimonial| (testimonial.id, testimonial))
            .collect();

        let mut batch = Vec::with_capacity(loaded.len());
        let mut positions = Vec::with_capacity(loaded.len());
        for (index, id) in ids.iter().enumerate() {
            match loaded.remove(id) {
                Some(mut testimonial) => {
                    change(&mut testimonial);
                    positions.push(index);
                    batch.push(testimonial);
                }
                None => result.record_failure(index, format!("testimonial {id} not found")),
            }
        }

        if !batch.is_empty() {
            let stored = self.repo.update_batch(batch).await?;
            for offset in 0..positions.len() {
                if stored.succeeded(offset) {
                    result.record_success();
                }
            }
            for error in stored.errors {
                let index = positions.get(error.index).copied().unwrap_or(error.index);
                result.record_failure(index, error.message);
            }
            result.errors.sort_by_key(|error| error.index);
            self.invalidate_stats().await;
        }

        info!(
            succeeded = result.success_count,
            failed = result.failure_count,
            "Bulk testimonial update complete"
        );
        Ok(result)
    }

    async fn save(&self, testimonial: Testimonial) -> Result<Testimonial, AppError> {
        let updated = self.repo.update(testimonial).await?;
        self.invalidate_stats().await;
        Ok(updated)
    }

    async fn invalidate_stats(&self) {
        let pattern = format!("{}:{SHAPE_STATS}:*", self.cache.keys().prefix());
        if let Err(err) = self.cache.invalidate_pattern(&pattern).await {
            warn!(
                op = "invalidate_stats",
                key = %pattern,
                error = %err,
                "Failed to invalidate testimonial stats"
            );
        }
    }
}

fn public_filters() -> Filters {
    Filters::from([
        ("is_approved".to_string(), json!(true)),
        ("is_active".to_string(), json!(true)),
    ])
}

fn moderator(approved_by: &str) -> Result<&str, AppError> {
    let approved_by = approved_by.trim();
    if approved_by.is_empty() {
        return Err(AppError::validation("approver cannot be empty"));
    }
    Ok(approved_by)
}
