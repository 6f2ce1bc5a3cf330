//! FAQ commands and cached listings.
//!
//! Single-entity reads and writes go through the repository, which is
//! normally a [`crate::cache::CachedRepository`]. Listings derived from many
//! FAQs (per category, active set, search results, category lists) are cached
//! here under the service shapes registered by [`faq_keys`], and every write
//! sweeps them after the repository has run its own invalidation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::histogram;
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::application::error::AppError;
use crate::application::query::{BulkOperationResult, Filters, QueryOptions, SortOrder};
use crate::application::repos::Repository;
use crate::cache::keys::SHAPE_COUNT;
use crate::cache::{CacheError, CacheManager, KeyGenerator};
use crate::domain::faq::{Faq, PRIORITY_MAX, PRIORITY_MIN};

pub(crate) const METRIC_CACHE_WARM_MS: &str = "taxfaq_cache_warm_ms";

pub const FAQ_NAMESPACE: &str = "faq";

pub const SHAPE_CATEGORY: &str = "category";
pub const SHAPE_CATEGORIES: &str = "categories";
pub const SHAPE_ACTIVE: &str = "active";
pub const SHAPE_PRIORITY: &str = "priority";
pub const SHAPE_SEARCH: &str = "search";

pub const FAQ_SHAPES: [&str; 5] = [
    SHAPE_CATEGORY,
    SHAPE_CATEGORIES,
    SHAPE_ACTIVE,
    SHAPE_PRIORITY,
    SHAPE_SEARCH,
];

/// Key generator for the FAQ namespace with the service shapes registered.
pub fn faq_keys() -> KeyGenerator<Faq> {
    KeyGenerator::with_shapes(FAQ_NAMESPACE, FAQ_SHAPES)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WarmupReport {
    pub faqs: usize,
    pub categories: usize,
}

pub struct FaqService {
    repo: Arc<dyn Repository<Faq>>,
    cache: CacheManager<Faq>,
}

impl FaqService {
    pub fn new(repo: Arc<dyn Repository<Faq>>, cache: CacheManager<Faq>) -> Self {
        Self { repo, cache }
    }

    pub fn cache(&self) -> &CacheManager<Faq> {
        &self.cache
    }

    #[instrument(skip_all, fields(category = %category.trim()))]
    pub async fn create(&self, question: &str, answer: &str, category: &str) -> Result<Faq, AppError> {
        let faq = Faq::new(question, answer, category)?;
        let created = self.repo.create(faq).await?;
        self.invalidate_listings([created.category.as_str()]).await;
        Ok(created)
    }

    /// Validates every draft; invalid ones are reported at their own index
    /// and never reach the repository.
    #[instrument(skip_all, fields(batch = drafts.len()))]
    pub async fn create_batch(&self, drafts: Vec<Faq>) -> Result<BulkOperationResult, AppError> {
        let mut result = BulkOperationResult::default();
        let mut valid = Vec::with_capacity(drafts.len());
        let mut positions = Vec::with_capacity(drafts.len());
        for (index, draft) in drafts.into_iter().enumerate() {
            match draft.validate() {
                Ok(()) => {
                    positions.push(index);
                    valid.push(draft);
                }
                Err(err) => result.record_failure(index, err.to_string()),
            }
        }
        if valid.is_empty() {
            return Ok(result);
        }

        let categories: BTreeSet<String> = valid.iter().map(|faq| faq.category.clone()).collect();
        let stored = self.repo.create_batch(valid).await?;
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

        self.invalidate_listings(categories.iter().map(String::as_str))
            .await;
        Ok(result)
    }

    pub async fn get(&self, id: Uuid) -> Result<Faq, AppError> {
        Ok(self.repo.find_by_id(&id).await?)
    }

    /// FAQs for `ids` in the requested order; unknown ids are skipped.
    pub async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<Faq>, AppError> {
        Ok(self.repo.find_by_ids(ids).await?)
    }

    #[instrument(skip_all, fields(id = %id))]
    pub async fn update_content(
        &self,
        id: Uuid,
        question: Option<&str>,
        answer: Option<&str>,
    ) -> Result<Faq, AppError> {
        if question.is_none() && answer.is_none() {
            return Err(AppError::validation("nothing to update"));
        }
        let mut faq = self.repo.find_by_id(&id).await?;
        if let Some(question) = question {
            faq.update_question(question)?;
        }
        if let Some(answer) = answer {
            faq.update_answer(answer)?;
        }
        self.save(faq, None).await
    }

    pub async fn set_priority(&self, id: Uuid, priority: i32) -> Result<Faq, AppError> {
        let mut faq = self.repo.find_by_id(&id).await?;
        faq.set_priority(priority)?;
        self.save(faq, None).await
    }

    pub async fn activate(&self, id: Uuid) -> Result<Faq, AppError> {
        let mut faq = self.repo.find_by_id(&id).await?;
        faq.activate();
        self.save(faq, None).await
    }

    pub async fn deactivate(&self, id: Uuid) -> Result<Faq, AppError> {
        let mut faq = self.repo.find_by_id(&id).await?;
        faq.deactivate();
        self.save(faq, None).await
    }

    /// Moves a FAQ to `category`; listings of both categories are invalidated.
    #[instrument(skip_all, fields(id = %id, category = %category.trim()))]
    pub async fn change_category(&self, id: Uuid, category: &str) -> Result<Faq, AppError> {
        let mut faq = self.repo.find_by_id(&id).await?;
        let previous = faq.category.clone();
        faq.update_category(category)?;
        self.save(faq, Some(previous)).await
    }

    #[instrument(skip_all, fields(id = %id))]
    pub async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        let faq = self.repo.find_by_id(&id).await?;
        self.repo.delete(&id).await?;
        self.invalidate_listings([faq.category.as_str()]).await;
        Ok(())
    }

    #[instrument(skip_all, fields(batch = ids.len()))]
    pub async fn bulk_delete(&self, ids: &[Uuid]) -> Result<BulkOperationResult, AppError> {
        let existing = self.repo.find_by_ids(ids).await?;
        let result = self.repo.delete_batch(ids).await?;
        let categories: BTreeSet<&str> = existing
            .iter()
            .map(|faq| faq.category.as_str())
            .collect();
        self.invalidate_listings(categories).await;
        Ok(result)
    }

    /// Active FAQs of `category`, highest priority first.
    pub async fn list_by_category(&self, category: &str) -> Result<Vec<Faq>, AppError> {
        let category = category.trim();
        if category.is_empty() {
            return Err(AppError::validation("category cannot be empty"));
        }
        let key = self.category_key(category);
        let options = active_options().with_filter("category", category);
        let ttl = self.cache.config().short_ttl;
        let items = self
            .cache
            .get_query(&key, ttl, || self.repo.find_all(&options))
            .await?;
        Ok(items)
    }

    /// Every active FAQ, highest priority first.
    pub async fn list_active(&self) -> Result<Vec<Faq>, AppError> {
        let key = self.cache.query_key(SHAPE_ACTIVE, &json!({}));
        let options = active_options();
        let ttl = self.cache.config().short_ttl;
        let items = self
            .cache
            .get_query(&key, ttl, || self.repo.find_all(&options))
            .await?;
        Ok(items)
    }

    pub async fn list_by_min_priority(&self, min_priority: i32) -> Result<Vec<Faq>, AppError> {
        if !(PRIORITY_MIN..=PRIORITY_MAX).contains(&min_priority) {
            return Err(AppError::validation(format!(
                "priority must be between {PRIORITY_MIN} and {PRIORITY_MAX}"
            )));
        }
        let key = self
            .cache
            .query_key(SHAPE_PRIORITY, &json!({ "min": min_priority }));
        let ttl = self.cache.config().short_ttl;
        self.cache
            .get_query(&key, ttl, || async {
                let active = self.list_active().await?;
                Ok::<_, AppError>(
                    active
                        .into_iter()
                        .filter(|faq| faq.priority >= min_priority)
                        .collect(),
                )
            })
            .await
    }

    /// Case-insensitive substring search over question, answer and category.
    pub async fn search(&self, term: &str) -> Result<Vec<Faq>, AppError> {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return Err(AppError::validation("search term cannot be empty"));
        }
        let key = self.cache.query_key(SHAPE_SEARCH, &json!({ "term": term }));
        let ttl = self.cache.config().short_ttl;
        self.cache
            .get_query(&key, ttl, || async {
                let active = self.list_active().await?;
                Ok::<_, AppError>(
                    active
                        .into_iter()
                        .filter(|faq| faq.searchable_text().contains(&term))
                        .collect(),
                )
            })
            .await
    }

    pub async fn count_by_category(&self, category: &str) -> Result<u64, AppError> {
        let filters = Filters::from([
            ("category".to_string(), json!(category.trim())),
            ("is_active".to_string(), json!(true)),
        ]);
        Ok(self.repo.count(&filters).await?)
    }

    pub async fn count_active(&self) -> Result<u64, AppError> {
        let filters = Filters::from([("is_active".to_string(), json!(true))]);
        Ok(self.repo.count(&filters).await?)
    }

    /// Sorted distinct categories of active FAQs, cached with the long TTL.
    pub async fn categories(&self) -> Result<Vec<String>, AppError> {
        let key = self
            .cache
            .query_key(SHAPE_CATEGORIES, &json!({ "counts": false }));
        let ttl = self.cache.config().long_ttl;
        self.cache
            .get_query(&key, ttl, || async {
                let active = self.list_active().await?;
                let distinct: BTreeSet<String> =
                    active.into_iter().map(|faq| faq.category).collect();
                Ok::<_, AppError>(distinct.into_iter().collect())
            })
            .await
    }

    pub async fn categories_with_counts(&self) -> Result<BTreeMap<String, u64>, AppError> {
        let key = self
            .cache
            .query_key(SHAPE_CATEGORIES, &json!({ "counts": true }));
        let ttl = self.cache.config().long_ttl;
        self.cache
            .get_query(&key, ttl, || async {
                let mut counts = BTreeMap::new();
                for faq in self.list_active().await? {
                    *counts.entry(faq.category).or_insert(0u64) += 1;
                }
                Ok::<_, AppError>(counts)
            })
            .await
    }

    pub async fn exists_by_question(&self, question: &str) -> Result<bool, AppError> {
        let filters = Filters::from([("question".to_string(), json!(question.trim()))]);
        Ok(self.repo.exists_by_fields(&filters).await?)
    }

    /// Caches every active FAQ by identity along with the category list.
    #[instrument(skip_all, fields(prefix = self.cache.keys().prefix()))]
    pub async fn warm_up(&self) -> Result<WarmupReport, AppError> {
        let started = Instant::now();
        let active = self.list_active().await?;
        for faq in &active {
            if let Err(err) = self.cache.set(faq, Duration::ZERO).await {
                warn!(
                    op = "warm_up",
                    key = %self.cache.keys().key(faq),
                    error = %err,
                    "Failed to cache FAQ during warm-up"
                );
            }
        }
        let categories = self.categories().await?;

        let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;
        histogram!(METRIC_CACHE_WARM_MS, "namespace" => self.cache.keys().prefix().to_string())
            .record(elapsed_ms);
        let report = WarmupReport {
            faqs: active.len(),
            categories: categories.len(),
        };
        info!(
            faqs = report.faqs,
            categories = report.categories,
            elapsed_ms,
            "Cache warm-up complete"
        );
        Ok(report)
    }

    async fn save(&self, faq: Faq, previous_category: Option<String>) -> Result<Faq, AppError> {
        let updated = self.repo.update(faq).await?;
        let mut categories = vec![updated.category.as_str()];
        if let Some(previous) = previous_category.as_deref() {
            categories.push(previous);
        }
        self.invalidate_listings(categories).await;
        Ok(updated)
    }

    fn category_key(&self, category: &str) -> String {
        self.cache
            .query_key(SHAPE_CATEGORY, &json!({ "category": category }))
    }

    /// Drops the listings a write to FAQs of `categories` can change.
    async fn invalidate_listings<'a, I>(&self, categories: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for category in categories {
            let key = self.category_key(category);
            log_failure(&key, self.cache.invalidate_query(&key).await);
        }
        let prefix = self.cache.keys().prefix();
        for shape in [SHAPE_ACTIVE, SHAPE_CATEGORIES, SHAPE_PRIORITY, SHAPE_SEARCH, SHAPE_COUNT] {
            let pattern = format!("{prefix}:{shape}:*");
            log_failure(&pattern, self.cache.invalidate_pattern(&pattern).await);
        }
    }
}

fn active_options() -> QueryOptions {
    QueryOptions::new()
        .with_filter("is_active", true)
        .with_sort("priority", SortOrder::Desc)
}

fn log_failure(target: &str, result: Result<(), CacheError>) {
    if let Err(err) = result {
        warn!(
            op = "invalidate_listings",
            key = target,
            error = %err,
            "Failed to invalidate FAQ listing"
        );
    }
}
