use std::collections::BTreeMap;
use std::sync::Arc;

use taxfaq::application::error::AppError;
use taxfaq::application::faqs::{FAQ_NAMESPACE, FaqService, faq_keys};
use taxfaq::cache::{
    Cache, CacheConfig, CacheManager, CachedRepository, InvalidationConfig, MemoryCache,
};
use taxfaq::domain::faq::Faq;
use taxfaq::infra::memory::MemoryStore;

fn service_with(invalidation: InvalidationConfig) -> FaqService {
    let config = Arc::new(CacheConfig::default());
    let cache = Arc::new(MemoryCache::new(Arc::clone(&config), FAQ_NAMESPACE));
    let manager = CacheManager::new(cache, faq_keys(), config, &invalidation);
    let repo = CachedRepository::new(Arc::new(MemoryStore::<Faq>::new()), manager.clone());
    FaqService::new(Arc::new(repo), manager)
}

fn service() -> FaqService {
    service_with(InvalidationConfig::default())
}

async fn seed(service: &FaqService) -> (Faq, Faq, Faq) {
    let w2 = service
        .create(
            "What is form W-2 for?",
            "It reports wages and withheld taxes.",
            "forms",
        )
        .await
        .expect("create w2");
    let estimated = service
        .create(
            "When are estimated payments due?",
            "Quarterly, in April, June, September and January.",
            "deadlines",
        )
        .await
        .expect("create estimated");
    let extension = service
        .create(
            "How do I file an extension?",
            "Submit form 4868 before the filing deadline.",
            "deadlines",
        )
        .await
        .expect("create extension");
    (w2, estimated, extension)
}

#[tokio::test]
async fn category_change_moves_faq_between_cached_listings() {
    let service = service_with(InvalidationConfig::selective());
    let (w2, _, _) = seed(&service).await;

    assert_eq!(service.list_by_category("forms").await.expect("forms").len(), 1);
    assert_eq!(
        service
            .list_by_category("deadlines")
            .await
            .expect("deadlines")
            .len(),
        2
    );
    assert_eq!(
        service.categories().await.expect("categories"),
        vec!["deadlines".to_string(), "forms".to_string()]
    );

    service
        .change_category(w2.id, "wages")
        .await
        .expect("change category");

    assert!(service.list_by_category("forms").await.expect("forms").is_empty());
    let wages = service.list_by_category("wages").await.expect("wages");
    assert_eq!(wages.len(), 1);
    assert_eq!(wages[0].id, w2.id);
    assert_eq!(
        service.categories().await.expect("categories"),
        vec!["deadlines".to_string(), "wages".to_string()]
    );
    assert_eq!(service.get(w2.id).await.expect("get").category, "wages");
}

#[tokio::test]
async fn w2_lifecycle_reads_through_and_leaves_no_identity_key() {
    let config = Arc::new(CacheConfig::default());
    let cache = Arc::new(MemoryCache::new(Arc::clone(&config), FAQ_NAMESPACE));
    let manager = CacheManager::new(
        Arc::clone(&cache) as Arc<dyn Cache>,
        faq_keys(),
        config,
        &InvalidationConfig::default(),
    );
    let repo = CachedRepository::new(Arc::new(MemoryStore::<Faq>::new()), manager.clone());
    let service = FaqService::new(Arc::new(repo), manager.clone());

    let created = service
        .create(
            "What is a W-2 form and when is it issued?",
            "Employers send it by January 31 to report wages and withholding.",
            "forms",
        )
        .await
        .expect("create faq");
    let key = manager.keys().key_by_id(&created.id);

    let loaded = service.get(created.id).await.expect("first read");
    assert!(loaded.is_active);
    assert_eq!(loaded.priority, 0);
    assert!(cache.exists(&key).await.expect("exists"));

    service.set_priority(created.id, 50).await.expect("set priority");
    assert_eq!(service.get(created.id).await.expect("reload").priority, 50);
    let hits_before = manager.stats().hits;
    assert_eq!(service.get(created.id).await.expect("cached").priority, 50);
    assert_eq!(manager.stats().hits, hits_before + 1);

    service.delete(created.id).await.expect("delete");
    assert!(service.get(created.id).await.expect_err("deleted").is_not_found());
    assert!(!cache.exists(&key).await.expect("exists"));
}

#[tokio::test]
async fn search_reflects_answer_updates() {
    let service = service();
    let (w2, _, _) = seed(&service).await;

    let hits = service.search("WAGES").await.expect("search");
    assert_eq!(hits.len(), 1);
    assert!(service.search("employer").await.expect("search").is_empty());

    service
        .update_content(w2.id, None, Some("Your employer sends it by January 31."))
        .await
        .expect("update answer");

    assert_eq!(service.search("employer").await.expect("search").len(), 1);
    assert!(service.search("withheld").await.expect("search").is_empty());
}

#[tokio::test]
async fn listings_are_ordered_by_priority() {
    let service = service();
    let (w2, estimated, extension) = seed(&service).await;
    service.set_priority(extension.id, 90).await.expect("priority");
    service.set_priority(w2.id, 50).await.expect("priority");

    let active: Vec<_> = service
        .list_active()
        .await
        .expect("active")
        .into_iter()
        .map(|faq| faq.id)
        .collect();
    assert_eq!(active, vec![extension.id, w2.id, estimated.id]);

    let important: Vec<_> = service
        .list_by_min_priority(50)
        .await
        .expect("by priority")
        .into_iter()
        .map(|faq| faq.id)
        .collect();
    assert_eq!(important, vec![extension.id, w2.id]);
}

#[tokio::test]
async fn deactivated_faqs_leave_public_listings() {
    let service = service();
    let (_, estimated, _) = seed(&service).await;
    assert_eq!(service.count_active().await.expect("count"), 3);
    assert_eq!(service.count_by_category("deadlines").await.expect("count"), 2);

    service.deactivate(estimated.id).await.expect("deactivate");

    assert_eq!(service.count_active().await.expect("count"), 2);
    assert_eq!(service.count_by_category("deadlines").await.expect("count"), 1);
    assert_eq!(
        service.categories_with_counts().await.expect("counts"),
        BTreeMap::from([("deadlines".to_string(), 1), ("forms".to_string(), 1)])
    );

    service.activate(estimated.id).await.expect("activate");
    assert_eq!(service.list_active().await.expect("active").len(), 3);
}

#[tokio::test]
async fn create_batch_reports_invalid_drafts_by_position() {
    let service = service();
    let valid = Faq::new(
        "Can I deduct student loan interest?",
        "Yes, up to the annual limit.",
        "deductions",
    )
    .expect("valid faq");
    let mut invalid = valid.clone();
    invalid.id = uuid::Uuid::new_v4();
    invalid.priority = 500;
    let another = Faq::new(
        "Is unemployment income taxable?",
        "Yes, it is reported on form 1099-G.",
        "income",
    )
    .expect("valid faq");

    let result = service
        .create_batch(vec![valid.clone(), invalid, another.clone()])
        .await
        .expect("batch");

    assert_eq!(result.success_count, 2);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].index, 1);
    let loaded = service
        .get_many(&[another.id, valid.id])
        .await
        .expect("get many");
    assert_eq!(
        loaded.iter().map(|faq| faq.id).collect::<Vec<_>>(),
        vec![another.id, valid.id]
    );
}

#[tokio::test]
async fn bulk_delete_removes_faqs_from_listings() {
    let service = service();
    let (w2, estimated, extension) = seed(&service).await;
    assert_eq!(service.list_active().await.expect("active").len(), 3);

    let result = service
        .bulk_delete(&[w2.id, estimated.id])
        .await
        .expect("bulk delete");

    assert_eq!(result.success_count, 2);
    let remaining: Vec<_> = service
        .list_active()
        .await
        .expect("active")
        .into_iter()
        .map(|faq| faq.id)
        .collect();
    assert_eq!(remaining, vec![extension.id]);
    assert!(service.get(w2.id).await.expect_err("deleted").is_not_found());
}

#[tokio::test]
async fn exists_by_question_tracks_deletes() {
    let service = service();
    let (w2, _, _) = seed(&service).await;
    assert!(service
        .exists_by_question("What is form W-2 for?")
        .await
        .expect("exists"));

    service.delete(w2.id).await.expect("delete");

    assert!(!service
        .exists_by_question("What is form W-2 for?")
        .await
        .expect("exists"));
}

#[tokio::test]
async fn warm_up_serves_identity_reads_from_cache() {
    let config = Arc::new(CacheConfig::default());
    let cache = Arc::new(MemoryCache::new(Arc::clone(&config), FAQ_NAMESPACE));
    let manager = CacheManager::new(cache, faq_keys(), config, &InvalidationConfig::selective());
    let service = FaqService::new(Arc::new(MemoryStore::<Faq>::new()), manager.clone());

    let (w2, _, extension) = seed(&service).await;
    service.deactivate(extension.id).await.expect("deactivate");

    let report = service.warm_up().await.expect("warm up");
    assert_eq!(report.faqs, 2);
    assert_eq!(report.categories, 2);
    assert_eq!(manager.get(&w2.id).await.expect("warmed").id, w2.id);
    assert!(manager.get(&extension.id).await.is_err());
}

#[tokio::test]
async fn invalid_input_is_a_validation_error() {
    let service = service();
    let err = service
        .list_by_category("   ")
        .await
        .expect_err("blank category");
    assert!(matches!(err, AppError::Validation(_)));

    let (w2, _, _) = seed(&service).await;
    let err = service
        .set_priority(w2.id, -1)
        .await
        .expect_err("negative priority");
    assert!(matches!(err, AppError::Domain(_)));
}
