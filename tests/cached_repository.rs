use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use taxfaq::application::query::{
    BulkOperationResult, FieldUpdates, Filters, PaginatedResult, QueryOptions, SortOrder,
};
use taxfaq::application::repos::{RepoError, Repository, TransactionFn, transaction};
use taxfaq::cache::{
    CacheConfig, CacheManager, CachedRepository, InvalidationConfig, KeyGenerator, MemoryCache,
};
use taxfaq::domain::faq::Faq;
use taxfaq::infra::memory::MemoryStore;
use uuid::Uuid;

/// Memory store that records which reads reach it.
#[derive(Default)]
struct CountingStore {
    inner: MemoryStore<Faq>,
    find_by_id: AtomicUsize,
    find_all: AtomicUsize,
    count: AtomicUsize,
    batch_requests: Mutex<Vec<Vec<Uuid>>>,
}

impl CountingStore {
    fn find_by_id_calls(&self) -> usize {
        self.find_by_id.load(Ordering::SeqCst)
    }

    fn find_all_calls(&self) -> usize {
        self.find_all.load(Ordering::SeqCst)
    }

    fn count_calls(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    fn batch_requests(&self) -> Vec<Vec<Uuid>> {
        self.batch_requests.lock().expect("batch requests").clone()
    }
}

#[async_trait]
impl Repository<Faq> for CountingStore {
    async fn create(&self, entity: Faq) -> Result<Faq, RepoError> {
        self.inner.create(entity).await
    }

    async fn create_batch(&self, entities: Vec<Faq>) -> Result<BulkOperationResult, RepoError> {
        self.inner.create_batch(entities).await
    }

    async fn find_by_id(&self, id: &Uuid) -> Result<Faq, RepoError> {
        self.find_by_id.fetch_add(1, Ordering::SeqCst);
        self.inner.find_by_id(id).await
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Faq>, RepoError> {
        self.batch_requests
            .lock()
            .expect("batch requests")
            .push(ids.to_vec());
        self.inner.find_by_ids(ids).await
    }

    async fn update(&self, entity: Faq) -> Result<Faq, RepoError> {
        self.inner.update(entity).await
    }

    async fn update_batch(&self, entities: Vec<Faq>) -> Result<BulkOperationResult, RepoError> {
        self.inner.update_batch(entities).await
    }

    async fn update_fields(&self, id: &Uuid, fields: FieldUpdates) -> Result<(), RepoError> {
        self.inner.update_fields(id, fields).await
    }

    async fn delete(&self, id: &Uuid) -> Result<(), RepoError> {
        self.inner.delete(id).await
    }

    async fn delete_batch(&self, ids: &[Uuid]) -> Result<BulkOperationResult, RepoError> {
        self.inner.delete_batch(ids).await
    }

    async fn soft_delete(&self, id: &Uuid) -> Result<(), RepoError> {
        self.inner.soft_delete(id).await
    }

    async fn find_all(&self, options: &QueryOptions) -> Result<Vec<Faq>, RepoError> {
        self.find_all.fetch_add(1, Ordering::SeqCst);
        self.inner.find_all(options).await
    }

    async fn find_one(&self, options: &QueryOptions) -> Result<Faq, RepoError> {
        self.inner.find_one(options).await
    }

    async fn find_with_pagination(
        &self,
        options: &QueryOptions,
    ) -> Result<PaginatedResult<Faq>, RepoError> {
        self.inner.find_with_pagination(options).await
    }

    async fn count(&self, filters: &Filters) -> Result<u64, RepoError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.inner.count(filters).await
    }

    async fn exists(&self, id: &Uuid) -> Result<bool, RepoError> {
        self.inner.exists(id).await
    }

    async fn exists_by_fields(&self, filters: &Filters) -> Result<bool, RepoError> {
        self.inner.exists_by_fields(filters).await
    }

    async fn with_transaction(&self, work: TransactionFn<Faq>) -> Result<(), RepoError> {
        self.inner.with_transaction(work).await
    }

    async fn refresh(&self, entity: &mut Faq) -> Result<(), RepoError> {
        self.inner.refresh(entity).await
    }

    async fn clear(&self) -> Result<(), RepoError> {
        self.inner.clear().await
    }
}

struct Fixture {
    store: Arc<CountingStore>,
    repo: CachedRepository<Faq>,
}

fn fixture_with(config: CacheConfig, invalidation: InvalidationConfig) -> Fixture {
    let config = Arc::new(config);
    let cache = Arc::new(MemoryCache::new(Arc::clone(&config), "faq"));
    let manager = CacheManager::new(cache, KeyGenerator::new("faq"), config, &invalidation);
    let store = Arc::new(CountingStore::default());
    let repo = CachedRepository::new(Arc::clone(&store) as Arc<dyn Repository<Faq>>, manager);
    Fixture { store, repo }
}

fn fixture() -> Fixture {
    fixture_with(CacheConfig::default(), InvalidationConfig::default())
}

fn faq(question: &str, category: &str) -> Faq {
    Faq::new(question, "See the instructions for the form.", category).expect("valid faq")
}

#[tokio::test]
async fn find_by_id_reads_through_once() {
    let Fixture { store, repo } = fixture();
    let created = repo
        .create(faq("What is form W-2 for?", "forms"))
        .await
        .expect("create");

    let first = repo.find_by_id(&created.id).await.expect("first read");
    let second = repo.find_by_id(&created.id).await.expect("second read");

    assert_eq!(first, created);
    assert_eq!(second, created);
    assert_eq!(store.find_by_id_calls(), 1);
    let stats = repo.cache().stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert!((stats.hit_rate() - 50.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn update_is_visible_to_the_next_read() {
    let Fixture { repo, .. } = fixture();
    let created = repo
        .create(faq("What is form W-2 for?", "forms"))
        .await
        .expect("create");
    repo.find_by_id(&created.id).await.expect("prime cache");

    let mut changed = created.clone();
    changed
        .update_answer("It reports wages paid by an employer.")
        .expect("valid answer");
    repo.update(changed).await.expect("update");

    let read = repo.find_by_id(&created.id).await.expect("read after update");
    assert_eq!(read.answer, "It reports wages paid by an employer.");
}

#[tokio::test]
async fn delete_hides_entity_from_cached_reads() {
    let Fixture { repo, .. } = fixture();
    let created = repo
        .create(faq("What is form W-2 for?", "forms"))
        .await
        .expect("create");
    repo.find_by_id(&created.id).await.expect("prime cache");

    repo.delete(&created.id).await.expect("delete");

    let err = repo.find_by_id(&created.id).await.expect_err("deleted");
    assert!(err.is_not_found());
    assert!(!repo.exists(&created.id).await.expect("exists"));
}

#[tokio::test]
async fn find_by_ids_keeps_input_order_and_loads_misses_in_one_call() {
    let Fixture { store, repo } = fixture();
    let a = repo
        .create(faq("What is form W-2 for?", "forms"))
        .await
        .expect("create a");
    let b = repo
        .create(faq("What is form 1099-NEC for?", "forms"))
        .await
        .expect("create b");
    let c = repo
        .create(faq("When are estimated payments due?", "deadlines"))
        .await
        .expect("create c");
    repo.find_by_id(&b.id).await.expect("cache b");

    let unknown = Uuid::new_v4();
    let found = repo
        .find_by_ids(&[c.id, unknown, b.id, a.id])
        .await
        .expect("find by ids");

    let ids: Vec<Uuid> = found.iter().map(|faq| faq.id).collect();
    assert_eq!(ids, vec![c.id, b.id, a.id]);
    let requests = store.batch_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0], vec![c.id, unknown, a.id]);
}

#[tokio::test]
async fn count_is_cached_until_a_write() {
    let Fixture { store, repo } = fixture();
    let filters = Filters::from([("category".to_string(), json!("forms"))]);
    repo.create(faq("What is form W-2 for?", "forms"))
        .await
        .expect("create");

    assert_eq!(repo.count(&filters).await.expect("count"), 1);
    assert_eq!(repo.count(&filters).await.expect("cached count"), 1);
    assert_eq!(store.count_calls(), 1);

    repo.create(faq("What is form 1099-NEC for?", "forms"))
        .await
        .expect("create");
    assert_eq!(repo.count(&filters).await.expect("fresh count"), 2);
    assert_eq!(store.count_calls(), 2);
}

#[tokio::test]
async fn distinct_query_options_use_distinct_entries() {
    let Fixture { store, repo } = fixture();
    repo.create(faq("What is form W-2 for?", "forms"))
        .await
        .expect("create");
    repo.create(faq("When are estimated payments due?", "deadlines"))
        .await
        .expect("create");

    let forms = QueryOptions::new().with_filter("category", "forms");
    let newest = QueryOptions::new().with_sort("created_at", SortOrder::Desc);

    assert_eq!(repo.find_all(&forms).await.expect("forms").len(), 1);
    assert_eq!(repo.find_all(&newest).await.expect("newest").len(), 2);
    assert_eq!(repo.find_all(&forms).await.expect("cached forms").len(), 1);
    assert_eq!(store.find_all_calls(), 2);
}

#[tokio::test]
async fn aggressive_mode_drops_unrelated_identity_entries() {
    let Fixture { store, repo } =
        fixture_with(CacheConfig::default(), InvalidationConfig::aggressive());
    let a = repo
        .create(faq("What is form W-2 for?", "forms"))
        .await
        .expect("create a");
    let b = repo
        .create(faq("When are estimated payments due?", "deadlines"))
        .await
        .expect("create b");
    repo.find_by_id(&b.id).await.expect("cache b");

    repo.update(a.clone()).await.expect("update a");
    repo.find_by_id(&b.id).await.expect("reload b");

    assert_eq!(store.find_by_id_calls(), 2);
}

#[tokio::test]
async fn selective_mode_keeps_unrelated_identity_entries_but_sweeps_queries() {
    let Fixture { store, repo } =
        fixture_with(CacheConfig::default(), InvalidationConfig::selective());
    let a = repo
        .create(faq("What is form W-2 for?", "forms"))
        .await
        .expect("create a");
    let b = repo
        .create(faq("When are estimated payments due?", "deadlines"))
        .await
        .expect("create b");
    repo.find_by_id(&b.id).await.expect("cache b");
    repo.count(&Filters::new()).await.expect("cache count");

    repo.update(a.clone()).await.expect("update a");
    repo.find_by_id(&b.id).await.expect("b still cached");
    repo.count(&Filters::new()).await.expect("count reloaded");

    assert_eq!(store.find_by_id_calls(), 1);
    assert_eq!(store.count_calls(), 2);
}

#[tokio::test]
async fn disabled_cache_passes_every_read_through() {
    let Fixture { store, repo } =
        fixture_with(CacheConfig::disabled(), InvalidationConfig::default());
    let created = repo
        .create(faq("What is form W-2 for?", "forms"))
        .await
        .expect("create");

    for _ in 0..3 {
        repo.find_by_id(&created.id).await.expect("read");
        repo.count(&Filters::new()).await.expect("count");
    }

    assert_eq!(store.find_by_id_calls(), 3);
    assert_eq!(store.count_calls(), 3);
}

#[tokio::test]
async fn committed_transaction_invalidates_the_namespace() {
    let Fixture { repo, .. } = fixture();
    assert_eq!(repo.count(&Filters::new()).await.expect("empty count"), 0);

    let first = faq("What is form W-2 for?", "forms");
    let second = faq("When are estimated payments due?", "deadlines");
    repo.with_transaction(transaction(move |tx| {
        Box::pin(async move {
            tx.create(first).await?;
            tx.create(second).await?;
            Ok(())
        })
    }))
    .await
    .expect("transaction");

    assert_eq!(repo.count(&Filters::new()).await.expect("count"), 2);
}

#[tokio::test]
async fn failed_transaction_leaves_store_untouched() {
    let Fixture { repo, .. } = fixture();
    let kept = faq("What is form W-2 for?", "forms");
    let result = repo
        .with_transaction(transaction(move |tx| {
            Box::pin(async move {
                tx.create(kept).await?;
                Err(RepoError::invalid_input("abort"))
            })
        }))
        .await;

    assert!(matches!(result, Err(RepoError::InvalidInput { .. })));
    assert_eq!(repo.count(&Filters::new()).await.expect("count"), 0);
}

#[tokio::test]
async fn refresh_replaces_stale_cached_copy() {
    let Fixture { store, repo } = fixture();
    let created = repo
        .create(faq("What is form W-2 for?", "forms"))
        .await
        .expect("create");
    repo.find_by_id(&created.id).await.expect("prime cache");

    let mut changed = created.clone();
    changed.set_priority(40).expect("valid priority");
    store.update(changed).await.expect("update behind the cache");

    let mut local = created.clone();
    repo.refresh(&mut local).await.expect("refresh");
    assert_eq!(local.priority, 40);
    assert_eq!(
        repo.find_by_id(&created.id).await.expect("cached").priority,
        40
    );
}

#[tokio::test]
async fn clear_resets_statistics() {
    let Fixture { repo, .. } = fixture();
    let created = repo
        .create(faq("What is form W-2 for?", "forms"))
        .await
        .expect("create");
    repo.find_by_id(&created.id).await.expect("read");
    repo.find_by_id(&created.id).await.expect("read");

    repo.clear().await.expect("clear");

    let stats = repo.cache().stats();
    assert_eq!((stats.hits, stats.misses, stats.sets), (0, 0, 0));
    assert!(repo.find_by_id(&created.id).await.expect_err("gone").is_not_found());
}
