use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use taxfaq::application::repos::{RepoError, Repository};
use taxfaq::cache::{
    Cache, CacheConfig, CacheError, CacheManager, CachedRepository, InvalidationConfig,
    KeyGenerator, MemoryCache, StatsCollector,
};
use taxfaq::domain::faq::Faq;
use taxfaq::infra::memory::MemoryStore;
use tokio::sync::Notify;
use uuid::Uuid;

/// Memory cache whose writes take `set_delay` and whose reads can be held
/// until `release` is notified.
struct SlowCache {
    inner: MemoryCache,
    set_delay: Duration,
    hold_reads: bool,
    release: Notify,
    started_reads: AtomicUsize,
    dropped_reads: Arc<AtomicUsize>,
}

impl SlowCache {
    fn new(config: Arc<CacheConfig>, set_delay: Duration, hold_reads: bool) -> Self {
        Self {
            inner: MemoryCache::new(config, "faq"),
            set_delay,
            hold_reads,
            release: Notify::new(),
            started_reads: AtomicUsize::new(0),
            dropped_reads: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// Counts reads whose future was dropped before completing.
struct PendingRead {
    dropped: Arc<AtomicUsize>,
    done: bool,
}

impl Drop for PendingRead {
    fn drop(&mut self) {
        if !self.done {
            self.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Cache for SlowCache {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        tokio::time::sleep(self.set_delay).await;
        self.inner.set(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<String, CacheError> {
        if self.hold_reads {
            let mut pending = PendingRead {
                dropped: Arc::clone(&self.dropped_reads),
                done: false,
            };
            self.started_reads.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            pending.done = true;
        }
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.inner.delete(key).await
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        self.inner.delete_pattern(pattern).await
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.inner.exists(key).await
    }

    async fn set_nx(&self, key: &str, value: String, ttl: Duration) -> Result<bool, CacheError> {
        self.inner.set_nx(key, value, ttl).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        self.inner.expire(key, ttl).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        self.inner.ttl(key).await
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.inner.clear().await
    }

    fn stats_collector(&self) -> &StatsCollector {
        self.inner.stats_collector()
    }
}

fn manager_over(cache: Arc<SlowCache>, config: Arc<CacheConfig>) -> CacheManager<Faq> {
    CacheManager::new(
        cache,
        KeyGenerator::new("faq"),
        config,
        &InvalidationConfig::selective(),
    )
}

fn faq(question: &str) -> Faq {
    Faq::new(question, "See the instructions for the form.", "forms").expect("valid faq")
}

#[tokio::test]
async fn in_flight_population_cannot_resurrect_deleted_entity() {
    let config = Arc::new(CacheConfig::default());
    let cache = Arc::new(SlowCache::new(
        Arc::clone(&config),
        Duration::from_millis(20),
        false,
    ));
    let repo = CachedRepository::new(
        Arc::new(MemoryStore::<Faq>::new()),
        manager_over(Arc::clone(&cache), config),
    );

    let created = repo.create(faq("What is form W-2 for?")).await.expect("create");
    let found = repo.find_by_ids(&[created.id]).await.expect("find by ids");
    assert_eq!(found.len(), 1);

    // Lets the detached population start its slow write.
    tokio::task::yield_now().await;
    repo.delete(&created.id).await.expect("delete");

    assert!(matches!(
        repo.find_by_id(&created.id).await,
        Err(RepoError::NotFound)
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(matches!(
        repo.find_by_id(&created.id).await,
        Err(RepoError::NotFound)
    ));

    let key = repo.cache().keys().key_by_id(&created.id);
    assert!(!cache.exists(&key).await.expect("exists"));
}

#[tokio::test]
async fn in_flight_query_write_cannot_outlive_invalidation() {
    let config = Arc::new(CacheConfig::default());
    let cache = Arc::new(SlowCache::new(
        Arc::clone(&config),
        Duration::from_millis(20),
        false,
    ));
    let manager = manager_over(Arc::clone(&cache), config);
    let key = manager.query_key("count", &());

    let reader = {
        let manager = manager.clone();
        let key = key.clone();
        tokio::spawn(async move {
            manager
                .get_query(&key, Duration::ZERO, || async { Ok::<u64, ()>(1) })
                .await
        })
    };
    tokio::task::yield_now().await;
    manager.invalidate_query(&key).await.expect("invalidate");

    assert_eq!(reader.await.expect("reader task"), Ok(1));
    assert!(!cache.exists(&key).await.expect("exists"));
}

#[tokio::test]
async fn dropping_get_multiple_cancels_outstanding_lookups() {
    let config = Arc::new(CacheConfig::default());
    let cache = Arc::new(SlowCache::new(Arc::clone(&config), Duration::ZERO, true));
    let manager = manager_over(Arc::clone(&cache), config);
    let ids = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
    let loader_calls = AtomicUsize::new(0);

    let outcome = tokio::time::timeout(
        Duration::from_millis(20),
        manager.get_multiple(&ids, |_| {
            loader_calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<HashMap<Uuid, Faq>, ()>(HashMap::new()) }
        }),
    )
    .await;
    assert!(outcome.is_err());
    assert_eq!(cache.started_reads.load(Ordering::SeqCst), ids.len());

    // Aborted lookup tasks are dropped the next time the runtime polls them.
    for _ in 0..10 {
        if cache.dropped_reads.load(Ordering::SeqCst) == ids.len() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(cache.dropped_reads.load(Ordering::SeqCst), ids.len());
    assert_eq!(loader_calls.load(Ordering::SeqCst), 0);
}
