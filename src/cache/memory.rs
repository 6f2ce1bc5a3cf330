//! In-process [`Cache`] backend.
//!
//! Entries expire lazily: an expired entry is dropped the next time it is
//! touched, or by the pattern and clear sweeps.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::backend::Cache;
use super::config::CacheConfig;
use super::error::CacheError;
use super::lock::{rw_read, rw_write};
use super::pattern::glob_match;
use super::stats::StatsCollector;

const SOURCE: &str = "cache::memory";

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug)]
pub struct MemoryCache {
    config: Arc<CacheConfig>,
    namespace: String,
    entries: RwLock<HashMap<String, Entry>>,
    stats: StatsCollector,
}

impl MemoryCache {
    /// `namespace` scopes [`Cache::clear`]; keys are stored verbatim.
    pub fn new(config: Arc<CacheConfig>, namespace: impl Into<String>) -> Self {
        let stats = StatsCollector::new(config.enable_statistics);
        Self {
            config,
            namespace: namespace.into(),
            entries: RwLock::new(HashMap::new()),
            stats,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        rw_read(&self.entries, SOURCE, "len")
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn expiry(&self, ttl: Duration) -> Option<Instant> {
        Some(Instant::now() + self.config.resolve_ttl(ttl))
    }

    fn remove_matching(&self, pattern: &str, op: &'static str) -> u64 {
        let mut entries = rw_write(&self.entries, SOURCE, op);
        let before = entries.len();
        entries.retain(|key, _| !glob_match(pattern, key));
        (before - entries.len()) as u64
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        if !self.config.enabled {
            return Ok(());
        }
        let entry = Entry {
            value,
            expires_at: self.expiry(ttl),
        };
        rw_write(&self.entries, SOURCE, "set").insert(key.to_string(), entry);
        self.stats.record_set();
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<String, CacheError> {
        if !self.config.enabled {
            return Err(CacheError::Disabled);
        }
        let now = Instant::now();
        let found = {
            let entries = rw_read(&self.entries, SOURCE, "get");
            entries.get(key).map(|entry| (entry.is_live(now), entry.value.clone()))
        };
        match found {
            Some((true, value)) => {
                self.stats.record_hit();
                Ok(value)
            }
            Some((false, _)) => {
                rw_write(&self.entries, SOURCE, "get.expire").remove(key);
                self.stats.record_miss();
                Err(CacheError::miss(key))
            }
            None => {
                self.stats.record_miss();
                Err(CacheError::miss(key))
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        if rw_write(&self.entries, SOURCE, "delete")
            .remove(key)
            .is_some()
        {
            self.stats.record_delete();
        }
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let removed = self.remove_matching(pattern, "delete_pattern");
        self.stats.record_deletes(removed);
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        if !self.config.enabled {
            return Ok(false);
        }
        let now = Instant::now();
        Ok(rw_read(&self.entries, SOURCE, "exists")
            .get(key)
            .is_some_and(|entry| entry.is_live(now)))
    }

    async fn set_nx(&self, key: &str, value: String, ttl: Duration) -> Result<bool, CacheError> {
        if !self.config.enabled {
            return Ok(false);
        }
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "set_nx");
        if entries.get(key).is_some_and(|entry| entry.is_live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: self.expiry(ttl),
            },
        );
        drop(entries);
        self.stats.record_set();
        Ok(true)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "expire");
        match entries.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                entry.expires_at = Some(now + ttl);
                Ok(())
            }
            _ => Err(CacheError::miss(key)),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        let now = Instant::now();
        let entries = rw_read(&self.entries, SOURCE, "ttl");
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => {
                Ok(entry.expires_at.map(|at| at.saturating_duration_since(now)))
            }
            _ => Err(CacheError::miss(key)),
        }
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let removed = if self.namespace.is_empty() {
            let mut entries = rw_write(&self.entries, SOURCE, "clear");
            let removed = entries.len() as u64;
            entries.clear();
            removed
        } else {
            self.remove_matching(&format!("{}:*", self.namespace), "clear")
        };
        self.stats.record_deletes(removed);
        Ok(())
    }

    fn stats_collector(&self) -> &StatsCollector {
        &self.stats
    }
}
