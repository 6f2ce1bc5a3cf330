//! Hit, miss and write counters for a cache namespace.

use std::sync::RwLock;

use metrics::counter;
use serde::Serialize;
use time::OffsetDateTime;

use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::stats";

pub(crate) const METRIC_CACHE_HIT_TOTAL: &str = "taxfaq_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS_TOTAL: &str = "taxfaq_cache_miss_total";
pub(crate) const METRIC_CACHE_SET_TOTAL: &str = "taxfaq_cache_set_total";
pub(crate) const METRIC_CACHE_DELETE_TOTAL: &str = "taxfaq_cache_delete_total";
pub(crate) const METRIC_CACHE_ERROR_TOTAL: &str = "taxfaq_cache_error_total";

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
    pub last_updated: OffsetDateTime,
}

impl Stats {
    /// Percentage of reads served from cache; zero before any read.
    pub fn hit_rate(&self) -> f64 {
        let reads = self.hits + self.misses;
        if reads == 0 {
            return 0.0;
        }
        self.hits as f64 / reads as f64 * 100.0
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    sets: u64,
    deletes: u64,
    errors: u64,
}

/// Thread-safe counters. Recording is a no-op when statistics are disabled.
///
/// Collectors built with [`StatsCollector::with_metrics`] also emit the
/// `taxfaq_cache_*_total` counters labelled by namespace.
#[derive(Debug)]
pub struct StatsCollector {
    enabled: bool,
    namespace: Option<String>,
    counters: RwLock<Counters>,
}

impl StatsCollector {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            namespace: None,
            counters: RwLock::new(Counters::default()),
        }
    }

    pub fn with_metrics(enabled: bool, namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Self::new(enabled)
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn record_hit(&self) {
        self.record(Event::Hit, 1);
    }

    pub fn record_miss(&self) {
        self.record(Event::Miss, 1);
    }

    pub fn record_set(&self) {
        self.record(Event::Set, 1);
    }

    pub fn record_delete(&self) {
        self.record(Event::Delete, 1);
    }

    pub fn record_deletes(&self, count: u64) {
        self.record(Event::Delete, count);
    }

    pub fn record_error(&self) {
        self.record(Event::Error, 1);
    }

    pub fn snapshot(&self) -> Stats {
        let counters = rw_read(&self.counters, SOURCE, "snapshot");
        Stats {
            hits: counters.hits,
            misses: counters.misses,
            sets: counters.sets,
            deletes: counters.deletes,
            errors: counters.errors,
            last_updated: OffsetDateTime::now_utc(),
        }
    }

    pub fn reset(&self) {
        *rw_write(&self.counters, SOURCE, "reset") = Counters::default();
    }

    fn record(&self, event: Event, amount: u64) {
        if !self.enabled || amount == 0 {
            return;
        }
        {
            let mut counters = rw_write(&self.counters, SOURCE, event.op());
            let slot = match event {
                Event::Hit => &mut counters.hits,
                Event::Miss => &mut counters.misses,
                Event::Set => &mut counters.sets,
                Event::Delete => &mut counters.deletes,
                Event::Error => &mut counters.errors,
            };
            *slot = slot.saturating_add(amount);
        }
        if let Some(namespace) = &self.namespace {
            counter!(event.metric(), "namespace" => namespace.clone()).increment(amount);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Event {
    Hit,
    Miss,
    Set,
    Delete,
    Error,
}

impl Event {
    fn op(self) -> &'static str {
        match self {
            Event::Hit => "record_hit",
            Event::Miss => "record_miss",
            Event::Set => "record_set",
            Event::Delete => "record_delete",
            Event::Error => "record_error",
        }
    }

    fn metric(self) -> &'static str {
        match self {
            Event::Hit => METRIC_CACHE_HIT_TOTAL,
            Event::Miss => METRIC_CACHE_MISS_TOTAL,
            Event::Set => METRIC_CACHE_SET_TOTAL,
            Event::Delete => METRIC_CACHE_DELETE_TOTAL,
            Event::Error => METRIC_CACHE_ERROR_TOTAL,
        }
    }
}
