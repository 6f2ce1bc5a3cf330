//! Read-through caching for repositories.
//!
//! - [`Cache`]: string key/value backend contract ([`MemoryCache`] here,
//!   `infra::redis::RedisCache` for Redis).
//! - [`KeyGenerator`]: identity and query key derivation per namespace.
//! - [`StatsCollector`]: hit/miss/set/delete/error counters.
//! - [`Invalidator`]: aggressive or selective invalidation.
//! - [`CacheManager`]: typed façade combining the above.
//! - [`CachedRepository`]: the repository decorator built on a manager.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! default_ttl_secs = 1800
//! short_ttl_secs = 900
//! long_ttl_secs = 3600
//! enabled = true
//!
//! [invalidation]
//! mode = "aggressive"   # or "selective"
//! ```

mod backend;
mod config;
mod error;
mod invalidation;
pub mod keys;
mod lock;
mod manager;
mod memory;
pub mod pattern;
mod repository;
mod stats;

pub(crate) use lock::{rw_read, rw_write};

pub use backend::Cache;
pub use config::{CacheConfig, InvalidationConfig, InvalidationMode};
pub use error::CacheError;
pub use invalidation::{InvalidationStrategy, Invalidator};
pub use keys::KeyGenerator;
pub use manager::{CacheManager, Epoch};
pub use memory::MemoryCache;
pub use repository::CachedRepository;
pub use stats::{Stats, StatsCollector};

pub(crate) use manager::METRIC_CACHE_GET_MULTIPLE_MS;
pub(crate) use stats::{
    METRIC_CACHE_DELETE_TOTAL, METRIC_CACHE_ERROR_TOTAL, METRIC_CACHE_HIT_TOTAL,
    METRIC_CACHE_MISS_TOTAL, METRIC_CACHE_SET_TOTAL,
};
