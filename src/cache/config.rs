//! Cache and invalidation configuration.
//!
//! One [`CacheConfig`] is built from the loaded settings at startup and shared
//! through `Arc` by every cache manager and backend.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_TTL_SECS: u64 = 30 * 60;
const SHORT_TTL_SECS: u64 = 15 * 60;
const LONG_TTL_SECS: u64 = 60 * 60;
const DEFAULT_POPULATE_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_INVALIDATION_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// TTL applied when a caller passes a zero TTL.
    pub default_ttl: Duration,
    /// TTL for filtered or paginated query results.
    pub short_ttl: Duration,
    /// TTL for slow-changing aggregates such as category lists.
    pub long_ttl: Duration,
    /// When false every backend degrades to a pass-through.
    pub enabled: bool,
    pub enable_statistics: bool,
    pub warmup_on_start: bool,
    /// Upper bound for detached background population.
    pub populate_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            short_ttl: Duration::from_secs(SHORT_TTL_SECS),
            long_ttl: Duration::from_secs(LONG_TTL_SECS),
            enabled: true,
            enable_statistics: true,
            warmup_on_start: true,
            populate_timeout: Duration::from_millis(DEFAULT_POPULATE_TIMEOUT_MS),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            default_ttl: Duration::from_secs(settings.default_ttl_secs.get()),
            short_ttl: Duration::from_secs(settings.short_ttl_secs.get()),
            long_ttl: Duration::from_secs(settings.long_ttl_secs.get()),
            enabled: settings.enabled,
            enable_statistics: settings.enable_statistics,
            warmup_on_start: settings.warmup_on_start,
            populate_timeout: Duration::from_millis(settings.populate_timeout_ms.get()),
        }
    }
}

impl CacheConfig {
    /// Resolves a caller TTL, substituting the default for zero.
    pub fn resolve_ttl(&self, ttl: Duration) -> Duration {
        if ttl.is_zero() { self.default_ttl } else { ttl }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationMode {
    /// Clear the whole namespace on every mutation.
    #[default]
    Aggressive,
    /// Delete identity keys plus the registered query-key shapes.
    Selective,
}

impl InvalidationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            InvalidationMode::Aggressive => "aggressive",
            InvalidationMode::Selective => "selective",
        }
    }
}

impl fmt::Display for InvalidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvalidationMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "aggressive" => Ok(InvalidationMode::Aggressive),
            "selective" => Ok(InvalidationMode::Selective),
            other => Err(format!(
                "unknown invalidation mode `{other}` (expected `aggressive` or `selective`)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationConfig {
    pub mode: InvalidationMode,
    /// Identity keys deleted concurrently per round.
    pub batch_size: usize,
    /// Sweep registered query-key shapes alongside identity keys.
    pub invalidate_related: bool,
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            mode: InvalidationMode::default(),
            batch_size: DEFAULT_INVALIDATION_BATCH_SIZE,
            invalidate_related: true,
        }
    }
}

impl From<&crate::config::InvalidationSettings> for InvalidationConfig {
    fn from(settings: &crate::config::InvalidationSettings) -> Self {
        Self {
            mode: settings.mode,
            batch_size: settings.batch_size.get(),
            invalidate_related: settings.invalidate_related,
        }
    }
}

impl InvalidationConfig {
    pub fn selective() -> Self {
        Self {
            mode: InvalidationMode::Selective,
            ..Self::default()
        }
    }

    pub fn aggressive() -> Self {
        Self {
            mode: InvalidationMode::Aggressive,
            ..Self::default()
        }
    }
}
