//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    num::{NonZeroU32, NonZeroU64, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::InvalidationMode;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "taxfaq";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_REDIS_KEY_PREFIX: &str = "taxfaq:";
const DEFAULT_REDIS_OPERATION_TIMEOUT_MS: u64 = 500;
const DEFAULT_TTL_SECS: u64 = 30 * 60;
const DEFAULT_SHORT_TTL_SECS: u64 = 15 * 60;
const DEFAULT_LONG_TTL_SECS: u64 = 60 * 60;
const DEFAULT_POPULATE_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_INVALIDATION_BATCH_SIZE: u64 = 100;

/// Command-line arguments for the taxfaq binary.
#[derive(Debug, Parser)]
#[command(name = "taxfaq", version, about = "Tax FAQ cache operations")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "TAXFAQ_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone, PartialEq, Eq)]
pub enum Command {
    /// Load active FAQs and the category list into the cache.
    Warmup,
    /// Print cache statistics and testimonial aggregates, warming first if configured.
    Stats,
    /// Drop every cached FAQ and testimonial entry.
    #[command(name = "clear-cache")]
    ClearCache,
    /// Apply pending database migrations.
    Migrate,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL", global = true)]
    pub database_url: Option<String>,

    /// Override the Redis connection URL.
    #[arg(long = "redis-url", value_name = "URL", global = true)]
    pub redis_url: Option<String>,

    /// Enable or disable caching.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub cache_enabled: Option<bool>,

    /// Override the invalidation mode (aggressive|selective).
    #[arg(long = "invalidation-mode", value_name = "MODE", global = true)]
    pub invalidation_mode: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub redis: Option<RedisSettings>,
    pub cache: CacheSettings,
    pub invalidation: InvalidationSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

/// Present only when a Redis URL is configured; the in-process cache is
/// used otherwise.
#[derive(Debug, Clone)]
pub struct RedisSettings {
    pub url: String,
    pub key_prefix: String,
    pub operation_timeout_ms: NonZeroU64,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub default_ttl_secs: NonZeroU64,
    pub short_ttl_secs: NonZeroU64,
    pub long_ttl_secs: NonZeroU64,
    pub enabled: bool,
    pub enable_statistics: bool,
    pub warmup_on_start: bool,
    pub populate_timeout_ms: NonZeroU64,
}

#[derive(Debug, Clone)]
pub struct InvalidationSettings {
    pub mode: InvalidationMode,
    pub batch_size: NonZeroUsize,
    pub invalidate_related: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("TAXFAQ").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    redis: RawRedisSettings,
    cache: RawCacheSettings,
    invalidation: RawInvalidationSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(url) = overrides.redis_url.as_ref() {
            self.redis.url = Some(url.clone());
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(mode) = overrides.invalidation_mode.as_ref() {
            self.invalidation.mode = Some(mode.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            redis,
            cache,
            invalidation,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            redis: build_redis_settings(redis)?,
            cache: build_cache_settings(cache)?,
            invalidation: build_invalidation_settings(invalidation)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = non_blank(database.url);
    let max_connections = database
        .max_connections
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);
    let max_connections = NonZeroU32::new(max_connections).ok_or_else(|| {
        LoadError::invalid("database.max_connections", "must be greater than zero")
    })?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_redis_settings(redis: RawRedisSettings) -> Result<Option<RedisSettings>, LoadError> {
    let Some(url) = non_blank(redis.url) else {
        return Ok(None);
    };
    let key_prefix = redis
        .key_prefix
        .unwrap_or_else(|| DEFAULT_REDIS_KEY_PREFIX.to_string());
    if key_prefix.contains(['*', '?', '[']) {
        return Err(LoadError::invalid(
            "redis.key_prefix",
            "must not contain glob metacharacters",
        ));
    }
    let operation_timeout_ms = non_zero_u64(
        redis
            .operation_timeout_ms
            .unwrap_or(DEFAULT_REDIS_OPERATION_TIMEOUT_MS),
        "redis.operation_timeout_ms",
    )?;

    Ok(Some(RedisSettings {
        url,
        key_prefix,
        operation_timeout_ms,
    }))
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    Ok(CacheSettings {
        default_ttl_secs: non_zero_u64(
            cache.default_ttl_secs.unwrap_or(DEFAULT_TTL_SECS),
            "cache.default_ttl_secs",
        )?,
        short_ttl_secs: non_zero_u64(
            cache.short_ttl_secs.unwrap_or(DEFAULT_SHORT_TTL_SECS),
            "cache.short_ttl_secs",
        )?,
        long_ttl_secs: non_zero_u64(
            cache.long_ttl_secs.unwrap_or(DEFAULT_LONG_TTL_SECS),
            "cache.long_ttl_secs",
        )?,
        enabled: cache.enabled.unwrap_or(true),
        enable_statistics: cache.enable_statistics.unwrap_or(true),
        warmup_on_start: cache.warmup_on_start.unwrap_or(true),
        populate_timeout_ms: non_zero_u64(
            cache
                .populate_timeout_ms
                .unwrap_or(DEFAULT_POPULATE_TIMEOUT_MS),
            "cache.populate_timeout_ms",
        )?,
    })
}

fn build_invalidation_settings(
    invalidation: RawInvalidationSettings,
) -> Result<InvalidationSettings, LoadError> {
    let mode = match invalidation.mode {
        Some(mode) => InvalidationMode::from_str(mode.trim())
            .map_err(|reason| LoadError::invalid("invalidation.mode", reason))?,
        None => InvalidationMode::default(),
    };

    let batch_size = invalidation
        .batch_size
        .unwrap_or(DEFAULT_INVALIDATION_BATCH_SIZE);
    let batch_size = usize::try_from(batch_size)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| {
            LoadError::invalid(
                "invalidation.batch_size",
                "must be greater than zero and fit in usize",
            )
        })?;

    Ok(InvalidationSettings {
        mode,
        batch_size,
        invalidate_related: invalidation.invalidate_related.unwrap_or(true),
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn non_zero_u64(value: u64, key: &'static str) -> Result<NonZeroU64, LoadError> {
    NonZeroU64::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRedisSettings {
    url: Option<String>,
    key_prefix: Option<String>,
    operation_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    default_ttl_secs: Option<u64>,
    short_ttl_secs: Option<u64>,
    long_ttl_secs: Option<u64>,
    enabled: Option<bool>,
    enable_statistics: Option<bool>,
    warmup_on_start: Option<bool>,
    populate_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawInvalidationSettings {
    mode: Option<String>,
    batch_size: Option<u64>,
    invalidate_related: Option<bool>,
}
