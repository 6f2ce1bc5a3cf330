use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::application::faqs::METRIC_CACHE_WARM_MS;
use crate::cache::{
    METRIC_CACHE_DELETE_TOTAL, METRIC_CACHE_ERROR_TOTAL, METRIC_CACHE_GET_MULTIPLE_MS,
    METRIC_CACHE_HIT_TOTAL, METRIC_CACHE_MISS_TOTAL, METRIC_CACHE_SET_TOTAL,
};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Metric descriptions are registered with whatever recorder is installed;
/// without one the `metrics` macros are no-ops.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_CACHE_HIT_TOTAL,
            Unit::Count,
            "Total number of cache hits per namespace."
        );
        describe_counter!(
            METRIC_CACHE_MISS_TOTAL,
            Unit::Count,
            "Total number of cache misses per namespace."
        );
        describe_counter!(
            METRIC_CACHE_SET_TOTAL,
            Unit::Count,
            "Total number of cache writes per namespace."
        );
        describe_counter!(
            METRIC_CACHE_DELETE_TOTAL,
            Unit::Count,
            "Total number of cache keys removed per namespace."
        );
        describe_counter!(
            METRIC_CACHE_ERROR_TOTAL,
            Unit::Count,
            "Total number of failed cache backend operations per namespace."
        );
        describe_histogram!(
            METRIC_CACHE_GET_MULTIPLE_MS,
            Unit::Milliseconds,
            "Batched cache lookup latency in milliseconds."
        );
        describe_histogram!(
            METRIC_CACHE_WARM_MS,
            Unit::Milliseconds,
            "Cache warm-up latency in milliseconds."
        );
    });
}
