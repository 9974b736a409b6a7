use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
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
            "facciata_page_cache_hit_total",
            Unit::Count,
            "Total number of article requests served from the disk cache."
        );
        describe_counter!(
            "facciata_page_cache_miss_total",
            Unit::Count,
            "Total number of article requests with no cached artifact."
        );
        describe_counter!(
            "facciata_origin_fetch_fail_total",
            Unit::Count,
            "Total number of failed origin fetches during cache population."
        );
        describe_counter!(
            "facciata_origin_fetch_skip_total",
            Unit::Count,
            "Total number of origin fetches skipped for export clients."
        );
        describe_counter!(
            "facciata_guard_forbidden_total",
            Unit::Count,
            "Total number of requests rejected for a denylisted extension."
        );
        describe_histogram!(
            "facciata_origin_fetch_ms",
            Unit::Milliseconds,
            "Origin fetch and persist latency in milliseconds."
        );
    });
}
