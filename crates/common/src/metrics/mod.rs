//! Metrics and observability utilities
//!
//! Provides Prometheus metric descriptions and recording helpers
//! with standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

/// Metrics prefix for all Cerberus metrics
pub const METRICS_PREFIX: &str = "cerberus";

/// Buckets for context build latency (in seconds)
pub const BUILD_BUCKETS: &[f64] = &[
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Context build metrics
    describe_counter!(
        format!("{}_context_builds_total", METRICS_PREFIX),
        Unit::Count,
        "Total context bundle builds by outcome"
    );

    describe_histogram!(
        format!("{}_context_build_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Context bundle build latency in seconds"
    );

    describe_histogram!(
        format!("{}_context_tokens", METRICS_PREFIX),
        Unit::Count,
        "Estimated tokens of assembled context bundles"
    );

    describe_counter!(
        format!("{}_context_truncated_total", METRICS_PREFIX),
        Unit::Count,
        "Context bundles that exceeded their token budget"
    );

    describe_counter!(
        format!("{}_context_component_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Context sub-builds that failed and contributed nothing"
    );

    // Cache metrics
    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache misses"
    );

    describe_counter!(
        format!("{}_cache_write_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Cache tier writes that failed"
    );

    describe_counter!(
        format!("{}_cache_swept_total", METRICS_PREFIX),
        Unit::Count,
        "Expired durable cache entries deleted by sweeps"
    );

    // Background worker metrics
    describe_counter!(
        format!("{}_worker_tasks_total", METRICS_PREFIX),
        Unit::Count,
        "Background tasks by final status"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record a finished context build
pub fn record_context_build(duration_secs: f64, outcome: &str, tokens: usize, truncated: bool) {
    counter!(
        format!("{}_context_builds_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_context_build_duration_seconds", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .record(duration_secs);

    histogram!(format!("{}_context_tokens", METRICS_PREFIX)).record(tokens as f64);

    if truncated {
        counter!(format!("{}_context_truncated_total", METRICS_PREFIX)).increment(1);
    }
}

/// Helper to record a failed context component
pub fn record_component_failure(component: &str) {
    counter!(
        format!("{}_context_component_failures_total", METRICS_PREFIX),
        "component" => component.to_string()
    )
    .increment(1);
}

/// Helper to record cache metrics
pub fn record_cache(hit: bool, cache_name: &str) {
    if hit {
        counter!(
            format!("{}_cache_hits_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_cache_misses_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    }
}

/// Helper to record a failed cache tier write
pub fn record_cache_write_failure(cache_name: &str) {
    counter!(
        format!("{}_cache_write_failures_total", METRICS_PREFIX),
        "cache" => cache_name.to_string()
    )
    .increment(1);
}

/// Helper to record sweep deletions
pub fn record_cache_sweep(deleted: u64) {
    counter!(format!("{}_cache_swept_total", METRICS_PREFIX)).increment(deleted);
}

/// Helper to record a background task outcome
pub fn record_worker_task(status: &str) {
    counter!(
        format!("{}_worker_tasks_total", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .increment(1);
}
