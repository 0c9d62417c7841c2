//! Prometheus metrics for middleware decisions.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `keygate_api_key_decisions_total` - API key middleware outcomes (label: outcome)
//! - `keygate_ratelimit_decisions_total` - Rate limit middleware outcomes (label: outcome)
//!
//! ## Histograms
//! - `keygate_remote_call_duration_seconds` - Latency of key service calls (label: service)
//!
//! Recording functions are no-ops until [`init_metrics`] installs an exporter.

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const API_KEY_DECISIONS_TOTAL: &str = "keygate_api_key_decisions_total";
    pub const RATELIMIT_DECISIONS_TOTAL: &str = "keygate_ratelimit_decisions_total";
    pub const REMOTE_CALL_DURATION_SECONDS: &str = "keygate_remote_call_duration_seconds";
}

/// Initialize the Prometheus metrics exporter on `metrics_addr`.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::API_KEY_DECISIONS_TOTAL,
        "Decisions taken by the API key middleware"
    );
    describe_counter!(
        names::RATELIMIT_DECISIONS_TOTAL,
        "Decisions taken by the rate limit middleware"
    );
    describe_histogram!(
        names::REMOTE_CALL_DURATION_SECONDS,
        "Duration of calls to the key service in seconds"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

/// Record an API key middleware outcome.
pub fn record_api_key_decision(outcome: &'static str) {
    counter!(names::API_KEY_DECISIONS_TOTAL, "outcome" => outcome).increment(1);
}

/// Record a rate limit middleware outcome.
pub fn record_ratelimit_decision(outcome: &'static str) {
    counter!(names::RATELIMIT_DECISIONS_TOTAL, "outcome" => outcome).increment(1);
}

/// Record how long a key service call took.
pub fn record_remote_call_duration(service: &'static str, duration_secs: f64) {
    histogram!(names::REMOTE_CALL_DURATION_SECONDS, "service" => service).record(duration_secs);
}
