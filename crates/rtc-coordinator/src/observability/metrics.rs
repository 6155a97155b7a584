//! Prometheus metrics for the coordinator.
//!
//! All metrics follow Prometheus naming conventions:
//! - `rtc_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `event`: inbound event names (~14 values)
//! - `status`: `success` / `error`
//! - `error_type`: [`CoordinatorError::error_type_label`](crate::errors::CoordinatorError::error_type_label) (~10 values)
//! - `operation`: media engine / store operations (~10 values each)
//! - `actor_type`: registry, room, connection

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000,
];

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("rtc_request".to_string()),
            LATENCY_BUCKETS,
        )
        .map_err(|e| format!("Failed to set request latency buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("rtc_media_engine".to_string()),
            LATENCY_BUCKETS,
        )
        .map_err(|e| format!("Failed to set media engine latency buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("rtc_store".to_string()),
            LATENCY_BUCKETS,
        )
        .map_err(|e| format!("Failed to set store latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Room & Peer Metrics (Gauges)
// ============================================================================

/// Set the number of live rooms.
///
/// Metric: `rtc_rooms_active`
pub fn set_rooms_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rtc_rooms_active").set(count as f64);
}

/// Set the number of joined peers across all rooms.
///
/// Metric: `rtc_peers_active`
pub fn set_peers_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rtc_peers_active").set(count as f64);
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `rtc_actor_mailbox_depth`
/// Labels: `actor_type`
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rtc_actor_mailbox_depth", "actor_type" => actor_type.to_string()).set(depth as f64);
}

// ============================================================================
// Request Metrics
// ============================================================================

/// Record a handled inbound event.
///
/// Metrics: `rtc_request_latency_seconds`, `rtc_requests_total`, and on failure
/// `rtc_errors_total`.
pub fn record_request(event: &'static str, error_type: Option<&'static str>, duration: Duration) {
    let status = if error_type.is_some() {
        "error"
    } else {
        "success"
    };

    histogram!("rtc_request_latency_seconds", "event" => event).record(duration.as_secs_f64());
    counter!("rtc_requests_total", "event" => event, "status" => status).increment(1);

    if let Some(error_type) = error_type {
        counter!("rtc_errors_total", "event" => event, "error_type" => error_type).increment(1);
    }
}

/// Record an outbound event dropped because a connection's queue was full or closed.
///
/// Metric: `rtc_broadcast_dropped_total`
pub fn record_broadcast_dropped() {
    counter!("rtc_broadcast_dropped_total").increment(1);
}

// ============================================================================
// Collaborator Latency
// ============================================================================

/// Record the latency of a media engine call.
///
/// Metric: `rtc_media_engine_latency_seconds`
/// Labels: `operation`
pub fn record_media_latency(operation: &'static str, duration: Duration) {
    histogram!("rtc_media_engine_latency_seconds", "operation" => operation)
        .record(duration.as_secs_f64());
}

/// Record the latency of a document store call.
///
/// Metric: `rtc_store_latency_seconds`
/// Labels: `operation`
pub fn record_store_latency(operation: &'static str, duration: Duration) {
    histogram!("rtc_store_latency_seconds", "operation" => operation)
        .record(duration.as_secs_f64());
}

// ============================================================================
// Failures
// ============================================================================

/// Record an actor task panic.
///
/// Metric: `rtc_actor_panics_total`
/// Labels: `actor_type`
pub fn record_actor_panic(actor_type: &str) {
    counter!("rtc_actor_panics_total", "actor_type" => actor_type.to_string()).increment(1);
}

/// Record a media worker death.
///
/// Metric: `rtc_media_worker_deaths_total`
pub fn record_media_worker_death() {
    counter!("rtc_media_worker_deaths_total").increment(1);
}
