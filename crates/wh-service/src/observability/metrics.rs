//! Metrics definitions for the webhooks service.
//!
//! Everything is exported under the `wh_` prefix with Prometheus-style
//! suffixes (`_total` for counters, `_seconds` for duration histograms).
//!
//! # Cardinality
//!
//! Label sets stay small by construction: `endpoint` collapses unknown
//! paths to "/other", `kind` is bounded by the canonical event vocabulary,
//! and `reason`/`result`/`outcome` are fixed enumerations.

use crate::errors::WhError;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the process-wide Prometheus recorder and hand back the render
/// handle for the `/metrics` endpoint.
///
/// Call once, before anything records a metric.
///
/// # Errors
///
/// Returns `WhError::Internal` if a recorder is already installed or the
/// bucket configuration is rejected.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, WhError> {
    // The admin API sits behind a 30s timeout layer; the ladder spans
    // in-memory lookups up to that ceiling.
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("wh_http_request".to_string()),
            &[0.005, 0.025, 0.1, 0.25, 0.5, 1.0, 5.0, 10.0, 30.0],
        )
        .map_err(|e| WhError::Internal(format!("Invalid histogram buckets: {e}")))?
        .install_recorder()
        .map_err(|e| WhError::Internal(format!("Failed to install metrics recorder: {e}")))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record one admin API response.
///
/// Metrics: `wh_http_requests_total` (labels `method`, `endpoint`,
/// `status`) and `wh_http_request_duration_seconds` (labels `method`,
/// `endpoint`, `outcome`). Framework-level rejections (404, 405, layer
/// timeouts) land here too since the middleware wraps the whole router.
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    let endpoint = endpoint_label(path);

    counter!("wh_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => endpoint.clone(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!("wh_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => endpoint,
        "outcome" => status_outcome(status)
    )
    .record(duration.as_secs_f64());
}

/// Collapse status codes into success/timeout/error for the histogram.
fn status_outcome(status: u16) -> &'static str {
    match status {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// The API surface is a handful of static paths; anything else becomes
/// "/other" so scanners cannot mint new label values.
fn endpoint_label(path: &str) -> String {
    match path {
        "/health" | "/ready" | "/metrics" => path.to_string(),
        "/bigbluebutton/api/hooks/create"
        | "/bigbluebutton/api/hooks/destroy"
        | "/bigbluebutton/api/hooks/list"
        | "/bigbluebutton/api/hooks/ping" => path.to_string(),
        _ => "/other".to_string(),
    }
}

// ============================================================================
// Event Pipeline Metrics
// ============================================================================

/// Record an event that made it through normalization and fan-out.
///
/// Metric: `wh_events_processed_total`
/// Labels: `kind` (bounded by the canonical event vocabulary)
pub fn record_event_processed(kind: &str) {
    counter!("wh_events_processed_total", "kind" => kind.to_string()).increment(1);
}

/// Record an inbound message dropped before fan-out.
///
/// Metric: `wh_events_discarded_total`
/// Labels: `reason` ("unparseable", "unrecognized")
pub fn record_event_discarded(reason: &str) {
    counter!("wh_events_discarded_total", "reason" => reason.to_string()).increment(1);
}

// ============================================================================
// Callback Delivery Metrics
// ============================================================================

/// Record a single callback POST attempt.
///
/// Metric: `wh_callback_attempts_total`
/// Labels: `result` ("delivered", "failed")
pub fn record_callback_attempt(delivered: bool) {
    let result = if delivered { "delivered" } else { "failed" };
    counter!("wh_callback_attempts_total", "result" => result).increment(1);
}

/// Record the terminal outcome of a callback delivery.
///
/// Metric: `wh_callbacks_total`
/// Labels: `outcome` ("delivered", "stopped")
pub fn record_callback_outcome(outcome: &str) {
    counter!("wh_callbacks_total", "outcome" => outcome.to_string()).increment(1);
}

// ============================================================================
// Registry Gauges
// ============================================================================

/// Current number of registered hooks.
///
/// Metric: `wh_registered_hooks`
///
/// Set on startup resync and after every registration change.
pub fn set_registered_hooks(count: usize) {
    gauge!("wh_registered_hooks").set(count as f64);
}
