//! Metrics definitions for the Call Controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `cc_` prefix for Call Controller
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `method`: 7 values max (GET, POST, PATCH, DELETE, PUT, HEAD, OPTIONS)
//! - `endpoint`: ~10 values (parameterized paths)
//! - `status`: 3 values (success, error, timeout)
//! - `operation`: bounded by code (find_session, transition_session, etc.)
//! - `event`: bounded by the signaling event enums
//! - `error_type`: bounded by `CcError` variants
//!
//! Room tokens, session ids and user ids are never used as labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

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
        // HTTP request buckets aligned with 200ms p95 target
        .set_buckets_for_metric(
            Matcher::Prefix("cc_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // DB query buckets aligned with 50ms p99 target
        .set_buckets_for_metric(
            Matcher::Prefix("cc_db_query".to_string()),
            &[
                0.001, 0.002, 0.005, 0.010, 0.020, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set DB query buckets: {e}"))?
        // Signaling handling is dominated by the registry lookup on join
        .set_buckets_for_metric(
            Matcher::Prefix("cc_signaling_event".to_string()),
            &[0.001, 0.002, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500],
        )
        .map_err(|e| format!("Failed to set signaling buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `cc_http_requests_total`, `cc_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
///
/// This captures ALL HTTP responses including framework-level errors
/// (415, 405, JSON rejections) since it runs as the outermost layer.
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("cc_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.clone(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("cc_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Categorize HTTP status code into success/error/timeout
fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Normalize endpoint path to prevent label cardinality explosion
///
/// Replaces session ids with placeholders.
fn normalize_endpoint(path: &str) -> String {
    match path {
        "/" => "/".to_string(),
        "/health" => "/health".to_string(),
        "/ready" => "/ready".to_string(),
        "/metrics" => "/metrics".to_string(),
        "/ws" => "/ws".to_string(),
        "/api/v1/sessions" => "/api/v1/sessions".to_string(),
        _ => normalize_dynamic_endpoint(path),
    }
}

/// Normalize paths with dynamic segments
fn normalize_dynamic_endpoint(path: &str) -> String {
    if path.starts_with("/api/v1/sessions/") {
        let parts: Vec<&str> = path.split('/').collect();

        // /api/v1/sessions/{id} → parts.len() == 5
        if parts.len() == 5 {
            return "/api/v1/sessions/{id}".to_string();
        }

        // /api/v1/sessions/{id}/{action} → parts.len() == 6
        if parts.len() == 6 {
            if let Some(action) = parts.get(5) {
                if matches!(*action, "room" | "cancel" | "complete") {
                    return format!("/api/v1/sessions/{{id}}/{action}");
                }
            }
        }
    }

    // Unknown paths normalized to "/other" to bound cardinality
    "/other".to_string()
}

// ============================================================================
// Database Metrics
// ============================================================================

/// Record database query
///
/// Metric: `cc_db_query_duration_seconds`, `cc_db_queries_total`
/// Labels: `operation`, `status`
///
/// Operations: create_session, find_session, find_by_room_token,
///             assign_room_token, transition_session, list_sessions, lookup_user
pub fn record_db_query(operation: &str, status: &str, duration: Duration) {
    histogram!("cc_db_query_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("cc_db_queries_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Signaling Metrics
// ============================================================================

/// Record one handled inbound signaling event.
///
/// Metric: `cc_signaling_events_total`, `cc_signaling_event_duration_seconds`
/// Labels: `event`, `status`
pub fn record_signaling_event(event: &str, status: &str, duration: Duration) {
    histogram!("cc_signaling_event_duration_seconds",
        "event" => event.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("cc_signaling_events_total",
        "event" => event.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a signaling error sent back to a client.
///
/// Metric: `cc_signaling_errors_total`
/// Labels: `event`, `error_type`
pub fn record_signaling_error(event: &str, error_type: &str) {
    counter!("cc_signaling_errors_total",
        "event" => event.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Record a lifecycle synchronization outcome.
///
/// Metric: `cc_call_completions_total`
/// Labels: `outcome` (completed, already_terminal, unknown_room, error)
pub fn record_call_completion(outcome: &str) {
    counter!("cc_call_completions_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record error by category.
///
/// Metric: `cc_errors_total`
/// Labels: `operation`, `error_type`, `status_code`
pub fn record_error(operation: &str, error_type: &str, status_code: u16) {
    counter!("cc_errors_total",
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string(),
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

// ============================================================================
// Gauges
// ============================================================================

/// Set the number of live room actors.
///
/// Metric: `cc_rooms_active`
pub fn set_rooms_active(count: usize) {
    gauge!("cc_rooms_active").set(count as f64);
}

/// Set the number of open signaling connections.
///
/// Metric: `cc_connections_active`
pub fn set_connections_active(count: usize) {
    gauge!("cc_connections_active").set(count as f64);
}

// ============================================================================
// Tests
// ============================================================================
