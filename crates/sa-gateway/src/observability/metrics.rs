//! Metrics definitions for the service-account gateway.
//!
//! All metrics follow Prometheus naming conventions:
//! - `sa_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `outcome`: `authenticated` or one of the seven rejection reason codes
//! - `status`: `success` / `error`
//! - `endpoint`: the four served routes plus `/other`
//! - `method`: HTTP method

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the global Prometheus recorder.
///
/// Can only succeed once per process.
///
/// # Errors
///
/// Returns a message if bucket configuration fails or a recorder is already
/// installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Verification is local except for key refreshes
        .set_buckets_for_metric(
            Matcher::Prefix("sa_auth_duration".to_string()),
            &[
                0.0005, 0.001, 0.002, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set auth duration buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("sa_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// Authentication Metrics
// ============================================================================

/// Record one pass through the authentication gateway.
///
/// Metric: `sa_auth_requests_total`, `sa_auth_duration_seconds`
/// Labels: `outcome`
pub fn record_auth_outcome(outcome: &'static str, duration: Duration) {
    histogram!("sa_auth_duration_seconds",
        "outcome" => outcome
    )
    .record(duration.as_secs_f64());

    counter!("sa_auth_requests_total",
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a signing-key set refresh attempt.
///
/// Metric: `sa_jwks_refresh_total`
/// Labels: `status`
pub fn record_jwks_refresh(status: &'static str) {
    counter!("sa_jwks_refresh_total",
        "status" => status
    )
    .increment(1);
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `sa_http_requests_total`, `sa_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status_code`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);

    histogram!("sa_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint
    )
    .record(duration.as_secs_f64());

    counter!("sa_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Unknown paths collapse to `/other`.
fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/health" => "/health",
        "/ready" => "/ready",
        "/metrics" => "/metrics",
        "/api/v1/me" => "/api/v1/me",
        _ => "/other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Without an installed recorder these calls are no-ops; they must not panic.

    #[test]
    fn test_record_auth_outcome() {
        record_auth_outcome("authenticated", Duration::from_micros(400));
        record_auth_outcome("invalid-token", Duration::from_millis(2));
        record_auth_outcome("service-unavailable", Duration::ZERO);
    }

    #[test]
    fn test_record_jwks_refresh() {
        record_jwks_refresh("success");
        record_jwks_refresh("error");
    }

    #[test]
    fn test_record_http_request() {
        record_http_request("GET", "/health", 200, Duration::from_millis(1));
        record_http_request("GET", "/api/v1/me", 401, Duration::from_millis(3));
    }

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(normalize_endpoint("/health"), "/health");
        assert_eq!(normalize_endpoint("/ready"), "/ready");
        assert_eq!(normalize_endpoint("/metrics"), "/metrics");
        assert_eq!(normalize_endpoint("/api/v1/me"), "/api/v1/me");
        assert_eq!(normalize_endpoint("/api/v1/me/extra"), "/other");
        assert_eq!(normalize_endpoint("/admin"), "/other");
    }
}
