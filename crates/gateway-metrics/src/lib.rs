//! Prometheus metrics for the API gateway
//!
//! Provides process-wide metrics for:
//! - Proxied requests and their latency
//! - Circuit breaker states
//! - Upstream in-flight calls and retries
//! - Rate limit rejections
//! - Instance health as seen by the active health checker

use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, GaugeVec, HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder, opts,
    register_gauge_vec, register_histogram_vec, register_int_counter_vec,
    register_int_gauge_vec,
};

/// Content type of the text exposition format
pub const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

// ============================================================================
// Request Metrics
// ============================================================================

/// Gateway requests total (by service and status code)
pub static GATEWAY_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "gateway_requests_total",
            "Total number of requests processed by gateway"
        ),
        &["service", "status_code"]
    )
    .expect("Failed to register GATEWAY_REQUESTS_TOTAL metric")
});

/// Gateway request duration in seconds (histogram)
pub static GATEWAY_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "gateway_request_duration_seconds",
        "Request duration in seconds",
        &["service"]
    )
    .expect("Failed to register GATEWAY_REQUEST_DURATION_SECONDS metric")
});

// ============================================================================
// Resilience Metrics
// ============================================================================

/// Circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)
pub static GATEWAY_CIRCUIT_BREAKER_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        opts!(
            "gateway_circuit_breaker_state",
            "Circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)"
        ),
        &["service"]
    )
    .expect("Failed to register GATEWAY_CIRCUIT_BREAKER_STATE metric")
});

/// Upstream calls currently in flight (by service)
pub static GATEWAY_UPSTREAM_IN_FLIGHT: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        opts!(
            "gateway_upstream_in_flight",
            "Upstream calls currently in flight"
        ),
        &["service"]
    )
    .expect("Failed to register GATEWAY_UPSTREAM_IN_FLIGHT metric")
});

/// Retry attempts beyond the first (by service)
pub static GATEWAY_UPSTREAM_RETRIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "gateway_upstream_retries_total",
            "Upstream attempts made after the first one"
        ),
        &["service"]
    )
    .expect("Failed to register GATEWAY_UPSTREAM_RETRIES_TOTAL metric")
});

// ============================================================================
// Rate Limiting & Health
// ============================================================================

/// Requests rejected by the rate limiter (by window type)
pub static GATEWAY_RATE_LIMITED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "gateway_rate_limited_total",
            "Requests rejected by the rate limiter"
        ),
        &["window"]
    )
    .expect("Failed to register GATEWAY_RATE_LIMITED_TOTAL metric")
});

/// Instance health status (1=healthy, 0=unhealthy)
pub static GATEWAY_SERVICE_HEALTH: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        opts!(
            "gateway_service_health",
            "Instance health status (1=healthy, 0=unhealthy)"
        ),
        &["service", "instance"]
    )
    .expect("Failed to register GATEWAY_SERVICE_HEALTH metric")
});

// ============================================================================
// Metrics Collection
// ============================================================================

/// Gather all registered metrics and encode as Prometheus text format
pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}
