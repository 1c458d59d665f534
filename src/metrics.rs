// =============================================================================
// METRICS MODULE
// =============================================================================
// Prometheus metrics for the flow service.
//
// Counters for HTTP traffic, flow transitions and committed operations,
// histograms for request and backend latency, one gauge for live sessions.
// The macros are no-ops until `setup_metrics` installs the recorder, so the
// flow controller can record unconditionally (tests included).
// =============================================================================

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// METRIC NAMES
// =============================================================================

/// Labels: method, endpoint, status
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";

/// Labels: method, endpoint
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

/// Labels: endpoint (lookup/plan-inbound/...), outcome (ok/rejected/error)
pub const WAREHOUSE_API_DURATION_SECONDS: &str = "warehouse_api_request_duration_seconds";

/// Labels: direction, from, to
pub const FLOW_TRANSITIONS_TOTAL: &str = "flow_transitions_total";

/// Committed operations. Labels: direction, fifo_override
pub const FLOW_OPERATIONS_TOTAL: &str = "flow_operations_total";

/// Outbound commits that skipped the FIFO check
pub const FIFO_OVERRIDES_TOTAL: &str = "flow_fifo_overrides_total";

pub const FLOW_ACTIVE_SESSIONS: &str = "flow_active_sessions";

/// Labels: operation (get/set/invalidate), result (hit/miss/ok/error)
pub const ITEM_CACHE_OPERATIONS_TOTAL: &str = "item_cache_operations_total";

// =============================================================================
// SETUP
// =============================================================================
/// Installs the Prometheus recorder globally and returns the render handle.
pub fn setup_metrics() -> Result<PrometheusHandle> {
    // 1ms .. 10s
    let latency_buckets = &[
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(HTTP_REQUEST_DURATION_SECONDS.to_string()),
            latency_buckets,
        )?
        .set_buckets_for_metric(
            Matcher::Full(WAREHOUSE_API_DURATION_SECONDS.to_string()),
            latency_buckets,
        )?
        .install_recorder()?;

    describe_counter!(HTTP_REQUESTS_TOTAL, "Total number of HTTP requests received");
    describe_histogram!(HTTP_REQUEST_DURATION_SECONDS, "HTTP request latency in seconds");
    describe_histogram!(
        WAREHOUSE_API_DURATION_SECONDS,
        "Latency of calls to the warehouse backend in seconds"
    );
    describe_counter!(FLOW_TRANSITIONS_TOTAL, "Flow step transitions");
    describe_counter!(FLOW_OPERATIONS_TOTAL, "Inbound and outbound operations committed");
    describe_counter!(FIFO_OVERRIDES_TOTAL, "Outbound operations committed with the FIFO check skipped");
    describe_gauge!(FLOW_ACTIVE_SESSIONS, "Flow sessions currently held in memory");
    describe_counter!(ITEM_CACHE_OPERATIONS_TOTAL, "Item lookup cache operations");

    Ok(handle)
}

// =============================================================================
// HELPERS
// =============================================================================

pub fn record_http_request(method: &str, endpoint: &str, status: u16, duration_secs: f64) {
    counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string()
    )
    .record(duration_secs);
}

/// Record one warehouse backend call
///
/// # Arguments
/// * `endpoint` - Logical call name (lookup, plan-inbound, ...)
/// * `outcome` - ok, rejected (non-2xx) or error (transport/decode)
pub fn record_api_call(endpoint: &str, outcome: &str, duration_secs: f64) {
    histogram!(
        WAREHOUSE_API_DURATION_SECONDS,
        "endpoint" => endpoint.to_string(),
        "outcome" => outcome.to_string()
    )
    .record(duration_secs);
}

pub fn record_flow_transition(direction: &str, from: &str, to: &str) {
    counter!(
        FLOW_TRANSITIONS_TOTAL,
        "direction" => direction.to_string(),
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

pub fn record_operation(direction: &str, fifo_override: bool) {
    counter!(
        FLOW_OPERATIONS_TOTAL,
        "direction" => direction.to_string(),
        "fifo_override" => fifo_override.to_string()
    )
    .increment(1);
}

pub fn record_fifo_override() {
    counter!(FIFO_OVERRIDES_TOTAL).increment(1);
}

pub fn set_active_sessions(count: usize) {
    gauge!(FLOW_ACTIVE_SESSIONS).set(count as f64);
}

pub fn record_cache_operation(operation: &str, result: &str) {
    counter!(
        ITEM_CACHE_OPERATIONS_TOTAL,
        "operation" => operation.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}
