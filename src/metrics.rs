//! Prometheus metrics helpers.
//!
//! Thin wrappers over the `metrics` crate so handlers record one line per
//! event. The recorder is installed once per process; repeated router
//! construction (tests build many routers) reuses the same handle.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

static RECORDER: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus recorder (once) and return its handle.
pub fn recorder_handle() -> PrometheusHandle {
    RECORDER
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("Failed to install Prometheus recorder");
            describe_counter!(
                "cachemark_requests_total",
                "Requests served, by endpoint and status"
            );
            describe_histogram!(
                "cachemark_request_duration_seconds",
                "Request latency, by endpoint"
            );
            describe_counter!(
                "cachemark_cache_lookups_total",
                "Cache lookups, by endpoint and result"
            );
            handle
        })
        .clone()
}

/// Count one served request.
pub fn record_request(endpoint: &'static str, status: u16) {
    counter!(
        "cachemark_requests_total",
        "endpoint" => endpoint,
        "status" => status.to_string(),
    )
    .increment(1);
}

/// Record the latency of a request started at `start`.
pub fn record_duration(endpoint: &'static str, start: Instant) {
    histogram!(
        "cachemark_request_duration_seconds",
        "endpoint" => endpoint,
    )
    .record(start.elapsed().as_secs_f64());
}

/// Count one cache lookup outcome.
pub fn record_cache_lookup(endpoint: &'static str, hit: bool) {
    counter!(
        "cachemark_cache_lookups_total",
        "endpoint" => endpoint,
        "result" => if hit { "hit" } else { "miss" },
    )
    .increment(1);
}
