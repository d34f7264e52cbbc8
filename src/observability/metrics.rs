//! Metrics collection and exposition.
//!
//! # Metrics
//! - `instrumentation_events_total` (counter): published events by name, outcome
//! - `instrumentation_listener_failures_total` (counter): failed deliveries by event
//! - `instrumentation_filter_failures_total` (counter): failed transforms by event
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - Exporter listens on its own address, outside the instrumented router

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_event_published(name: &str, failed: bool) {
    let outcome = if failed { "failure" } else { "success" };
    ::metrics::counter!(
        "instrumentation_events_total",
        "event" => name.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_listener_failure(name: &str) {
    ::metrics::counter!("instrumentation_listener_failures_total", "event" => name.to_string())
        .increment(1);
}

pub fn record_filter_failure(name: &str) {
    ::metrics::counter!("instrumentation_filter_failures_total", "event" => name.to_string())
        .increment(1);
}
