//! Metrics collection and exposition.
//!
//! # Metrics
//! - `forwarder_requests_total` (counter): forwarded requests by method, status
//! - `forwarder_request_duration_seconds` (histogram): time to response head
//! - `forwarder_failures_total` (counter): failed forwards by error kind
//! - `forwarder_pool_leased` / `forwarder_pool_idle` (gauges): pool occupancy
//!
//! Recording is a no-op until [`init_metrics`] installs a recorder.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::pool::PoolStats;

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint started"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_forward(method: &str, status: u16, started: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
    ];
    ::metrics::counter!("forwarder_requests_total", &labels).increment(1);
    ::metrics::histogram!("forwarder_request_duration_seconds", &labels)
        .record(started.elapsed().as_secs_f64());
}

pub fn record_failure(kind: &'static str) {
    ::metrics::counter!("forwarder_failures_total", "kind" => kind).increment(1);
}

pub fn record_pool(stats: &PoolStats) {
    ::metrics::gauge!("forwarder_pool_leased").set(stats.leased as f64);
    ::metrics::gauge!("forwarder_pool_idle").set(stats.idle as f64);
}
