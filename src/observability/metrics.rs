//! Metrics collection and exposition.
//!
//! # Metrics
//! - `transport_connections_total` (counter): connections opened, by side
//! - `transport_active_connections` (gauge): connections currently registered
//! - `transport_connect_failures_total` (counter): failed connect calls, by kind
//! - `transport_groups` (gauge): live endpoint groups
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - The Prometheus exporter is optional and serves its own scrape endpoint

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter, serving scrapes on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connection(side: &'static str) {
    ::metrics::counter!("transport_connections_total", "side" => side).increment(1);
}

pub fn record_registered() {
    ::metrics::gauge!("transport_active_connections").increment(1.0);
}

pub fn record_unregistered() {
    ::metrics::gauge!("transport_active_connections").decrement(1.0);
}

pub fn record_connect_failure(kind: &'static str) {
    ::metrics::counter!("transport_connect_failures_total", "kind" => kind).increment(1);
}

pub fn set_groups(count: usize) {
    ::metrics::gauge!("transport_groups").set(count as f64);
}
