//! Metrics collection and exposition.
//!
//! # Metrics
//! - `wing_reloads_total` (counter): transitions by outcome (applied, rolled_back, fatal, dry)
//! - `wing_reload_duration_seconds` (histogram): dequeue to completion callback
//! - `wing_assembled_groups` / `wing_assembled_nodes` (gauge): size of the last assembly
//! - `wing_reload_queue_deferred` (gauge): requests parked while a reload is in flight

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record the outcome of one reload request.
pub fn record_reload(outcome: &'static str, start: Instant) {
    counter!("wing_reloads_total", "outcome" => outcome).increment(1);
    histogram!("wing_reload_duration_seconds").record(start.elapsed().as_secs_f64());
}

/// Record the size of an assembled configuration.
pub fn record_assembly(groups: usize, nodes: usize) {
    gauge!("wing_assembled_groups").set(groups as f64);
    gauge!("wing_assembled_nodes").set(nodes as f64);
}

pub fn record_deferred(count: usize) {
    gauge!("wing_reload_queue_deferred").set(count as f64);
}
