//! Metrics collection and exposition.
//!
//! # Metrics
//! - `terminator_tracked_connections` (gauge): registry set size, by kind
//! - `terminator_connections_destroyed_total` (counter): destroyed connections, by kind and phase
//! - `terminator_shutdowns_total` (counter): finished terminations, by outcome
//! - `terminator_shutdown_duration_seconds` (histogram): time spent in a termination

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::net::connection::ConnectionKind;

/// Which pass of the shutdown protocol destroyed a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyPhase {
    Cooperative,
    Forced,
}

impl DestroyPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestroyPhase::Cooperative => "cooperative",
            DestroyPhase::Forced => "forced",
        }
    }
}

/// Install the Prometheus exporter with an HTTP listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn set_tracked_connections(kind: ConnectionKind, count: usize) {
    metrics::gauge!("terminator_tracked_connections", "kind" => kind.as_str()).set(count as f64);
}

pub fn record_destroyed(kind: ConnectionKind, phase: DestroyPhase) {
    metrics::counter!(
        "terminator_connections_destroyed_total",
        "kind" => kind.as_str(),
        "phase" => phase.as_str()
    )
    .increment(1);
}

pub fn record_shutdown(outcome: &'static str, started: Instant) {
    metrics::counter!("terminator_shutdowns_total", "outcome" => outcome).increment(1);
    metrics::histogram!("terminator_shutdown_duration_seconds", "outcome" => outcome)
        .record(started.elapsed().as_secs_f64());
}
