//! Metrics collection and export for Ripple.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "ripple_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "ripple_connections_active";
    pub const MESSAGES_PERSISTED: &str = "ripple_messages_persisted_total";
    pub const DUPLICATES_IGNORED: &str = "ripple_duplicates_ignored_total";
    pub const MESSAGES_REPLAYED: &str = "ripple_messages_replayed_total";
    pub const MESSAGES_DELIVERED: &str = "ripple_messages_delivered_total";
    pub const ERRORS_TOTAL: &str = "ripple_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(
        names::MESSAGES_PERSISTED,
        "Total number of messages accepted into the log"
    );
    metrics::describe_counter!(
        names::DUPLICATES_IGNORED,
        "Total number of retried publishes ignored as duplicates"
    );
    metrics::describe_counter!(
        names::MESSAGES_REPLAYED,
        "Total number of messages replayed during recovery"
    );
    metrics::describe_counter!(
        names::MESSAGES_DELIVERED,
        "Total number of per-connection broadcast deliveries"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record an accepted (newly persisted) message.
pub fn record_persisted() {
    counter!(names::MESSAGES_PERSISTED).increment(1);
}

/// Record a duplicate publish that was ignored.
pub fn record_duplicate() {
    counter!(names::DUPLICATES_IGNORED).increment(1);
}

/// Record messages replayed to a recovering connection.
pub fn record_replayed(count: u64) {
    counter!(names::MESSAGES_REPLAYED).increment(count);
}

/// Record per-connection broadcast deliveries.
pub fn record_delivered(count: usize) {
    counter!(names::MESSAGES_DELIVERED).increment(count as u64);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_guard() {
        // Just test that it doesn't panic
        let _guard = ConnectionMetricsGuard::new();
    }
}
