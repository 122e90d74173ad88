//! Metrics collection and export for the Chorus server.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format. Core metrics are described here too so a single
//! exporter serves both.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "chorus_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "chorus_connections_active";
    pub const CONNECTIONS_CLOSED: &str = "chorus_connections_closed_total";
    pub const SUBMISSIONS_TOTAL: &str = "chorus_http_submissions_total";
    pub const POLLS_TOTAL: &str = "chorus_polls_total";
    pub const SUBMIT_LATENCY_SECONDS: &str = "chorus_submit_latency_seconds";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    chorus_core::metrics::describe();

    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of push connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of push connections"
    );
    metrics::describe_counter!(names::CONNECTIONS_CLOSED, "Push connections closed, by reason");
    metrics::describe_counter!(names::SUBMISSIONS_TOTAL, "HTTP submissions, by outcome");
    metrics::describe_counter!(names::POLLS_TOTAL, "Pull requests, by outcome");
    metrics::describe_histogram!(
        names::SUBMIT_LATENCY_SECONDS,
        "Time from HTTP submission to persisted and broadcast"
    );

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

/// Record a closed push connection.
pub fn record_close(reason: &'static str) {
    counter!(names::CONNECTIONS_CLOSED, "reason" => reason).increment(1);
}

/// Record an HTTP submission and how long it took.
pub fn record_submission(outcome: &'static str, seconds: f64) {
    counter!(names::SUBMISSIONS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::SUBMIT_LATENCY_SECONDS).record(seconds);
}

/// Record a finished pull request.
pub fn record_poll(outcome: &'static str) {
    counter!(names::POLLS_TOTAL, "outcome" => outcome).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::CONNECTIONS_TOTAL).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
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
        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
    }
}
