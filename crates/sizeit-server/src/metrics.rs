//! Metrics collection and export for size-it.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Metric names.
pub mod names {
    pub const SSE_CONNECTIONS_TOTAL: &str = "sizeit_sse_connections_total";
    pub const SSE_CONNECTIONS_ACTIVE: &str = "sizeit_sse_connections_active";
    pub const EVENTS_TOTAL: &str = "sizeit_events_total";
    pub const EVENTS_BYTES: &str = "sizeit_events_bytes";
    pub const ROOMS_ACTIVE: &str = "sizeit_rooms_active";
    pub const ERRORS_TOTAL: &str = "sizeit_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::SSE_CONNECTIONS_TOTAL,
        "Total number of event streams opened since server start"
    );
    metrics::describe_gauge!(
        names::SSE_CONNECTIONS_ACTIVE,
        "Current number of open event streams"
    );
    metrics::describe_counter!(names::EVENTS_TOTAL, "Total number of events streamed");
    metrics::describe_counter!(names::EVENTS_BYTES, "Total bytes of events streamed");
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of live rooms");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record an event written to a client.
pub fn record_event(kind: &'static str, bytes: usize) {
    counter!(names::EVENTS_TOTAL, "kind" => kind).increment(1);
    counter!(names::EVENTS_BYTES, "kind" => kind).increment(bytes as u64);
}

/// Update the live room count.
pub fn set_active_rooms(count: usize) {
    gauge!(names::ROOMS_ACTIVE).set(count as f64);
}

/// Mirror the engine's room count into the rooms gauge until shutdown or
/// until the engine goes away.
pub async fn track_active_rooms(mut rooms: watch::Receiver<usize>, shutdown: CancellationToken) {
    loop {
        set_active_rooms(*rooms.borrow_and_update());

        tokio::select! {
            () = shutdown.cancelled() => break,
            changed = rooms.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    debug!("Room gauge tracker stopped");
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records the end of an event stream on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a stream.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::SSE_CONNECTIONS_TOTAL).increment(1);
        gauge!(names::SSE_CONNECTIONS_ACTIVE).increment(1.0);
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
        gauge!(names::SSE_CONNECTIONS_ACTIVE).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_guard() {
        // No recorder installed: recording is a no-op.
        let _guard = ConnectionMetricsGuard::new();
        record_event("results", 42);
        record_error("storage");
        set_active_rooms(3);
    }

    #[tokio::test]
    async fn test_room_tracker_follows_until_shutdown() {
        let (tx, rx) = watch::channel(0);
        let shutdown = CancellationToken::new();
        let tracker = tokio::spawn(track_active_rooms(rx, shutdown.clone()));

        tx.send_replace(2);
        tokio::task::yield_now().await;
        // Still subscribed.
        assert_eq!(tx.receiver_count(), 1);

        shutdown.cancel();
        tracker.await.unwrap();
        assert_eq!(tx.receiver_count(), 0);
    }

    #[tokio::test]
    async fn test_room_tracker_stops_with_engine() {
        let (tx, rx) = watch::channel(1);
        let tracker = tokio::spawn(track_active_rooms(rx, CancellationToken::new()));

        drop(tx);
        tracker.await.unwrap();
    }
}
