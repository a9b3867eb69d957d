//! Hub metrics.
//!
//! Counters are kept in two places: process-local atomics for cheap
//! snapshots (status endpoint, tests) and the `metrics` facade for the
//! Prometheus exporter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use metrics::{counter, gauge};

/// Hub-wide counters shared by the registry and room actors.
#[derive(Debug, Default)]
pub struct HubMetrics {
    rooms: AtomicU64,
    connections: AtomicU64,
    frames_processed: AtomicU64,
    delivery_failures: AtomicU64,
}

/// Point-in-time metrics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub rooms: u64,
    pub connections: u64,
    pub frames_processed: u64,
    pub delivery_failures: u64,
}

impl HubMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn room_created(&self) {
        let now = self.rooms.fetch_add(1, Ordering::Relaxed) + 1;
        counter!("hub_rooms_created_total").increment(1);
        gauge!("hub_rooms_active").set(now as f64);
    }

    pub fn room_removed(&self) {
        let now = saturating_decrement(&self.rooms);
        counter!("hub_rooms_removed_total").increment(1);
        gauge!("hub_rooms_active").set(now as f64);
    }

    pub fn connection_created(&self) {
        let now = self.connections.fetch_add(1, Ordering::Relaxed) + 1;
        counter!("hub_connections_created_total").increment(1);
        gauge!("hub_connections_active").set(now as f64);
    }

    pub fn connection_closed(&self) {
        let now = saturating_decrement(&self.connections);
        counter!("hub_connections_closed_total").increment(1);
        gauge!("hub_connections_active").set(now as f64);
    }

    pub fn record_frame(&self, frame_type: &'static str) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
        counter!("hub_frames_processed_total", "frame_type" => frame_type).increment(1);
    }

    /// A payload could not be handed to a connection (queue full or
    /// serialization failure). The payload is dropped, not retried.
    pub fn record_delivery_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
        counter!("hub_delivery_failures_total").increment(1);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rooms: self.rooms.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }
}

/// Decrement an active-count gauge without wrapping past zero.
fn saturating_decrement(counter: &AtomicU64) -> u64 {
    let mut current = counter.load(Ordering::Relaxed);
    loop {
        let next = current.saturating_sub(1);
        match counter.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(observed) => current = observed,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_track_lifecycle() {
        let metrics = HubMetrics::new();

        metrics.room_created();
        metrics.connection_created();
        metrics.connection_created();
        metrics.record_frame("chat");
        metrics.connection_closed();

        let snap = metrics.snapshot();
        assert_eq!(snap.rooms, 1);
        assert_eq!(snap.connections, 1);
        assert_eq!(snap.frames_processed, 1);
        assert_eq!(snap.delivery_failures, 0);
    }

    #[test]
    fn test_gauges_never_underflow() {
        let metrics = HubMetrics::new();
        metrics.room_created();
        metrics.room_removed();
        // A second removal for the same room would be a bug upstream, but
        // the counter must not wrap.
        metrics.room_removed();
        assert_eq!(metrics.snapshot().rooms, 0);
    }
}
