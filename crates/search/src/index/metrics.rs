//! Operational metrics of an [`Index`](crate::Index).
//!
//! Lock-free counters, read through [`IndexMetrics::snapshot`]. The snapshot
//! serializes to JSON for health and status endpoints of the embedding
//! application.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Counters maintained by an index.
#[derive(Debug, Default)]
pub struct IndexMetrics {
    blocks: AtomicU64,
    delays: AtomicU64,
    optimistic_lock_errors: AtomicU64,
    queries: AtomicU64,
    query_micros: AtomicU64,
    pending: AtomicU64,
}

/// Point-in-time view of [`IndexMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Callers blocked because the delay-line was full.
    pub blocks: u64,
    /// Actions queued on the delay-line.
    pub delays: u64,
    /// Writes or deletes rejected by a version check.
    pub optimistic_lock_errors: u64,
    /// Executed queries.
    pub queries: u64,
    /// Average query duration in milliseconds.
    pub avg_query_duration_ms: f64,
    /// Actions waiting on the delay-line when last observed.
    pub delay_line_pending: u64,
}

impl IndexMetrics {
    /// Creates zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_block(&self) {
        self.blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delay(&self) {
        self.delays.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pending(&self, pending: usize) {
        self.pending.store(pending as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_optimistic_lock(&self, entity_type: &str) {
        let total = self.optimistic_lock_errors.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(entity_type = %entity_type, total, "Optimistic lock failure recorded");
    }

    pub(crate) fn record_query(&self, duration: Duration) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.query_micros
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Returns the current values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let queries = self.queries.load(Ordering::Relaxed);
        let micros = self.query_micros.load(Ordering::Relaxed);
        MetricsSnapshot {
            blocks: self.blocks.load(Ordering::Relaxed),
            delays: self.delays.load(Ordering::Relaxed),
            optimistic_lock_errors: self.optimistic_lock_errors.load(Ordering::Relaxed),
            queries,
            avg_query_duration_ms: if queries == 0 {
                0.0
            } else {
                micros as f64 / queries as f64 / 1000.0
            },
            delay_line_pending: self.pending.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_query_duration() {
        let metrics = IndexMetrics::new();
        assert_eq!(metrics.snapshot().avg_query_duration_ms, 0.0);

        metrics.record_query(Duration::from_millis(10));
        metrics.record_query(Duration::from_millis(30));
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.queries, 2);
        assert!((snapshot.avg_query_duration_ms - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_counters() {
        let metrics = IndexMetrics::new();
        metrics.record_block();
        metrics.record_delay();
        metrics.record_delay();
        metrics.record_optimistic_lock("Order");
        metrics.record_pending(4);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.blocks, 1);
        assert_eq!(snapshot.delays, 2);
        assert_eq!(snapshot.optimistic_lock_errors, 1);
        assert_eq!(snapshot.delay_line_pending, 4);

        let json = serde_json::to_value(snapshot).unwrap();
        assert_eq!(json["delays"], 2);
    }
}
