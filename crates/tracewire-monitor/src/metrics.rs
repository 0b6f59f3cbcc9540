//! Delivery counters.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-tracer counters. Every dropped event increments exactly one of them.
#[derive(Debug, Default)]
pub struct DeliveryMetrics {
    enqueued: AtomicU64,
    dropped_full: AtomicU64,
    dropped_closed: AtomicU64,
    batches_shipped: AtomicU64,
    events_shipped: AtomicU64,
    batches_failed: AtomicU64,
    events_failed: AtomicU64,
    unknown_ends: AtomicU64,
    duplicate_ends: AtomicU64,
    parent_fallbacks: AtomicU64,
}

/// Point-in-time copy of [`DeliveryMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub enqueued: u64,
    pub dropped_full: u64,
    pub dropped_closed: u64,
    pub batches_shipped: u64,
    pub events_shipped: u64,
    pub batches_failed: u64,
    pub events_failed: u64,
    pub unknown_ends: u64,
    pub duplicate_ends: u64,
    pub parent_fallbacks: u64,
}

impl MetricsSnapshot {
    /// Events accepted by the queue that have not been shipped or failed yet.
    pub fn pending(&self) -> u64 {
        self.enqueued
            .saturating_sub(self.events_shipped)
            .saturating_sub(self.events_failed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped_full + self.dropped_closed
    }
}

impl DeliveryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        MetricsSnapshot {
            enqueued: load(&self.enqueued),
            dropped_full: load(&self.dropped_full),
            dropped_closed: load(&self.dropped_closed),
            batches_shipped: load(&self.batches_shipped),
            events_shipped: load(&self.events_shipped),
            batches_failed: load(&self.batches_failed),
            events_failed: load(&self.events_failed),
            unknown_ends: load(&self.unknown_ends),
            duplicate_ends: load(&self.duplicate_ends),
            parent_fallbacks: load(&self.parent_fallbacks),
        }
    }

    pub(crate) fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped_full(&self) {
        self.dropped_full.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped_closed(&self) {
        self.dropped_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_shipped(&self, events: usize) {
        self.batches_shipped.fetch_add(1, Ordering::Relaxed);
        self.events_shipped.fetch_add(events as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self, events: usize) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
        self.events_failed.fetch_add(events as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_unknown_end(&self) {
        self.unknown_ends.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_duplicate_end(&self) {
        self.duplicate_ends.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_parent_fallback(&self) {
        self.parent_fallbacks.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_accounts_for_shipped_and_failed() {
        let metrics = DeliveryMetrics::new();
        for _ in 0..10 {
            metrics.record_enqueued();
        }
        metrics.record_shipped(6);
        metrics.record_failed(3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.pending(), 1);
        assert_eq!(snapshot.batches_shipped, 1);
        assert_eq!(snapshot.batches_failed, 1);
    }

    #[test]
    fn test_dropped_sums_both_causes() {
        let metrics = DeliveryMetrics::new();
        metrics.record_dropped_full();
        metrics.record_dropped_closed();
        metrics.record_dropped_full();
        assert_eq!(metrics.snapshot().dropped(), 3);
    }
}
