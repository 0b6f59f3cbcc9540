//! Bounded, non-blocking delivery queue.

use crate::metrics::DeliveryMetrics;
use crate::trace::IngestionEvent;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Producer side of the delivery queue. Never blocks: a full or closed queue
/// drops the new event and counts it.
#[derive(Debug, Clone)]
pub struct DeliveryQueue {
    tx: mpsc::Sender<IngestionEvent>,
    metrics: Arc<DeliveryMetrics>,
}

impl DeliveryQueue {
    /// Creates the queue and the receiver the shipper consumes.
    pub fn bounded(
        capacity: usize,
        metrics: Arc<DeliveryMetrics>,
    ) -> (Self, mpsc::Receiver<IngestionEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, metrics }, rx)
    }

    /// Enqueues an event. Returns false if it was dropped.
    pub fn push(&self, event: IngestionEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => {
                self.metrics.record_enqueued();
                true
            }
            Err(TrySendError::Full(event)) => {
                self.metrics.record_dropped_full();
                tracing::warn!(
                    kind = event.kind.as_str(),
                    body_id = %event.body_id(),
                    capacity = self.capacity(),
                    "delivery queue full, dropping event"
                );
                false
            }
            Err(TrySendError::Closed(event)) => {
                self.metrics.record_dropped_closed();
                tracing::warn!(
                    kind = event.kind.as_str(),
                    body_id = %event.body_id(),
                    "delivery queue closed, dropping event"
                );
                false
            }
        }
    }

    /// Events currently waiting for the shipper.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::TraceRecord;
    use serde_json::Value;

    fn event(id: &str) -> IngestionEvent {
        IngestionEvent::trace(TraceRecord::new(id, "t", Value::Null))
    }

    #[test]
    fn test_full_queue_drops_newest_without_blocking() {
        let metrics = Arc::new(DeliveryMetrics::new());
        let (queue, mut rx) = DeliveryQueue::bounded(2, metrics.clone());

        assert!(queue.push(event("a")));
        assert!(queue.push(event("b")));
        assert!(!queue.push(event("c")));
        assert_eq!(queue.len(), 2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.enqueued, 2);
        assert_eq!(snapshot.dropped_full, 1);

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event.body_id().to_string());
        }
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[test]
    fn test_closed_queue_counts_drop() {
        let metrics = Arc::new(DeliveryMetrics::new());
        let (queue, mut rx) = DeliveryQueue::bounded(4, metrics.clone());
        rx.close();

        assert!(!queue.push(event("a")));
        assert!(queue.is_closed());
        assert_eq!(metrics.snapshot().dropped_closed, 1);
    }
}
