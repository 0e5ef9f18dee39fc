//! Broadcast bus for accepted snapshots
//!
//! Provides bounded fanout of every accepted snapshot to any number of
//! listeners (stream endpoints, CLI printers). The bus knows nothing about
//! transports; listeners serialize [`SnapshotFrame`]s however they like.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

use crate::snapshot::Snapshot;

/// Default number of frames a slow listener may fall behind before lagging.
pub const DEFAULT_BUS_CAPACITY: usize = 64;

/// One accepted snapshot as delivered to listeners.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotFrame {
    /// Monotonic sequence number, starting at 1.
    pub seq: u64,
    pub emitted_at: DateTime<Utc>,
    pub snapshot: Arc<Snapshot>,
}

/// Bus distributing accepted snapshots to subscribers
#[derive(Debug)]
pub struct SnapshotBus {
    sender: broadcast::Sender<SnapshotFrame>,
    capacity: usize,
    next_seq: AtomicU64,
}

impl Default for SnapshotBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl SnapshotBus {
    /// Create a new bus with the specified per-listener queue capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            next_seq: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Publish a snapshot to all current listeners and return its sequence
    /// number. Publishing with no listeners is not an error.
    pub fn publish(&self, snapshot: Arc<Snapshot>) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let frame = SnapshotFrame {
            seq,
            emitted_at: Utc::now(),
            snapshot,
        };
        match self.sender.send(frame) {
            Ok(listeners) => tracing::trace!(seq, listeners, "Snapshot frame published"),
            Err(_) => tracing::trace!(seq, "Snapshot frame published with no listeners"),
        }
        seq
    }

    /// Register a new listener. Frames published before this call are not
    /// replayed.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SnapshotFrame> {
        self.sender.subscribe()
    }

    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Sequence number of the most recent frame, 0 when nothing was published.
    #[must_use]
    pub fn last_seq(&self) -> u64 {
        self.next_seq.load(Ordering::Relaxed) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::parse;
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    fn snapshot(metric: &str) -> Arc<Snapshot> {
        Arc::new(parse(&format!("AB\nCD\n\n1: 2 / 3 / 4\n{metric}\n")).unwrap())
    }

    #[test]
    fn publish_without_listeners_is_fine() {
        let bus = SnapshotBus::new(4);
        assert_eq!(bus.publish(snapshot("1.0")), 1);
        assert_eq!(bus.publish(snapshot("1.1")), 2);
        assert_eq!(bus.last_seq(), 2);
    }

    #[test]
    fn every_listener_receives_frames() {
        let bus = SnapshotBus::new(4);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.receiver_count(), 2);

        bus.publish(snapshot("1.5"));
        let fa = a.try_recv().unwrap();
        let fb = b.try_recv().unwrap();
        assert_eq!(fa.seq, 1);
        assert!(Arc::ptr_eq(&fa.snapshot, &fb.snapshot));
        assert!(matches!(a.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn late_subscriber_sees_only_new_frames() {
        let bus = SnapshotBus::new(4);
        bus.publish(snapshot("1.0"));
        let mut rx = bus.subscribe();
        bus.publish(snapshot("2.0"));
        assert_eq!(rx.try_recv().unwrap().seq, 2);
    }

    #[tokio::test]
    async fn slow_listener_lags() {
        let bus = SnapshotBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.publish(snapshot(&format!("{i}.0")));
        }
        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(3))));
        assert_eq!(rx.recv().await.unwrap().seq, 4);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        assert_eq!(SnapshotBus::new(0).capacity(), 1);
    }

    #[test]
    fn frame_serializes_snapshot() {
        let bus = SnapshotBus::default();
        let mut rx = bus.subscribe();
        bus.publish(snapshot("1.25"));
        let json = serde_json::to_value(rx.try_recv().unwrap()).unwrap();
        assert_eq!(json["seq"], 1);
        assert_eq!(json["snapshot"]["metric"], 1.25);
        assert_eq!(json["snapshot"]["board"], serde_json::json!(["AB", "CD"]));
    }
}
