//! Fan-out of telemetry lines to real-time observers
//!
//! Every observer owns a bounded channel drained by its WebSocket task.
//! The observer set sits behind one lock and fan-out holds it for the
//! whole pass, so a removal can never interleave with a send. Sends never
//! block: an observer whose channel is closed is removed, one whose
//! channel is full misses that line.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

/// Per-observer buffered lines
pub const OBSERVER_BUFFER: usize = 64;

/// Outcome of a single fan-out pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Observers that accepted the line
    pub delivered: usize,
    /// Observers removed because their channel was closed
    pub removed: usize,
    /// Observers that missed the line because they were behind
    pub lagged: usize,
}

/// Observer registry and fan-out
#[derive(Debug, Default)]
pub struct Broadcaster {
    observers: Mutex<HashMap<Uuid, mpsc::Sender<String>>>,
    removed: AtomicU64,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer with the default buffer
    pub fn subscribe(&self) -> (Uuid, mpsc::Receiver<String>) {
        self.subscribe_with_capacity(OBSERVER_BUFFER)
    }

    pub fn subscribe_with_capacity(&self, capacity: usize) -> (Uuid, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = Uuid::new_v4();
        self.observers.lock().insert(id, tx);
        debug!(observer = %id, "Observer subscribed");
        (id, rx)
    }

    /// Remove an observer. Removing twice is a no-op.
    pub fn unsubscribe(&self, id: &Uuid) -> bool {
        let removed = self.observers.lock().remove(id).is_some();
        if removed {
            debug!(observer = %id, "Observer unsubscribed");
        }
        removed
    }

    /// Send `line` to every observer
    pub fn broadcast(&self, line: &str) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut observers = self.observers.lock();
        observers.retain(|id, tx| match tx.try_send(line.to_string()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                report.lagged += 1;
                warn!(observer = %id, "Observer lagging, line dropped");
                true
            }
            Err(TrySendError::Closed(_)) => {
                report.removed += 1;
                debug!(observer = %id, "Observer gone, removing");
                false
            }
        });
        drop(observers);

        if report.removed > 0 {
            self.removed
                .fetch_add(report.removed as u64, Ordering::Relaxed);
        }
        report
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    /// Observers dropped during fan-out since start
    pub fn removed_total(&self) -> u64 {
        self.removed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_skips_and_removes_dead_observer() {
        let broadcaster = Broadcaster::new();
        let (_a, mut rx_a) = broadcaster.subscribe();
        let (_b, mut rx_b) = broadcaster.subscribe();
        let (_dead, rx_dead) = broadcaster.subscribe();
        drop(rx_dead);

        let report = broadcaster.broadcast("V1,1.000000,2.000000,0.00,0.00,12.00,12.00,1.00");
        assert_eq!(report.delivered, 2);
        assert_eq!(report.removed, 1);
        assert_eq!(broadcaster.observer_count(), 2);
        assert_eq!(broadcaster.removed_total(), 1);

        assert!(rx_a.try_recv().unwrap().starts_with("V1,"));
        assert!(rx_b.try_recv().unwrap().starts_with("V1,"));
    }

    #[test]
    fn test_full_observer_is_kept() {
        let broadcaster = Broadcaster::new();
        let (_id, mut rx) = broadcaster.subscribe_with_capacity(1);

        assert_eq!(broadcaster.broadcast("first").delivered, 1);
        let report = broadcaster.broadcast("second");
        assert_eq!(report.lagged, 1);
        assert_eq!(broadcaster.observer_count(), 1);

        assert_eq!(rx.try_recv().unwrap(), "first");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let broadcaster = Broadcaster::new();
        let (id, _rx) = broadcaster.subscribe();
        assert!(broadcaster.unsubscribe(&id));
        assert!(!broadcaster.unsubscribe(&id));
        assert_eq!(broadcaster.broadcast("line"), BroadcastReport::default());
    }

    #[test]
    fn test_broadcast_preserves_order() {
        let broadcaster = Broadcaster::new();
        let (_id, mut rx) = broadcaster.subscribe();
        for n in 0..5 {
            broadcaster.broadcast(&format!("line {n}"));
        }
        for n in 0..5 {
            assert_eq!(rx.try_recv().unwrap(), format!("line {n}"));
        }
    }
}
