//! Per-node breaker state.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::info;

/// One per node. The cache trips it on weight-bound evictions; the monitor
/// clears it once footprint drains below the unset threshold.
pub struct CircuitBreakerState {
    local_capacity_reached: AtomicBool,
    trip_tx: mpsc::UnboundedSender<()>,
}

impl CircuitBreakerState {
    /// Create the state plus the trip-signal receiver the monitor drains.
    ///
    /// The channel is the fast path: a weight eviction on any node requests
    /// the cluster-wide flag be set without waiting for the next tick.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<()>) {
        let (trip_tx, trip_rx) = mpsc::unbounded_channel();
        (
            Self {
                local_capacity_reached: AtomicBool::new(false),
                trip_tx,
            },
            trip_rx,
        )
    }

    /// Record a weight-bound eviction: set the local flag and request the
    /// cluster flag be set.
    pub fn trip(&self) {
        if !self.local_capacity_reached.swap(true, Ordering::SeqCst) {
            info!("Native memory cache capacity reached; tripping circuit breaker");
        }
        // Monitor gone means we are shutting down; nothing to signal.
        let _ = self.trip_tx.send(());
    }

    pub fn is_capacity_reached(&self) -> bool {
        self.local_capacity_reached.load(Ordering::SeqCst)
    }

    pub fn set_capacity_reached(&self, value: bool) {
        self.local_capacity_reached.store(value, Ordering::SeqCst);
    }
}
