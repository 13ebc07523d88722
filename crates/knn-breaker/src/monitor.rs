//! The periodic breaker coordination task.
//!
//! One monitor runs per node. Every tick it:
//! 1. clears the local capacity flag once footprint drains to or below the
//!    unset threshold;
//! 2. persists any fast-trip requests raised by weight evictions;
//! 3. on the coordinator only, polls the whole fleet and clears the shared
//!    flag when — and only when — every node responds under-threshold.
//!
//! Coordination failures are logged and leave the flag set; nothing in this
//! loop can take the process down.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use knn_types::SettingsManager;

use crate::fleet::{ClusterInfo, FleetStats};
use crate::state::CircuitBreakerState;
use crate::store::ClusterFlagStore;

/// What the monitor needs to see of the cache: live footprint and the
/// configured bound. Implemented by the native index cache.
pub trait CapacityView: Send + Sync {
    /// Total accounted footprint in KiB.
    fn footprint_kb(&self) -> u64;

    /// The weight bound in KiB, when the bound is enabled.
    fn weight_limit_kb(&self) -> Option<u64>;
}

/// Periodic reconciliation of local and cluster breaker state.
pub struct CircuitBreakerMonitor {
    state: Arc<CircuitBreakerState>,
    capacity: Arc<dyn CapacityView>,
    flag_store: Arc<dyn ClusterFlagStore>,
    cluster: Arc<dyn ClusterInfo>,
    fleet: Arc<dyn FleetStats>,
    settings: Arc<SettingsManager>,
}

impl CircuitBreakerMonitor {
    pub fn new(
        state: Arc<CircuitBreakerState>,
        capacity: Arc<dyn CapacityView>,
        flag_store: Arc<dyn ClusterFlagStore>,
        cluster: Arc<dyn ClusterInfo>,
        fleet: Arc<dyn FleetStats>,
        settings: Arc<SettingsManager>,
    ) -> Self {
        Self {
            state,
            capacity,
            flag_store,
            cluster,
            fleet,
            settings,
        }
    }

    /// Run until cancelled, ticking on the configured interval and reacting
    /// immediately to fast-trip signals.
    pub async fn run(
        self: Arc<Self>,
        mut trip_rx: mpsc::UnboundedReceiver<()>,
        shutdown: CancellationToken,
    ) {
        info!("Circuit breaker monitor started");
        loop {
            let interval =
                Duration::from_secs(self.settings.current().breaker.monitor_interval_secs);
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => self.tick().await,
                Some(()) = trip_rx.recv() => {
                    // Coalesce a burst of evictions into one write.
                    while trip_rx.try_recv().is_ok() {}
                    match self.flag_store.set_tripped(true).await {
                        Ok(()) => info!("Circuit breaker tripped cluster-wide"),
                        Err(e) => error!(error = %e, "Failed to persist tripped flag"),
                    }
                }
            }
        }
        info!("Circuit breaker monitor stopped");
    }

    /// One reconciliation pass. Public so tests (and admin tooling) can
    /// drive it without the timer.
    pub async fn tick(&self) {
        let breaker = self.settings.current().breaker;

        self.unset_local_if_drained(breaker.unset_percentage);

        let tripped = match self.flag_store.is_tripped().await {
            Ok(tripped) => tripped,
            Err(e) => {
                error!(error = %e, "Failed to read cluster breaker flag");
                return;
            }
        };
        if tripped && self.cluster.is_coordinator() {
            self.try_clear_cluster_flag(Duration::from_secs(breaker.poll_timeout_secs))
                .await;
        }
    }

    fn unset_local_if_drained(&self, unset_percentage: f64) {
        if !self.state.is_capacity_reached() {
            return;
        }
        let Some(limit_kb) = self.capacity.weight_limit_kb() else {
            // Bound disabled by a settings change; nothing holds the flag.
            self.state.set_capacity_reached(false);
            return;
        };

        let unset_kb = ((unset_percentage / 100.0) * limit_kb as f64) as u64;
        let current_kb = self.capacity.footprint_kb();
        if current_kb <= unset_kb {
            info!(
                current_kb,
                unset_kb, "Native memory drained below unset threshold; clearing capacity flag"
            );
            self.state.set_capacity_reached(false);
        }
    }

    /// Coordinator-only: clear the shared flag if the whole fleet reports
    /// under-threshold. Any timeout, error, or over-capacity report keeps
    /// the flag set.
    async fn try_clear_cluster_flag(&self, poll_timeout: Duration) {
        let nodes = match self.fleet.node_ids().await {
            Ok(nodes) => nodes,
            Err(e) => {
                error!(error = %e, "Failed to enumerate fleet; breaker stays tripped");
                return;
            }
        };

        let mut at_capacity = Vec::new();
        let mut unreachable = Vec::new();
        for node in nodes {
            match tokio::time::timeout(poll_timeout, self.fleet.cache_capacity_reached(&node)).await
            {
                Ok(Ok(true)) => at_capacity.push(node),
                Ok(Ok(false)) => {}
                Ok(Err(e)) => {
                    warn!(node = %node, error = %e, "Capacity poll failed");
                    unreachable.push(node);
                }
                Err(_) => {
                    warn!(node = %node, timeout_secs = poll_timeout.as_secs(), "Capacity poll timed out");
                    unreachable.push(node);
                }
            }
        }

        if at_capacity.is_empty() && unreachable.is_empty() {
            info!("All nodes report under threshold; clearing cluster breaker flag");
            if let Err(e) = self.flag_store.set_tripped(false).await {
                error!(error = %e, "Failed to clear cluster breaker flag");
            }
        } else {
            info!(
                at_capacity = at_capacity.join(","),
                unreachable = unreachable.join(","),
                "Cluster breaker flag stays set"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use knn_types::Settings;

    use crate::error::BreakerError;
    use crate::fleet::StaticClusterInfo;
    use crate::store::InMemoryFlagStore;

    struct FakeCapacity {
        footprint_kb: AtomicU64,
        limit_kb: Option<u64>,
    }

    impl FakeCapacity {
        fn new(footprint_kb: u64, limit_kb: Option<u64>) -> Self {
            Self {
                footprint_kb: AtomicU64::new(footprint_kb),
                limit_kb,
            }
        }
    }

    impl CapacityView for FakeCapacity {
        fn footprint_kb(&self) -> u64 {
            self.footprint_kb.load(Ordering::SeqCst)
        }
        fn weight_limit_kb(&self) -> Option<u64> {
            self.limit_kb
        }
    }

    enum NodeReport {
        Under,
        Over,
        Fails,
        /// Responds only after this long (drives the timeout path).
        Slow(Duration),
    }

    struct FakeFleet {
        reports: Mutex<HashMap<String, NodeReport>>,
    }

    impl FakeFleet {
        fn new(reports: Vec<(&str, NodeReport)>) -> Self {
            Self {
                reports: Mutex::new(
                    reports
                        .into_iter()
                        .map(|(n, r)| (n.to_string(), r))
                        .collect(),
                ),
            }
        }
    }

    #[async_trait]
    impl FleetStats for FakeFleet {
        async fn node_ids(&self) -> Result<Vec<String>, BreakerError> {
            let mut ids: Vec<String> = self.reports.lock().unwrap().keys().cloned().collect();
            ids.sort();
            Ok(ids)
        }

        async fn cache_capacity_reached(&self, node: &str) -> Result<bool, BreakerError> {
            let delay = {
                let reports = self.reports.lock().unwrap();
                match reports.get(node) {
                    Some(NodeReport::Under) => return Ok(false),
                    Some(NodeReport::Over) => return Ok(true),
                    Some(NodeReport::Fails) => {
                        return Err(BreakerError::Poll {
                            node: node.to_string(),
                            reason: "connection refused".to_string(),
                        })
                    }
                    Some(NodeReport::Slow(delay)) => *delay,
                    None => return Err(BreakerError::Fleet("unknown node".to_string())),
                }
            };
            tokio::time::sleep(delay).await;
            Ok(false)
        }
    }

    fn monitor_with(
        state: Arc<CircuitBreakerState>,
        capacity: FakeCapacity,
        flag_store: Arc<InMemoryFlagStore>,
        coordinator: bool,
        fleet: FakeFleet,
    ) -> CircuitBreakerMonitor {
        let node = if coordinator { "node-1" } else { "node-2" };
        CircuitBreakerMonitor::new(
            state,
            Arc::new(capacity),
            flag_store,
            Arc::new(StaticClusterInfo::new(node, "node-1")),
            Arc::new(fleet),
            Arc::new(SettingsManager::new(Settings::default())),
        )
    }

    #[tokio::test]
    async fn test_local_flag_clears_when_drained() {
        let (state, _rx) = CircuitBreakerState::new();
        let state = Arc::new(state);
        state.trip();

        // 40 KiB of 70 KiB limit: below the 75% threshold of 52 KiB.
        let monitor = monitor_with(
            state.clone(),
            FakeCapacity::new(40, Some(70)),
            Arc::new(InMemoryFlagStore::new()),
            true,
            FakeFleet::new(vec![]),
        );
        monitor.tick().await;
        assert!(!state.is_capacity_reached());
    }

    #[tokio::test]
    async fn test_local_flag_stays_when_still_over_threshold() {
        let (state, _rx) = CircuitBreakerState::new();
        let state = Arc::new(state);
        state.trip();

        // 60 KiB of 70 KiB limit: above 52 KiB, flag must hold.
        let monitor = monitor_with(
            state.clone(),
            FakeCapacity::new(60, Some(70)),
            Arc::new(InMemoryFlagStore::new()),
            true,
            FakeFleet::new(vec![]),
        );
        monitor.tick().await;
        assert!(state.is_capacity_reached());
    }

    #[tokio::test]
    async fn test_coordinator_clears_when_all_under() {
        let (state, _rx) = CircuitBreakerState::new();
        let flag_store = Arc::new(InMemoryFlagStore::new());
        flag_store.set_tripped(true).await.unwrap();

        let monitor = monitor_with(
            Arc::new(state),
            FakeCapacity::new(0, Some(70)),
            flag_store.clone(),
            true,
            FakeFleet::new(vec![("node-1", NodeReport::Under), ("node-2", NodeReport::Under)]),
        );
        monitor.tick().await;
        assert!(!flag_store.is_tripped().await.unwrap());
    }

    #[tokio::test]
    async fn test_flag_stays_when_any_node_over() {
        let (state, _rx) = CircuitBreakerState::new();
        let flag_store = Arc::new(InMemoryFlagStore::new());
        flag_store.set_tripped(true).await.unwrap();

        let monitor = monitor_with(
            Arc::new(state),
            FakeCapacity::new(0, Some(70)),
            flag_store.clone(),
            true,
            FakeFleet::new(vec![("node-1", NodeReport::Under), ("node-2", NodeReport::Over)]),
        );
        monitor.tick().await;
        assert!(flag_store.is_tripped().await.unwrap());
    }

    #[tokio::test]
    async fn test_flag_stays_when_any_node_fails() {
        let (state, _rx) = CircuitBreakerState::new();
        let flag_store = Arc::new(InMemoryFlagStore::new());
        flag_store.set_tripped(true).await.unwrap();

        let monitor = monitor_with(
            Arc::new(state),
            FakeCapacity::new(0, Some(70)),
            flag_store.clone(),
            true,
            FakeFleet::new(vec![("node-1", NodeReport::Under), ("node-2", NodeReport::Fails)]),
        );
        monitor.tick().await;
        assert!(flag_store.is_tripped().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flag_stays_when_a_node_times_out() {
        let (state, _rx) = CircuitBreakerState::new();
        let flag_store = Arc::new(InMemoryFlagStore::new());
        flag_store.set_tripped(true).await.unwrap();

        // Default poll timeout is 10s; this node answers after 30s.
        let monitor = monitor_with(
            Arc::new(state),
            FakeCapacity::new(0, Some(70)),
            flag_store.clone(),
            true,
            FakeFleet::new(vec![
                ("node-1", NodeReport::Under),
                ("node-2", NodeReport::Slow(Duration::from_secs(30))),
            ]),
        );
        monitor.tick().await;
        assert!(flag_store.is_tripped().await.unwrap());
    }

    #[tokio::test]
    async fn test_non_coordinator_never_clears() {
        let (state, _rx) = CircuitBreakerState::new();
        let flag_store = Arc::new(InMemoryFlagStore::new());
        flag_store.set_tripped(true).await.unwrap();

        let monitor = monitor_with(
            Arc::new(state),
            FakeCapacity::new(0, Some(70)),
            flag_store.clone(),
            false,
            FakeFleet::new(vec![("node-1", NodeReport::Under), ("node-2", NodeReport::Under)]),
        );
        monitor.tick().await;
        assert!(flag_store.is_tripped().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_persists_fast_trip() {
        let (state, trip_rx) = CircuitBreakerState::new();
        let state = Arc::new(state);
        let flag_store = Arc::new(InMemoryFlagStore::new());

        let monitor = Arc::new(monitor_with(
            state.clone(),
            FakeCapacity::new(0, Some(70)),
            flag_store.clone(),
            false,
            FakeFleet::new(vec![]),
        ));

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(monitor.run(trip_rx, shutdown.clone()));

        state.trip();
        // Let the monitor observe the signal.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(flag_store.is_tripped().await.unwrap());

        shutdown.cancel();
        task.await.unwrap();
    }
}
