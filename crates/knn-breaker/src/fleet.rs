//! Fleet boundaries consumed by the coordinator.

use async_trait::async_trait;

use crate::error::BreakerError;

/// Who is the elected coordinator.
///
/// Leadership may change between ticks; the monitor re-asks on every tick
/// and simply stops running the clear path when it is no longer leader. No
/// handoff state is carried — the next leader re-derives everything from a
/// fresh poll.
pub trait ClusterInfo: Send + Sync {
    fn is_coordinator(&self) -> bool;
}

/// Statically configured leadership: the coordinator is named in settings.
pub struct StaticClusterInfo {
    node_id: String,
    coordinator: String,
}

impl StaticClusterInfo {
    pub fn new(node_id: impl Into<String>, coordinator: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            coordinator: coordinator.into(),
        }
    }
}

impl ClusterInfo for StaticClusterInfo {
    fn is_coordinator(&self) -> bool {
        self.node_id == self.coordinator
    }
}

/// Per-node capacity polling, used only by the coordinator's clear path.
#[async_trait]
pub trait FleetStats: Send + Sync {
    /// Every node in the fleet, including the local one.
    async fn node_ids(&self) -> Result<Vec<String>, BreakerError>;

    /// Whether `node` currently reports `local_capacity_reached`.
    ///
    /// The monitor wraps each call in a bounded timeout and treats errors
    /// and timeouts as "still over capacity".
    async fn cache_capacity_reached(&self, node: &str) -> Result<bool, BreakerError>;
}
