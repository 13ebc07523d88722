//! Read-only stats snapshots exposed to the observability surface.
//!
//! Snapshots are plain data with no side effects; the cache assembles them
//! under its own locks and hands out copies.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Aggregate stats for one logical group (an index/collection name).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupStats {
    /// Number of cached entries belonging to the group.
    pub entries: u64,
    /// Sum of the group's entry footprints in KiB.
    pub footprint_kb: u64,
}

/// Point-in-time view of the native index cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStatsSnapshot {
    /// Total footprint of all live entries in KiB.
    pub total_footprint_kb: u64,
    /// Configured weight bound in KiB, if the bound is enabled.
    pub limit_kb: Option<u64>,
    /// Footprint as a percentage of the bound (0 when unbounded).
    pub footprint_pct: f64,
    /// Per-group entry counts and footprints.
    pub groups: HashMap<String, GroupStats>,
    /// Lookup hits since the cache was built.
    pub hits: u64,
    /// Lookup misses (loads attempted) since the cache was built.
    pub misses: u64,
    /// Evictions since the cache was built, any cause.
    pub evictions: u64,
    /// Loads that failed since the cache was built.
    pub load_errors: u64,
}

impl CacheStatsSnapshot {
    /// Compute the footprint percentage from the total and the bound.
    pub fn percentage(total_kb: u64, limit_kb: Option<u64>) -> f64 {
        match limit_kb {
            Some(limit) if limit > 0 => (total_kb as f64 / limit as f64) * 100.0,
            _ => 0.0,
        }
    }
}

/// Per-node view combining cache stats with breaker state, as reported to
/// the fleet-polling coordinator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeStatsSnapshot {
    /// Identifier of the reporting node.
    pub node_id: String,
    /// The cache view at poll time.
    pub cache: CacheStatsSnapshot,
    /// Whether this node hit its weight bound and has not yet drained.
    pub cache_capacity_reached: bool,
    /// The cluster-wide breaker flag as this node last saw it.
    pub circuit_breaker_triggered: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage() {
        assert_eq!(CacheStatsSnapshot::percentage(50, Some(100)), 50.0);
        assert_eq!(CacheStatsSnapshot::percentage(80, Some(70)), (80.0 / 70.0) * 100.0);
        assert_eq!(CacheStatsSnapshot::percentage(80, None), 0.0);
        assert_eq!(CacheStatsSnapshot::percentage(80, Some(0)), 0.0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let mut snapshot = CacheStatsSnapshot {
            total_footprint_kb: 80,
            limit_kb: Some(100),
            footprint_pct: 80.0,
            ..Default::default()
        };
        snapshot
            .groups
            .insert("products".to_string(), GroupStats { entries: 2, footprint_kb: 80 });

        let json = serde_json::to_string(&snapshot).unwrap();
        let back: CacheStatsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.total_footprint_kb, 80);
        assert_eq!(back.groups["products"].entries, 2);
    }
}
