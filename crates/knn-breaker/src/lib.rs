//! # knn-breaker
//!
//! The native-memory circuit breaker: per-node state plus the cluster-wide
//! coordination loop.
//!
//! Tripping is fast and decentralized — any node that evicts for weight
//! reasons flips its local flag and asks for the cluster flag to be set
//! immediately. Clearing is slow and conservative — only the elected
//! coordinator clears the cluster flag, and only after polling every node
//! and hearing "under threshold" from all of them. Partial responses and
//! timeouts keep the breaker tripped.

pub mod error;
pub mod fleet;
pub mod monitor;
pub mod state;
pub mod store;

pub use error::BreakerError;
pub use fleet::{ClusterInfo, FleetStats, StaticClusterInfo};
pub use monitor::{CapacityView, CircuitBreakerMonitor};
pub use state::CircuitBreakerState;
pub use store::{ensure_admission, ClusterFlagStore, InMemoryFlagStore};
