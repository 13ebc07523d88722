//! gRPC node service for the knn cache daemon.
//!
//! Provides:
//! - GetStats RPC: cache totals, per-group aggregates, breaker state
//! - Warmup RPC: pre-load a group, gated by the circuit breaker
//! - Invalidate RPC: drop cached entries by key, group, or entirely
//! - Health check and reflection endpoints
//!
//! `GrpcFleetStats` is the client side of GetStats, used by the coordinator
//! to poll the fleet before clearing the cluster breaker flag.

pub mod fleet;
pub mod node_service;
pub mod server;

pub mod pb {
    tonic::include_proto!("knncache");

    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("knncache_descriptor");
}

pub use fleet::GrpcFleetStats;
pub use node_service::KnnNodeServiceImpl;
pub use server::{run_server, run_server_with_shutdown};
