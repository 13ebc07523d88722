//! Fleet stats polling over gRPC.
//!
//! The client side of `GetStats`, implementing the coordinator's polling
//! boundary. Connections are per-poll: polls are rare (one monitor tick)
//! and a fresh connect doubles as a liveness probe, so there is nothing to
//! gain from pooling here.

use async_trait::async_trait;
use tracing::debug;

use knn_breaker::{BreakerError, FleetStats};
use knn_types::{ClusterSettings, ConfigError};

use crate::pb::{knn_node_service_client::KnnNodeServiceClient, GetStatsRequest};

/// Polls every node's GetStats endpoint.
pub struct GrpcFleetStats {
    /// (node_id, endpoint URI) pairs, local node included.
    endpoints: Vec<(String, String)>,
}

impl GrpcFleetStats {
    pub fn new(endpoints: Vec<(String, String)>) -> Self {
        let endpoints = endpoints
            .into_iter()
            .map(|(id, addr)| (id, normalize(addr)))
            .collect();
        Self { endpoints }
    }

    /// Build from the cluster topology settings.
    pub fn from_settings(cluster: &ClusterSettings) -> Result<Self, ConfigError> {
        Ok(Self::new(cluster.endpoints()?))
    }
}

fn normalize(addr: String) -> String {
    if addr.starts_with("http://") || addr.starts_with("https://") {
        addr
    } else {
        format!("http://{addr}")
    }
}

#[async_trait]
impl FleetStats for GrpcFleetStats {
    async fn node_ids(&self) -> Result<Vec<String>, BreakerError> {
        Ok(self.endpoints.iter().map(|(id, _)| id.clone()).collect())
    }

    async fn cache_capacity_reached(&self, node: &str) -> Result<bool, BreakerError> {
        let endpoint = self
            .endpoints
            .iter()
            .find(|(id, _)| id == node)
            .map(|(_, addr)| addr.clone())
            .ok_or_else(|| BreakerError::Fleet(format!("unknown node '{node}'")))?;

        let mut client = KnnNodeServiceClient::connect(endpoint)
            .await
            .map_err(|e| BreakerError::Poll {
                node: node.to_string(),
                reason: e.to_string(),
            })?;
        let response = client
            .get_stats(GetStatsRequest {})
            .await
            .map_err(|e| BreakerError::Poll {
                node: node.to_string(),
                reason: e.to_string(),
            })?
            .into_inner();

        debug!(
            node,
            footprint_kb = response.total_footprint_kb,
            capacity_reached = response.cache_capacity_reached,
            "Polled node stats"
        );
        Ok(response.cache_capacity_reached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_node_ids_follow_topology() {
        let fleet = GrpcFleetStats::new(vec![
            ("node-1".to_string(), "127.0.0.1:50551".to_string()),
            ("node-2".to_string(), "127.0.0.1:50552".to_string()),
        ]);
        assert_eq!(
            fleet.node_ids().await.unwrap(),
            vec!["node-1".to_string(), "node-2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unknown_node_is_an_error() {
        let fleet = GrpcFleetStats::new(vec![]);
        assert!(matches!(
            fleet.cache_capacity_reached("ghost").await,
            Err(BreakerError::Fleet(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_node_is_a_poll_error() {
        // Nothing listens on this port.
        let fleet = GrpcFleetStats::new(vec![(
            "node-1".to_string(),
            "127.0.0.1:1".to_string(),
        )]);
        assert!(matches!(
            fleet.cache_capacity_reached("node-1").await,
            Err(BreakerError::Poll { .. })
        ));
    }
}
