//! KnnNodeService RPC implementations.

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::{info, warn};

use knn_breaker::{ensure_admission, BreakerError, CircuitBreakerState, ClusterFlagStore};
use knn_cache::{CacheError, NativeIndexCache};
use knn_engine::EngineError;

use crate::pb::{
    invalidate_request::Target, knn_node_service_server::KnnNodeService, GetStatsRequest,
    GetStatsResponse, GroupStats, InvalidateRequest, InvalidateResponse, WarmupRequest,
    WarmupResponse,
};

/// Implementation of the KnnNodeService gRPC service.
pub struct KnnNodeServiceImpl {
    node_id: String,
    cache: Arc<NativeIndexCache>,
    breaker: Arc<CircuitBreakerState>,
    flag_store: Arc<dyn ClusterFlagStore>,
}

impl KnnNodeServiceImpl {
    pub fn new(
        node_id: impl Into<String>,
        cache: Arc<NativeIndexCache>,
        breaker: Arc<CircuitBreakerState>,
        flag_store: Arc<dyn ClusterFlagStore>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            cache,
            breaker,
            flag_store,
        }
    }
}

#[tonic::async_trait]
impl KnnNodeService for KnnNodeServiceImpl {
    async fn get_stats(
        &self,
        _request: Request<GetStatsRequest>,
    ) -> Result<Response<GetStatsResponse>, Status> {
        let stats = self.cache.stats();
        let triggered = self
            .flag_store
            .is_tripped()
            .await
            .map_err(|e| Status::internal(e.to_string()))?;

        let groups = stats
            .groups
            .into_iter()
            .map(|(name, group)| {
                (
                    name,
                    GroupStats {
                        entries: group.entries,
                        footprint_kb: group.footprint_kb,
                    },
                )
            })
            .collect();

        Ok(Response::new(GetStatsResponse {
            node_id: self.node_id.clone(),
            total_footprint_kb: stats.total_footprint_kb,
            limit_kb: stats.limit_kb.unwrap_or(0),
            limit_enabled: stats.limit_kb.is_some(),
            footprint_pct: stats.footprint_pct,
            groups,
            hits: stats.hits,
            misses: stats.misses,
            evictions: stats.evictions,
            load_errors: stats.load_errors,
            cache_capacity_reached: self.breaker.is_capacity_reached(),
            circuit_breaker_triggered: triggered,
        }))
    }

    async fn warmup(
        &self,
        request: Request<WarmupRequest>,
    ) -> Result<Response<WarmupResponse>, Status> {
        let group = request.into_inner().group;
        if group.is_empty() {
            return Err(Status::invalid_argument("group must not be empty"));
        }

        // Warmup grows native memory, so it is gated by the breaker. Reads
        // of already-cached entries never are.
        ensure_admission(self.flag_store.as_ref())
            .await
            .map_err(|e| match e {
                BreakerError::Tripped => {
                    warn!(group, "Warmup rejected: circuit breaker is tripped");
                    Status::resource_exhausted(e.to_string())
                }
                other => Status::internal(other.to_string()),
            })?;

        let summary = self
            .cache
            .warm(&group)
            .await
            .map_err(cache_error_status)?;
        Ok(Response::new(WarmupResponse {
            loaded: summary.loaded as u64,
            failed: summary.failed as u64,
        }))
    }

    async fn invalidate(
        &self,
        request: Request<InvalidateRequest>,
    ) -> Result<Response<InvalidateResponse>, Status> {
        match request.into_inner().target {
            Some(Target::Key(key)) => {
                info!(key, "Invalidate requested");
                self.cache.invalidate(&key);
            }
            Some(Target::Group(group)) => {
                info!(group, "Group invalidation requested");
                self.cache.invalidate_group(&group);
            }
            Some(Target::All(_)) => {
                info!("Full cache invalidation requested");
                self.cache.invalidate_all();
            }
            None => return Err(Status::invalid_argument("invalidate target missing")),
        }
        Ok(Response::new(InvalidateResponse {}))
    }
}

fn cache_error_status(error: CacheError) -> Status {
    match &error {
        CacheError::Engine(EngineError::NotFound(_)) => Status::not_found(error.to_string()),
        _ => Status::internal(error.to_string()),
    }
}
