//! The cluster-wide breaker flag boundary.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::error::BreakerError;

/// Persisted cluster-wide `triggered` flag.
///
/// Any node may set it; only the elected coordinator clears it. The real
/// deployment backs this with the shared configuration provider; tests and
/// single-node deployments use [`InMemoryFlagStore`].
#[async_trait]
pub trait ClusterFlagStore: Send + Sync {
    async fn is_tripped(&self) -> Result<bool, BreakerError>;
    async fn set_tripped(&self, tripped: bool) -> Result<(), BreakerError>;
}

/// Process-local flag store.
#[derive(Default)]
pub struct InMemoryFlagStore {
    tripped: AtomicBool,
}

impl InMemoryFlagStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClusterFlagStore for InMemoryFlagStore {
    async fn is_tripped(&self) -> Result<bool, BreakerError> {
        Ok(self.tripped.load(Ordering::SeqCst))
    }

    async fn set_tripped(&self, tripped: bool) -> Result<(), BreakerError> {
        self.tripped.store(tripped, Ordering::SeqCst);
        Ok(())
    }
}

/// Admission-control guard for load-generating operations (warmup).
///
/// Queries against already-cached entries are never rejected; the breaker
/// protects against growing native memory, not against reading it.
pub async fn ensure_admission(store: &dyn ClusterFlagStore) -> Result<(), BreakerError> {
    if store.is_tripped().await? {
        return Err(BreakerError::Tripped);
    }
    Ok(())
}
