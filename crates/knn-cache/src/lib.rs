//! # knn-cache
//!
//! A bounded, shared cache of loaded native ANN index handles.
//!
//! Query traffic goes through [`NativeIndexCache::get`], which single-flights
//! loads, charges each entry's footprint once at load time, and evicts
//! least-recently-used entries whenever the weight bound is exceeded. Every
//! capacity eviction trips the node's circuit breaker.
//!
//! Entries are invalidated three ways: explicitly, by idle expiry, and by
//! deletion of the backing file (observed through a filesystem watch). Native
//! handles are closed exactly once, on a dedicated teardown task, only after
//! the last holder releases its `Arc`.

pub mod cache;
pub mod entry;
pub mod error;
pub mod loader;
pub mod teardown;
pub mod watch;

pub use cache::{CacheConfig, NativeIndexCache, WarmupSummary};
pub use entry::{CacheEntry, EvictionCause, Teardown};
pub use error::CacheError;
pub use loader::{EngineLoader, IndexLoader, SettingsEngineLoader};
pub use teardown::spawn_teardown_executor;
pub use watch::{PathWatcher, WatchHandle};
