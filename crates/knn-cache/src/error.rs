//! Cache error types.
//!
//! Failures local to a single lookup are returned to that caller only;
//! background teardown and maintenance failures are logged where they happen
//! and never propagate to query paths.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Opening or querying the native index failed
    #[error("Engine error: {0}")]
    Engine(#[from] knn_engine::EngineError),

    /// Filesystem watch registration failed
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// The path to watch was already gone at registration time
    #[error("Watched path missing: {0}")]
    WatchPathMissing(PathBuf),

    /// The backing file disappeared while the load was in flight
    #[error("Index file deleted during load: {0}")]
    DeletedDuringLoad(PathBuf),

    /// The blocking load task failed to run
    #[error("Load task failed: {0}")]
    LoadTask(String),

    /// Invalid cache configuration
    #[error("Configuration error: {0}")]
    Config(#[from] knn_types::ConfigError),
}
