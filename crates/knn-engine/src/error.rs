//! Engine error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur opening or querying a native index.
#[derive(Debug, Error)]
pub enum EngineError {
    /// usearch index error
    #[error("Index error: {0}")]
    Index(String),

    /// Backing file missing at open time
    #[error("Index file not found: {0}")]
    NotFound(PathBuf),

    /// File extension does not map to a known engine
    #[error("No engine for file: {0}")]
    UnknownKind(PathBuf),

    /// Persisted flat index is malformed
    #[error("Corrupt index file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// Query dimension does not match the index
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
