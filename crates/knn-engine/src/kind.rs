//! Engine selection.

use std::path::Path;

use knn_types::SpaceType;
use tracing::debug;

use crate::error::EngineError;
use crate::flat::FlatIndex;
use crate::hnsw::HnswIndex;
use crate::index::NativeIndex;

/// File extension for persisted HNSW graphs.
pub const HNSW_EXTENSION: &str = "usearch";
/// File extension for persisted flat indexes.
pub const FLAT_EXTENSION: &str = "flat";

/// Discriminator for the engine backing a cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    /// usearch HNSW graph, memory-mapped.
    Hnsw,
    /// Flat exact-scan index, loaded into memory.
    Flat,
}

impl EngineKind {
    /// Derive the engine from a file path's extension.
    pub fn from_path(path: &Path) -> Result<Self, EngineError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(HNSW_EXTENSION) => Ok(EngineKind::Hnsw),
            Some(FLAT_EXTENSION) => Ok(EngineKind::Flat),
            _ => Err(EngineError::UnknownKind(path.to_path_buf())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Hnsw => "hnsw",
            EngineKind::Flat => "flat",
        }
    }
}

/// Parameters applied when opening an index.
#[derive(Debug, Clone, Copy)]
pub struct EngineSpec {
    /// Distance function for the opened index.
    pub space: SpaceType,
    /// HNSW search depth (ef). Ignored by the flat engine.
    pub ef_search: usize,
}

impl Default for EngineSpec {
    fn default() -> Self {
        Self {
            space: SpaceType::Cosine,
            ef_search: 512,
        }
    }
}

/// Open the index at `path`, picking the engine from the file extension.
///
/// Fails fast if the file is absent: a not-yet-created file must never be
/// opened as an empty-but-valid index.
pub fn open_index(path: &Path, spec: &EngineSpec) -> Result<Box<dyn NativeIndex>, EngineError> {
    if !path.is_file() {
        return Err(EngineError::NotFound(path.to_path_buf()));
    }

    let kind = EngineKind::from_path(path)?;
    debug!(path = %path.display(), kind = kind.as_str(), "Opening native index");

    match kind {
        EngineKind::Hnsw => Ok(Box::new(HnswIndex::open(path, spec)?)),
        EngineKind::Flat => Ok(Box::new(FlatIndex::open(path, spec.space)?)),
    }
}
