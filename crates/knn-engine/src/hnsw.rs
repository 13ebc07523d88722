//! HNSW engine backed by usearch.
//!
//! Graphs are opened with `view()`, which memory-maps the file instead of
//! copying it onto the heap. The mapped pages are exactly the native memory
//! the cache has to account for.

use std::path::{Path, PathBuf};

use knn_types::SpaceType;
use tracing::{debug, info};
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use crate::error::EngineError;
use crate::index::{NativeIndex, Neighbor};
use crate::kind::EngineSpec;

fn metric_for(space: SpaceType) -> MetricKind {
    match space {
        SpaceType::L2 => MetricKind::L2sq,
        SpaceType::Cosine => MetricKind::Cos,
        SpaceType::InnerProduct => MetricKind::IP,
    }
}

/// A memory-mapped usearch HNSW graph.
pub struct HnswIndex {
    index: Index,
    path: PathBuf,
    footprint_kb: u64,
}

impl HnswIndex {
    /// Map the graph at `path` into memory.
    ///
    /// `view()` restores the persisted geometry (dimensions, metric); the
    /// options only seed the handle before the file is attached.
    pub fn open(path: &Path, spec: &EngineSpec) -> Result<Self, EngineError> {
        let options = IndexOptions {
            dimensions: 1,
            metric: metric_for(spec.space),
            quantization: ScalarKind::F32,
            ..Default::default()
        };

        let path_str = path
            .to_str()
            .ok_or_else(|| EngineError::Index("Invalid path encoding".to_string()))?;

        let index = Index::new(&options).map_err(|e| EngineError::Index(e.to_string()))?;
        index
            .view(path_str)
            .map_err(|e| EngineError::Index(format!("Failed to map {path_str}: {e}")))?;
        index.change_expansion_search(spec.ef_search);

        // Weight is measured once at open time and treated as immutable for
        // the handle's lifetime.
        let mapped_bytes = index.memory_usage() as u64;
        let file_bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let footprint_kb = (mapped_bytes.max(file_bytes) / 1024).max(1);

        info!(
            path = %path.display(),
            vectors = index.size(),
            dim = index.dimensions(),
            footprint_kb,
            "Mapped HNSW index"
        );

        Ok(Self {
            index,
            path: path.to_path_buf(),
            footprint_kb,
        })
    }

    /// The file this graph was mapped from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl NativeIndex for HnswIndex {
    fn dimensions(&self) -> usize {
        self.index.dimensions()
    }

    fn len(&self) -> usize {
        self.index.size()
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, EngineError> {
        let expected = self.index.dimensions();
        if query.len() != expected {
            return Err(EngineError::DimensionMismatch {
                expected,
                actual: query.len(),
            });
        }

        let matches = self
            .index
            .search(query, k)
            .map_err(|e| EngineError::Index(e.to_string()))?;

        let neighbors: Vec<Neighbor> = matches
            .keys
            .iter()
            .zip(matches.distances.iter())
            .map(|(&id, &distance)| Neighbor::new(id, distance))
            .collect();

        debug!(k, found = neighbors.len(), "HNSW search complete");
        Ok(neighbors)
    }

    fn footprint_kb(&self) -> u64 {
        self.footprint_kb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn random_vector(dim: usize) -> Vec<f32> {
        use rand::Rng;
        let mut rng = rand::rng();
        (0..dim).map(|_| rng.random()).collect()
    }

    fn build_graph(path: &Path, dim: usize, count: u64) {
        let options = IndexOptions {
            dimensions: dim,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F32,
            ..Default::default()
        };
        let index = Index::new(&options).unwrap();
        index.reserve(count as usize).unwrap();
        for id in 0..count {
            index.add(id, &random_vector(dim)).unwrap();
        }
        index.save(path.to_str().unwrap()).unwrap();
    }

    #[test]
    fn test_open_and_search() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("seg_0.usearch");
        build_graph(&path, 16, 32);

        let index = HnswIndex::open(&path, &EngineSpec::default()).unwrap();
        assert_eq!(index.dimensions(), 16);
        assert_eq!(index.len(), 32);
        assert!(index.footprint_kb() >= 1);

        let results = index.search(&random_vector(16), 5).unwrap();
        assert_eq!(results.len(), 5);
        for pair in results.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[test]
    fn test_open_with_custom_ef_search() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("seg_0.usearch");
        build_graph(&path, 16, 32);

        let spec = EngineSpec {
            ef_search: 64,
            ..Default::default()
        };
        let index = HnswIndex::open(&path, &spec).unwrap();
        assert_eq!(index.search(&random_vector(16), 3).unwrap().len(), 3);
    }

    #[test]
    fn test_dimension_mismatch() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("seg_0.usearch");
        build_graph(&path, 16, 8);

        let index = HnswIndex::open(&path, &EngineSpec::default()).unwrap();
        assert!(matches!(
            index.search(&random_vector(4), 1),
            Err(EngineError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_open_garbage_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("seg_0.usearch");
        std::fs::write(&path, b"not a graph").unwrap();
        assert!(HnswIndex::open(&path, &EngineSpec::default()).is_err());
    }
}
