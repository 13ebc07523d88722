//! Flat exact-scan index.
//!
//! A small self-framed binary format, scanned in full per query. Used for
//! groups too small to justify a graph, and as the second engine behind the
//! [`NativeIndex`] trait in tests.
//!
//! Layout (little-endian):
//! - 8 byte magic `KNNFLAT1`
//! - u32 dimension
//! - u64 vector count
//! - count records of (u64 id, dimension * f32)

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use knn_types::SpaceType;
use tracing::debug;

use crate::error::EngineError;
use crate::index::{NativeIndex, Neighbor};

const MAGIC: &[u8; 8] = b"KNNFLAT1";
const HEADER_LEN: usize = 8 + 4 + 8;

/// An exact-scan index held fully in memory.
pub struct FlatIndex {
    dimension: usize,
    ids: Vec<u64>,
    vectors: Vec<f32>,
    space: SpaceType,
    footprint_kb: u64,
}

impl FlatIndex {
    /// Read a flat index file into memory.
    pub fn open(path: &Path, space: SpaceType) -> Result<Self, EngineError> {
        let bytes = fs::read(path)?;
        let corrupt = |reason: &str| EngineError::Corrupt {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        if bytes.len() < HEADER_LEN || &bytes[..8] != MAGIC {
            return Err(corrupt("bad magic"));
        }

        let dimension = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
        let count = u64::from_le_bytes(bytes[12..20].try_into().unwrap()) as usize;
        if dimension == 0 {
            return Err(corrupt("zero dimension"));
        }

        // Header fields come off disk; size them against the actual body
        // before allocating anything.
        let record_len = dimension
            .checked_mul(4)
            .and_then(|v| v.checked_add(8))
            .ok_or_else(|| corrupt("dimension out of range"))?;
        let body_len = bytes.len() - HEADER_LEN;
        if count > body_len / record_len {
            return Err(corrupt("count exceeds file size"));
        }
        let expected = HEADER_LEN + count * record_len;
        if bytes.len() != expected {
            return Err(corrupt("truncated or oversized body"));
        }

        let mut ids = Vec::with_capacity(count);
        let mut vectors = Vec::with_capacity(count * dimension);
        for record in bytes[HEADER_LEN..].chunks_exact(record_len) {
            ids.push(u64::from_le_bytes(record[..8].try_into().unwrap()));
            for value in record[8..].chunks_exact(4) {
                vectors.push(f32::from_le_bytes(value.try_into().unwrap()));
            }
        }

        // Weight of the in-memory copy, in KiB, measured once.
        let resident_bytes = ids.len() * 8 + vectors.len() * 4;
        let footprint_kb = (resident_bytes as u64 / 1024).max(1);

        debug!(
            path = %path.display(),
            vectors = count,
            dim = dimension,
            footprint_kb,
            "Opened flat index"
        );

        Ok(Self {
            dimension,
            ids,
            vectors,
            space,
            footprint_kb,
        })
    }

    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.space {
            SpaceType::L2 => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
            SpaceType::Cosine => {
                let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if na == 0.0 || nb == 0.0 {
                    1.0
                } else {
                    1.0 - dot / (na * nb)
                }
            }
            // Negated dot product so ascending order ranks best-first.
            SpaceType::InnerProduct => -a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>(),
        }
    }
}

impl NativeIndex for FlatIndex {
    fn dimensions(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, EngineError> {
        if query.len() != self.dimension {
            return Err(EngineError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut neighbors: Vec<Neighbor> = self
            .vectors
            .chunks_exact(self.dimension)
            .zip(&self.ids)
            .map(|(vector, &id)| Neighbor::new(id, self.distance(query, vector)))
            .collect();
        neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        neighbors.truncate(k);
        Ok(neighbors)
    }

    fn footprint_kb(&self) -> u64 {
        self.footprint_kb
    }
}

/// Write a flat index file. Used by ingestion tooling and tests.
pub fn write_flat_index(
    path: &Path,
    dimension: usize,
    entries: &[(u64, Vec<f32>)],
) -> Result<PathBuf, EngineError> {
    for (_, vector) in entries {
        if vector.len() != dimension {
            return Err(EngineError::DimensionMismatch {
                expected: dimension,
                actual: vector.len(),
            });
        }
    }

    let mut file = fs::File::create(path)?;
    file.write_all(MAGIC)?;
    file.write_all(&(dimension as u32).to_le_bytes())?;
    file.write_all(&(entries.len() as u64).to_le_bytes())?;
    for (id, vector) in entries {
        file.write_all(&id.to_le_bytes())?;
        for value in vector {
            file.write_all(&value.to_le_bytes())?;
        }
    }
    file.sync_all()?;
    Ok(path.to_path_buf())
}
