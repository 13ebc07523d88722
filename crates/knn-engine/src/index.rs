//! The native index capability trait.

use crate::error::EngineError;

/// One ranked neighbor from a query.
///
/// `distance` is in the index's own space; results are ordered best-first
/// (smallest distance first for l2/cosine, largest dot product first for
/// inner product — each engine ranks in its own space).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// The vector id assigned at build time.
    pub id: u64,
    /// Distance from the query in the index's space.
    pub distance: f32,
}

impl Neighbor {
    pub fn new(id: u64, distance: f32) -> Self {
        Self { id, distance }
    }
}

/// A loaded native index.
///
/// Handles live outside the host allocator's view of the world (mmapped
/// graphs, native buffers); the memory they pin is what the cache accounts
/// for. Implementations must be safe for concurrent read access. Dropping a
/// handle releases the native resource; the cache guarantees that the drop
/// happens on its teardown executor, exactly once.
pub trait NativeIndex: Send + Sync {
    /// Get the embedding dimension.
    fn dimensions(&self) -> usize;

    /// Get the number of vectors in the index.
    fn len(&self) -> usize;

    /// Check if the index is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Search for the k nearest neighbors of `query`, ranked best-first.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, EngineError>;

    /// Self-reported memory weight in KiB, computed once at open time.
    ///
    /// KiB rather than bytes: graphs run to gigabytes and the cache sums
    /// these into a single u64 accumulator.
    fn footprint_kb(&self) -> u64;
}
