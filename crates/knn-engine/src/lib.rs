//! # knn-engine
//!
//! Native index engines behind one capability trait.
//!
//! A persisted ANN graph on disk is opened into a [`NativeIndex`] handle that
//! can answer k-nearest-neighbor queries and report its own memory footprint.
//! Two engines live behind the trait:
//! - usearch-backed HNSW graphs (`.usearch` files), memory-mapped on open
//! - flat exact-scan indexes (`.flat` files), for small or reference data
//!
//! The engine for a given file is picked by [`EngineKind::from_path`], the
//! discriminator stored in the file name itself. Closing a handle is dropping
//! it; the cache layer decides where that drop happens.

pub mod catalog;
pub mod error;
pub mod flat;
pub mod hnsw;
pub mod index;
pub mod kind;

pub use catalog::Catalog;
pub use error::EngineError;
pub use flat::{write_flat_index, FlatIndex};
pub use hnsw::HnswIndex;
pub use index::{NativeIndex, Neighbor};
pub use kind::{open_index, EngineKind, EngineSpec};
