//! Vector index abstractions for approximate nearest-neighbor search.
//!
//! This module provides a trait-based abstraction over ANN backends.
//! The primary implementation uses [`hnsw_rs`], selecting one of three
//! distance metrics at construction time.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────┐
//! │         VectorIndex trait         │
//! └──────────┬───────────────────────┘
//!            │
//!    ┌───────┴────────┐
//!    │   HnswIndex    │  (hnsw_rs wrapper, runtime metric choice)
//!    └────────────────┘
//! ```
//!
//! The container's segment log is the source of truth. The HNSW graph
//! is a derived, rebuildable structure — if its metadata file is
//! missing or corrupt, rebuild from the segment log's vector records.

mod hnsw;

pub use hnsw::HnswIndex;

use std::path::Path;

use crate::error::Result;

/// Vector index trait for approximate nearest neighbor search.
///
/// Implementations must be `Send + Sync`. Ids are caller-supplied
/// strings; implementations map them to a dense internal `usize` space
/// for the underlying graph.
///
/// Mutating methods (`insert`, `delete`) take `&self` and rely on
/// interior mutability, so reads and writes can proceed concurrently
/// subject to the implementation's own locking.
pub trait VectorIndex: Send + Sync {
    /// Inserts a single vector under `id`.
    fn insert(&self, id: &str, embedding: &[f32]) -> Result<()>;

    /// Inserts a batch of `(id, embedding)` pairs.
    fn insert_batch(&self, items: &[(String, Vec<f32>)]) -> Result<()>;

    /// Searches for the k nearest neighbors to the query vector.
    ///
    /// Returns `(id, distance)` pairs sorted by distance ascending
    /// (closest first). The distance is in the index's native metric
    /// space; convert with `Metric::similarity` for a score.
    fn search(&self, query: &[f32], k: usize, ef_search: usize) -> Result<Vec<(String, f32)>>;

    /// Searches with an additional predicate applied during traversal.
    ///
    /// Only points where `filter(id)` returns `true` are considered.
    /// This is filter-during-traversal, not post-filtering: it keeps
    /// the requested result count even when most points are filtered.
    fn search_filtered(
        &self,
        query: &[f32],
        k: usize,
        ef_search: usize,
        filter: &(dyn Fn(&str) -> bool + Sync),
    ) -> Result<Vec<(String, f32)>>;

    /// Marks `id` as deleted (soft-delete).
    ///
    /// The vector remains in the graph but is excluded from search
    /// results. HNSW graphs don't support point removal: removing
    /// nodes breaks proximity edges that other nodes rely on.
    fn delete(&self, id: &str) -> Result<()>;

    /// Returns true if `id` is marked as deleted.
    fn is_deleted(&self, id: &str) -> bool;

    /// Returns the number of active (non-deleted) vectors.
    fn len(&self) -> usize;

    /// Returns true if the index has no active vectors.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persists index metadata to disk.
    fn save(&self, dir: &Path, name: &str) -> Result<()>;
}
