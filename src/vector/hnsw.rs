//! HNSW vector index implementation using `hnsw_rs`.
//!
//! Wraps one of three `hnsw_rs::Hnsw<f32, Dist*>` graphs (selected at
//! construction time by [`Metric`]) with:
//! - Bidirectional caller-id (`String`) <-> internal `usize` mapping
//! - Soft-delete via `HashSet` + filtered search
//! - JSON metadata persistence (`.hnsw.meta`)
//!
//! # Thread Safety
//!
//! The `hnsw_rs::Hnsw` graph uses an internal `RwLock`, so `insert()`
//! takes `&self`. Our id-mapping/deletion state (`IndexState`) is
//! protected by a separate `std::sync::RwLock`.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::RwLock;

use anndists::dist::{DistCosine, DistDot, DistL2};
use hnsw_rs::prelude::*;

use crate::config::HnswConfig;
use crate::error::{RvfError, StorageError, ValidationError};
use crate::error::Result;
use crate::types::Metric;

use super::VectorIndex;

/// Bridges a `&dyn Fn(&usize) -> bool` trait object to `FilterT`.
///
/// `hnsw_rs`'s blanket `impl<F: Fn(&DataId) -> bool> FilterT for F` only
/// covers concrete closure types, not `dyn Fn` trait objects, so this
/// newtype implements `FilterT` by delegating to the wrapped object.
struct FilterBridge<'a>(&'a (dyn Fn(&usize) -> bool + Sync));

impl FilterT for FilterBridge<'_> {
    fn hnsw_filter(&self, id: &DataId) -> bool {
        (self.0)(id)
    }
}

/// The underlying HNSW graph, one variant per supported [`Metric`].
///
/// `hnsw_rs::Hnsw` is generic over its distance type, so a runtime
/// choice of metric needs an enum rather than a single field.
enum HnswBackend {
    Cosine(Hnsw<'static, f32, DistCosine>),
    L2(Hnsw<'static, f32, DistL2>),
    Dot(Hnsw<'static, f32, DistDot>),
}

macro_rules! with_graph {
    ($self:expr, $graph:ident => $body:expr) => {
        match $self {
            HnswBackend::Cosine($graph) => $body,
            HnswBackend::L2($graph) => $body,
            HnswBackend::Dot($graph) => $body,
        }
    };
}

impl HnswBackend {
    fn new(metric: Metric, config: &HnswConfig) -> Self {
        match metric {
            Metric::Cosine => HnswBackend::Cosine(Hnsw::new(
                config.max_nb_connection,
                config.max_elements,
                config.max_layer,
                config.ef_construction,
                DistCosine,
            )),
            Metric::L2 => HnswBackend::L2(Hnsw::new(
                config.max_nb_connection,
                config.max_elements,
                config.max_layer,
                config.ef_construction,
                DistL2,
            )),
            Metric::InnerProduct => HnswBackend::Dot(Hnsw::new(
                config.max_nb_connection,
                config.max_elements,
                config.max_layer,
                config.ef_construction,
                DistDot,
            )),
        }
    }

    fn insert(&self, embedding: &[f32], id: usize) {
        with_graph!(self, g => g.insert((embedding, id)))
    }

    fn parallel_insert(&self, items: &[(&Vec<f32>, usize)]) {
        with_graph!(self, g => g.parallel_insert(items))
    }

    fn search(&self, query: &[f32], k: usize, ef_search: usize) -> Vec<Neighbour> {
        with_graph!(self, g => g.search(query, k, ef_search))
    }

    fn search_filter(
        &self,
        query: &[f32],
        k: usize,
        ef_search: usize,
        filter: &FilterBridge<'_>,
    ) -> Vec<Neighbour> {
        with_graph!(self, g => g.search_filter(query, k, ef_search, Some(filter)))
    }

    fn get_nb_point(&self) -> usize {
        with_graph!(self, g => g.get_nb_point())
    }

    fn file_dump(&self, dir: &Path, name: &str) -> std::result::Result<String, String> {
        with_graph!(self, g => g.file_dump(dir, name))
    }
}

/// HNSW vector index over caller-supplied string ids.
pub struct HnswIndex {
    backend: HnswBackend,
    state: RwLock<IndexState>,
    dimension: usize,
    metric: Metric,
}

/// Internal mutable state for id mapping and soft-deletion.
#[derive(Debug)]
struct IndexState {
    id_to_internal: HashMap<String, usize>,
    internal_to_id: Vec<String>,
    deleted: HashSet<usize>,
    next_id: usize,
}

/// Serializable metadata for persistence.
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct IndexMetadata {
    pub(crate) dimension: usize,
    pub(crate) metric_tag: u8,
    pub(crate) next_id: usize,
    /// `(caller id, internal id)` pairs.
    pub(crate) id_map: Vec<(String, usize)>,
    /// Caller ids that are soft-deleted.
    pub(crate) deleted: Vec<String>,
}

impl HnswIndex {
    /// Creates a new empty HNSW index for the given metric.
    pub fn new(dimension: usize, metric: Metric, config: &HnswConfig) -> Self {
        Self {
            backend: HnswBackend::new(metric, config),
            state: RwLock::new(IndexState {
                id_to_internal: HashMap::new(),
                internal_to_id: Vec::new(),
                deleted: HashSet::new(),
                next_id: 0,
            }),
            dimension,
            metric,
        }
    }

    /// The metric this index was constructed with.
    pub fn metric(&self) -> Metric {
        self.metric
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(RvfError::Validation(ValidationError::dimension_mismatch(
                self.dimension,
                embedding.len(),
            )));
        }
        Ok(())
    }

    /// Inserts a vector under `id`. If `id` is already present this is
    /// a no-op, matching upsert-by-caller-choice semantics; callers
    /// that want to replace a vector must delete then re-insert.
    pub fn insert_record(&self, id: &str, embedding: &[f32]) -> Result<()> {
        self.check_dimension(embedding)?;

        let mut state = self
            .state
            .write()
            .map_err(|_| StorageError::corrupted("vector index state lock poisoned"))?;

        if state.id_to_internal.contains_key(id) {
            return Ok(());
        }

        let internal_id = state.next_id;
        state.next_id += 1;
        state.id_to_internal.insert(id.to_string(), internal_id);
        state.internal_to_id.push(id.to_string());
        drop(state);

        self.backend.insert(embedding, internal_id);
        Ok(())
    }

    /// Marks `id` as deleted. Idempotent; unknown ids are a no-op.
    pub fn delete_record(&self, id: &str) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| StorageError::corrupted("vector index state lock poisoned"))?;
        if let Some(&internal_id) = state.id_to_internal.get(id) {
            state.deleted.insert(internal_id);
        }
        Ok(())
    }

    /// Searches for the k nearest records, excluding tombstoned ids,
    /// additionally restricted to those for which `extra_filter(id)`
    /// returns `true` (pass `|_| true` for no extra restriction).
    pub fn search_records(
        &self,
        query: &[f32],
        k: usize,
        ef_search: usize,
        extra_filter: &(dyn Fn(&str) -> bool + Sync),
    ) -> Result<Vec<(String, f32)>> {
        self.check_dimension(query)?;

        let state = self
            .state
            .read()
            .map_err(|_| StorageError::corrupted("vector index state lock poisoned"))?;

        let deleted_ref = &state.deleted;
        let id_ref = &state.internal_to_id;
        let filter_fn = |internal_id: &usize| -> bool {
            if deleted_ref.contains(internal_id) {
                return false;
            }
            id_ref
                .get(*internal_id)
                .map(|id| extra_filter(id))
                .unwrap_or(false)
        };

        let bridge = FilterBridge(&filter_fn);
        let results = self.backend.search_filter(query, k, ef_search, &bridge);

        let mapped = results
            .into_iter()
            .filter_map(|n| state.internal_to_id.get(n.d_id).map(|id| (id.clone(), n.distance)))
            .collect();

        Ok(mapped)
    }

    /// Returns true if `id` is present and not deleted.
    pub fn contains(&self, id: &str) -> bool {
        let state = self.state.read().ok();
        state.is_some_and(|s| {
            s.id_to_internal
                .get(id)
                .is_some_and(|internal_id| !s.deleted.contains(internal_id))
        })
    }

    /// Number of active (non-deleted) records.
    pub fn active_count(&self) -> usize {
        let state = self.state.read().ok();
        state.map_or(0, |s| s.id_to_internal.len() - s.deleted.len())
    }

    /// Total number of records including tombstoned ones.
    pub fn total_count(&self) -> usize {
        self.backend.get_nb_point()
    }

    /// Rebuilds an index from a set of `(id, embedding)` pairs, as the
    /// store does on open (the segment log, not the graph, is the
    /// source of truth; the graph is a derived structure).
    pub fn rebuild_from_records(
        dimension: usize,
        metric: Metric,
        config: &HnswConfig,
        records: Vec<(String, Vec<f32>)>,
    ) -> Result<Self> {
        let index = Self::new(dimension, metric, config);
        if records.is_empty() {
            return Ok(index);
        }

        let mut state = index
            .state
            .write()
            .map_err(|_| StorageError::corrupted("vector index state lock poisoned"))?;

        let mut batch: Vec<(&Vec<f32>, usize)> = Vec::with_capacity(records.len());
        for (id, embedding) in &records {
            let internal_id = state.next_id;
            state.next_id += 1;
            state.id_to_internal.insert(id.clone(), internal_id);
            state.internal_to_id.push(id.clone());
            batch.push((embedding, internal_id));
        }
        drop(state);

        index.backend.parallel_insert(&batch);
        Ok(index)
    }

    /// Restores a previously-persisted tombstone set by caller id.
    pub fn restore_deleted_set(&self, deleted_ids: &[String]) -> Result<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| StorageError::corrupted("vector index state lock poisoned"))?;
        for id in deleted_ids {
            if let Some(&internal_id) = state.id_to_internal.get(id) {
                state.deleted.insert(internal_id);
            }
        }
        Ok(())
    }

    /// Saves index metadata to `{dir}/{name}.hnsw.meta` and attempts a
    /// graph dump for future direct-load optimization. A dump failure
    /// is non-fatal: the graph is always rebuildable from the segment log.
    pub fn save_to_dir(&self, dir: &Path, name: &str) -> Result<()> {
        fs::create_dir_all(dir).map_err(|e| StorageError::io("create hnsw dir", e))?;

        let state = self
            .state
            .read()
            .map_err(|_| StorageError::corrupted("vector index state lock poisoned"))?;

        let metadata = IndexMetadata {
            dimension: self.dimension,
            metric_tag: self.metric.tag(),
            next_id: state.next_id,
            id_map: state
                .id_to_internal
                .iter()
                .map(|(id, &internal_id)| (id.clone(), internal_id))
                .collect(),
            deleted: state
                .deleted
                .iter()
                .filter_map(|&internal_id| state.internal_to_id.get(internal_id).cloned())
                .collect(),
        };

        let meta_path = dir.join(format!("{}.hnsw.meta", name));
        let json = serde_json::to_string_pretty(&metadata)
            .map_err(|e| StorageError::serialization(e.to_string()))?;
        fs::write(&meta_path, json).map_err(|e| StorageError::io("write hnsw metadata", e))?;

        if state.id_to_internal.is_empty() {
            return Ok(());
        }
        drop(state);

        if let Err(e) = self.backend.file_dump(dir, name) {
            tracing::warn!(error = %e, "HNSW graph dump failed, will rebuild on next open");
        }

        Ok(())
    }

    /// Loads persisted metadata, if any.
    pub(crate) fn load_metadata(dir: &Path, name: &str) -> Result<Option<IndexMetadata>> {
        let meta_path = dir.join(format!("{}.hnsw.meta", name));
        if !meta_path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&meta_path).map_err(|e| StorageError::io("read hnsw metadata", e))?;
        let metadata: IndexMetadata =
            serde_json::from_str(&json).map_err(|e| StorageError::serialization(e.to_string()))?;
        Ok(Some(metadata))
    }

    /// Removes persisted index files for `name` from `dir`.
    pub fn remove_files(dir: &Path, name: &str) -> Result<()> {
        let meta_path = dir.join(format!("{}.hnsw.meta", name));
        if meta_path.exists() {
            fs::remove_file(&meta_path).map_err(|e| StorageError::io("remove hnsw metadata", e))?;
        }
        if let Ok(entries) = fs::read_dir(dir) {
            for entry in entries.flatten() {
                let file_name = entry.file_name();
                let file_str = file_name.to_string_lossy();
                if file_str.starts_with(name) && file_str.contains("hnswdump") {
                    let _ = fs::remove_file(entry.path());
                }
            }
        }
        Ok(())
    }
}

impl VectorIndex for HnswIndex {
    fn insert(&self, id: &str, embedding: &[f32]) -> Result<()> {
        self.insert_record(id, embedding)
    }

    fn insert_batch(&self, items: &[(String, Vec<f32>)]) -> Result<()> {
        for (id, embedding) in items {
            self.insert_record(id, embedding)?;
        }
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize, ef_search: usize) -> Result<Vec<(String, f32)>> {
        self.search_records(query, k, ef_search, &|_| true)
    }

    fn search_filtered(
        &self,
        query: &[f32],
        k: usize,
        ef_search: usize,
        filter: &(dyn Fn(&str) -> bool + Sync),
    ) -> Result<Vec<(String, f32)>> {
        self.search_records(query, k, ef_search, filter)
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.delete_record(id)
    }

    fn is_deleted(&self, id: &str) -> bool {
        self.state.read().ok().is_some_and(|s| {
            s.id_to_internal
                .get(id)
                .is_some_and(|internal_id| s.deleted.contains(internal_id))
        })
    }

    fn len(&self) -> usize {
        self.active_count()
    }

    fn save(&self, dir: &Path, name: &str) -> Result<()> {
        self.save_to_dir(dir, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> HnswConfig {
        HnswConfig {
            max_nb_connection: 16,
            ef_construction: 100,
            ef_search: 50,
            max_layer: 8,
            max_elements: 1000,
        }
    }

    fn make_embedding(seed: u64, dim: usize) -> Vec<f32> {
        (0..dim)
            .map(|i| (seed as f32 * 0.1 + i as f32 * 0.01).sin())
            .collect()
    }

    #[test]
    fn test_new_index_is_empty() {
        let index = HnswIndex::new(384, Metric::Cosine, &test_config());
        assert_eq!(index.active_count(), 0);
        assert_eq!(index.total_count(), 0);
    }

    #[test]
    fn test_insert_and_search() {
        let dim = 8;
        let index = HnswIndex::new(dim, Metric::Cosine, &test_config());

        for i in 0..10u64 {
            let embedding = make_embedding(i, dim);
            index.insert_record(&format!("vec-{i}"), &embedding).unwrap();
        }

        assert_eq!(index.active_count(), 10);

        let query = make_embedding(5, dim);
        let results = index.search(&query, 3, 50).unwrap();
        assert!(!results.is_empty());
        assert!(results.len() <= 3);
        for w in results.windows(2) {
            assert!(w[0].1 <= w[1].1);
        }
    }

    #[test]
    fn test_insert_idempotent() {
        let dim = 4;
        let index = HnswIndex::new(dim, Metric::Cosine, &test_config());
        let embedding = make_embedding(1, dim);
        index.insert_record("a", &embedding).unwrap();
        index.insert_record("a", &embedding).unwrap();
        assert_eq!(index.active_count(), 1);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let index = HnswIndex::new(384, Metric::Cosine, &test_config());
        let wrong_dim = vec![1.0f32; 128];
        let result = index.insert_record("a", &wrong_dim);
        assert!(result.is_err());
        assert!(result.unwrap_err().is_validation());
    }

    #[test]
    fn test_delete_excludes_from_search() {
        let dim = 8;
        let index = HnswIndex::new(dim, Metric::Cosine, &test_config());
        let mut ids = Vec::new();
        for i in 0..5u64 {
            let id = format!("vec-{i}");
            index.insert_record(&id, &make_embedding(i, dim)).unwrap();
            ids.push(id);
        }
        assert_eq!(index.active_count(), 5);

        index.delete_record(&ids[0]).unwrap();
        assert_eq!(index.active_count(), 4);
        assert!(!index.contains(&ids[0]));
        assert!(index.contains(&ids[1]));

        let query = make_embedding(0, dim);
        let results = index.search(&query, 10, 50).unwrap();
        assert!(!results.iter().any(|(id, _)| id == &ids[0]));
    }

    #[test]
    fn test_search_filtered_applies_extra_predicate() {
        let dim = 4;
        let index = HnswIndex::new(dim, Metric::Cosine, &test_config());
        for i in 0..5u64 {
            index
                .insert_record(&format!("vec-{i}"), &make_embedding(i, dim))
                .unwrap();
        }
        let results = index
            .search_filtered(&make_embedding(0, dim), 5, 50, &|id| id == "vec-3")
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "vec-3");
    }

    #[test]
    fn test_rebuild_from_records() {
        let dim = 8;
        let records: Vec<(String, Vec<f32>)> = (0..20u64)
            .map(|i| (format!("vec-{i}"), make_embedding(i, dim)))
            .collect();
        let index =
            HnswIndex::rebuild_from_records(dim, Metric::Cosine, &test_config(), records).unwrap();
        assert_eq!(index.active_count(), 20);
        let query = make_embedding(10, dim);
        let results = index.search(&query, 5, 50).unwrap();
        assert!(!results.is_empty());
    }

    #[test]
    fn test_l2_metric_roundtrip() {
        let dim = 4;
        let index = HnswIndex::new(dim, Metric::L2, &test_config());
        let embedding = make_embedding(42, dim);
        index.insert_record("a", &embedding).unwrap();
        let results = index.search(&embedding, 1, 50).unwrap();
        assert_eq!(results[0].0, "a");
        assert!(results[0].1 < 0.001);
    }

    #[test]
    fn test_save_and_load_metadata_roundtrip() {
        let dim = 4;
        let index = HnswIndex::new(dim, Metric::Cosine, &test_config());
        let mut ids = Vec::new();
        for i in 0..5u64 {
            let id = format!("vec-{i}");
            index.insert_record(&id, &make_embedding(i, dim)).unwrap();
            ids.push(id);
        }
        index.delete_record(&ids[2]).unwrap();

        let dir = tempfile::tempdir().unwrap();
        index.save_to_dir(dir.path(), "test_store").unwrap();

        let metadata = HnswIndex::load_metadata(dir.path(), "test_store")
            .unwrap()
            .expect("metadata should exist");
        assert_eq!(metadata.dimension, dim);
        assert_eq!(metadata.next_id, 5);
        assert_eq!(metadata.id_map.len(), 5);
        assert_eq!(metadata.deleted, vec![ids[2].clone()]);
    }

    #[test]
    fn test_remove_files() {
        let dim = 4;
        let index = HnswIndex::new(dim, Metric::Cosine, &test_config());
        index.insert_record("a", &make_embedding(1, dim)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        index.save_to_dir(dir.path(), "test_store").unwrap();
        let meta_path = dir.path().join("test_store.hnsw.meta");
        assert!(meta_path.exists());
        HnswIndex::remove_files(dir.path(), "test_store").unwrap();
        assert!(!meta_path.exists());
    }
}
