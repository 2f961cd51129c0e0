//! Integration tests for filtered similarity search, soft deletion, and
//! compaction against a live `VectorStore`.

use rvf::search::{CompareOp, Filter};
use rvf::{Config, MetadataValue, SearchOptions, VectorStore};
use std::collections::BTreeMap;
use tempfile::tempdir;

const DIM: usize = 32;

fn make_embedding(seed: u64) -> Vec<f32> {
    (0..DIM).map(|i| (seed as f32 * 0.1 + i as f32 * 0.01).sin()).collect()
}

fn open_store() -> (VectorStore, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.rvf");
    let store = VectorStore::open(&path, Config::new(DIM)).unwrap();
    (store, dir)
}

fn meta(kind: &str) -> BTreeMap<String, MetadataValue> {
    let mut m = BTreeMap::new();
    m.insert("kind".to_string(), MetadataValue::String(kind.to_string()));
    m
}

#[test]
fn test_search_returns_nearest_first() {
    let (store, _dir) = open_store();
    for seed in 0..10u64 {
        store.insert(&format!("v{seed}"), &make_embedding(seed), None).unwrap();
    }

    let query = make_embedding(5);
    let results = store.search(&query, 3, SearchOptions::default()).unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].id, "v5");
    for pair in results.windows(2) {
        assert!(pair[0].similarity >= pair[1].similarity);
    }
}

#[test]
fn test_search_respects_metadata_filter() {
    let (store, _dir) = open_store();
    store.insert("keep-1", &make_embedding(1), Some(meta("keep"))).unwrap();
    store.insert("keep-2", &make_embedding(2), Some(meta("keep"))).unwrap();
    store.insert("drop-1", &make_embedding(3), Some(meta("drop"))).unwrap();

    let filter = Filter::leaf(CompareOp::Eq, "kind", MetadataValue::String("keep".to_string()));

    let mut options = SearchOptions::default();
    options.filter = Some(filter);
    let results = store.search(&make_embedding(1), 10, options).unwrap();

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.id.starts_with("keep")));
}

#[test]
fn test_removed_record_excluded_from_search() {
    let (store, _dir) = open_store();
    store.insert("a", &make_embedding(1), None).unwrap();
    store.insert("b", &make_embedding(2), None).unwrap();

    assert!(store.remove("a").unwrap());
    assert!(!store.remove("a").unwrap(), "removing twice returns false");

    let results = store.search(&make_embedding(1), 10, SearchOptions::default()).unwrap();
    assert!(results.iter().all(|r| r.id != "a"));
}

#[test]
fn test_compact_reclaims_tombstoned_rows() {
    let (store, _dir) = open_store();
    for seed in 0..5u64 {
        store.insert(&format!("v{seed}"), &make_embedding(seed), None).unwrap();
    }
    store.remove("v0").unwrap();
    store.remove("v1").unwrap();

    let stats_before = store.stats().unwrap();
    assert_eq!(stats_before.tombstoned, 2);

    let report = store.compact().unwrap();
    assert_eq!(report.segments_compacted, 2);

    let stats_after = store.stats().unwrap();
    assert_eq!(stats_after.tombstoned, 0);
    assert_eq!(stats_after.count, 3);
}

#[test]
fn test_search_rejects_dimension_mismatch() {
    let (store, _dir) = open_store();
    store.insert("a", &make_embedding(1), None).unwrap();

    let wrong_dim_query = vec![0.0_f32; DIM + 1];
    let err = store.search(&wrong_dim_query, 1, SearchOptions::default()).unwrap_err();
    assert!(err.is_validation());
}

#[test]
fn test_derive_creates_independent_child_store() {
    let (store, dir) = open_store();
    store.insert("a", &make_embedding(1), None).unwrap();

    let child_path = dir.path().join("child.rvf");
    let child = store.derive(&child_path).unwrap();

    assert_eq!(child.lineage_depth().unwrap(), 1);
    let results = child.search(&make_embedding(1), 1, SearchOptions::default()).unwrap();
    assert_eq!(results[0].id, "a");

    // Mutating the parent after derivation must not affect the child.
    store.insert("b", &make_embedding(2), None).unwrap();
    let child_stats = child.stats().unwrap();
    assert_eq!(child_stats.count, 1);
}
