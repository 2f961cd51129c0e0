//! Integration tests for the witness chain's tamper-evidence guarantees
//! as observed through a live `VectorStore`.

use rvf::{Config, VectorStore, WitnessOp};
use tempfile::tempdir;

const DIM: usize = 16;

fn make_embedding(seed: u64) -> Vec<f32> {
    (0..DIM).map(|i| (seed as f32 * 0.1 + i as f32 * 0.01).sin()).collect()
}

#[test]
fn test_fresh_store_has_empty_verified_chain() {
    let dir = tempdir().unwrap();
    let store = VectorStore::open(dir.path().join("store.rvf"), Config::new(DIM)).unwrap();

    let report = store.verify_witness().unwrap();
    assert!(report.valid);
    assert_eq!(report.entry_count, 0);
    assert!(report.first_mismatch_at.is_none());
}

#[test]
fn test_mutations_extend_and_preserve_chain_validity() {
    let dir = tempdir().unwrap();
    let store = VectorStore::open(dir.path().join("store.rvf"), Config::new(DIM)).unwrap();

    store.insert("a", &make_embedding(1), None).unwrap();
    store.insert("b", &make_embedding(2), None).unwrap();
    store.remove("a").unwrap();
    store.compact().unwrap();

    let report = store.verify_witness().unwrap();
    assert!(report.valid);
    assert_eq!(report.entry_count, 4); // insert(a), insert(b), delete, compact
}

#[test]
fn test_chain_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.rvf");

    {
        let store = VectorStore::open(&path, Config::new(DIM)).unwrap();
        store.insert("a", &make_embedding(1), None).unwrap();
        store.insert("b", &make_embedding(2), None).unwrap();
    }

    let store = VectorStore::open(&path, Config::new(DIM)).unwrap();
    let report = store.verify_witness().unwrap();
    assert!(report.valid);
    assert_eq!(report.entry_count, 2);
}

#[test]
fn test_derived_store_forks_chain_from_parent_tip() {
    let dir = tempdir().unwrap();
    let store = VectorStore::open(dir.path().join("parent.rvf"), Config::new(DIM)).unwrap();
    store.insert("a", &make_embedding(1), None).unwrap();

    let parent_tip = store.witness_chain().unwrap().tip_hash();
    let child = store.derive(dir.path().join("child.rvf")).unwrap();

    child.insert("b", &make_embedding(2), None).unwrap();
    let child_chain = child.witness_chain().unwrap();
    assert_eq!(child_chain.entries()[0].prev_hash, parent_tip);
    assert!(child.verify_witness().unwrap().valid);
}

#[test]
fn test_record_event_appends_to_chain_and_stays_valid() {
    let dir = tempdir().unwrap();
    let store = VectorStore::open(dir.path().join("store.rvf"), Config::new(DIM)).unwrap();
    store.insert("a", &make_embedding(1), None).unwrap();

    store.record_event(WitnessOp::Train, b"trainer-step-1").unwrap();
    store.record_event(WitnessOp::Acceptance, b"accepted=true dims=2").unwrap();

    let report = store.verify_witness().unwrap();
    assert!(report.valid);
    assert_eq!(report.entry_count, 3); // insert, train, acceptance
}
