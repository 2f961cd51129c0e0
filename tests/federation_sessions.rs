//! Integration tests for `FederationManager` session tracking,
//! cross-session pattern consolidation, and LoRA adapter activation.

use rvf::FederationManager;

fn embedding(bias: f32, dim: usize) -> Vec<f32> {
    (0..dim).map(|i| if i == 0 { bias } else { 0.01 }).collect()
}

#[test]
fn test_session_lifecycle_tracks_trajectories_and_quality() {
    let manager = FederationManager::new(0.9);
    let session = manager.begin_session("agent-1", false).unwrap();

    manager.record_trajectory(session, embedding(1.0, 8), 0.8, Some("billing".into())).unwrap();
    manager.record_trajectory(session, embedding(1.0, 8), 0.6, None).unwrap();

    let summary = manager.end_session(session).unwrap();
    assert_eq!(summary.trajectory_count, 2);
    assert!((summary.avg_quality - 0.7).abs() < 1e-6);
}

#[test]
fn test_record_trajectory_after_end_session_fails() {
    let manager = FederationManager::new(0.9);
    let session = manager.begin_session("agent-1", false).unwrap();
    manager.end_session(session).unwrap();

    let err = manager.record_trajectory(session, embedding(1.0, 8), 0.5, None).unwrap_err();
    assert!(err.is_validation());
}

#[test]
fn test_get_patterns_clusters_similar_trajectories() {
    let manager = FederationManager::new(0.9);
    let session = manager.begin_session("agent-1", false).unwrap();

    for _ in 0..3 {
        manager.record_trajectory(session, embedding(1.0, 8), 0.9, None).unwrap();
    }
    manager.record_trajectory(session, embedding(-1.0, 8), 0.9, None).unwrap();

    let patterns = manager.get_patterns(session, 10).unwrap();
    assert_eq!(patterns.len(), 2);
    assert!(patterns.iter().any(|p| p.count == 3));
}

#[test]
fn test_consolidate_merges_patterns_across_sessions() {
    let manager = FederationManager::new(0.9);
    let s1 = manager.begin_session("agent-1", false).unwrap();
    let s2 = manager.begin_session("agent-2", false).unwrap();

    for _ in 0..2 {
        manager.record_trajectory(s1, embedding(1.0, 8), 0.9, None).unwrap();
        manager.record_trajectory(s2, embedding(1.0, 8), 0.9, None).unwrap();
    }
    manager.end_session(s1).unwrap();
    manager.end_session(s2).unwrap();

    let merged = manager.consolidate().unwrap();
    assert!(merged >= 1);
    assert!(!manager.consolidated_patterns().is_empty());
}

#[test]
fn test_end_all_live_sessions_ends_only_open_ones() {
    let manager = FederationManager::new(0.9);
    let s1 = manager.begin_session("agent-1", false).unwrap();
    let s2 = manager.begin_session("agent-2", false).unwrap();
    manager.end_session(s1).unwrap();

    let ended = manager.end_all_live_sessions().unwrap();
    assert_eq!(ended, 1, "only the still-open session should be counted");

    let err = manager.record_trajectory(s2, embedding(1.0, 8), 0.5, None).unwrap_err();
    assert!(err.is_validation());
}

#[test]
fn test_fresh_adapter_is_a_no_op_until_trained() {
    let manager = FederationManager::new(0.9);
    manager.create_adapter("style-a", 8, 4).unwrap();
    manager.activate_adapter("style-a").unwrap();

    let input = embedding(1.0, 8);
    let output = manager.apply_lora(&input).unwrap();
    assert_eq!(output, input, "zero-initialized B must make a fresh adapter a no-op");
}

#[test]
fn test_deactivate_adapter_restores_identity_passthrough() {
    let manager = FederationManager::new(0.9);
    manager.create_adapter("style-a", 8, 4).unwrap();
    manager.activate_adapter("style-a").unwrap();
    assert_eq!(manager.active_adapter_name().as_deref(), Some("style-a"));

    manager.deactivate_adapter().unwrap();
    assert!(manager.active_adapter_name().is_none());

    let input = embedding(1.0, 8);
    assert_eq!(manager.apply_lora(&input).unwrap(), input);
}
