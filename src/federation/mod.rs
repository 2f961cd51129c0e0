//! Federated session management and LoRA-style adaptation.
//!
//! Tracks per-agent query sessions ("federated" in the sense that many
//! independent agents each contribute trajectories, without ever
//! sharing their raw embeddings with each other), clusters each
//! session's trajectories into reusable patterns, and consolidates
//! patterns across sessions once they've ended. Also hosts a small
//! registry of low-rank ("LoRA") adaptation matrices that bias
//! embeddings without retraining the whole projection.

pub mod types;

use std::collections::HashMap;
use std::sync::RwLock;

use rand::Rng;
use tracing::info;

use crate::error::{Result, StorageError, ValidationError};
use crate::types::{clamp_quality, SessionUuid, Timestamp};

pub use types::{clamp_rank, LoraAdapter, Pattern, SessionSummary, SessionTrajectory};

const CLUSTER_SIMILARITY_THRESHOLD: f32 = 0.9;
const LORA_SCALE: f32 = 0.1;

struct SessionState {
    agent_id: String,
    trajectories: Vec<SessionTrajectory>,
    started_at: Timestamp,
    warm_start: bool,
    ended: bool,
}

/// Tracks live and consolidated sessions, plus LoRA adapters.
pub struct FederationManager {
    sessions: RwLock<HashMap<SessionUuid, SessionState>>,
    consolidated: RwLock<Vec<Pattern>>,
    adapters: RwLock<HashMap<String, LoraAdapter>>,
    active_adapter: RwLock<Option<String>>,
    consolidation_threshold: f32,
}

impl FederationManager {
    /// Creates a manager. Cross-session consolidation only folds in
    /// trajectories whose quality is at least `consolidation_threshold`.
    pub fn new(consolidation_threshold: f32) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            consolidated: RwLock::new(Vec::new()),
            adapters: RwLock::new(HashMap::new()),
            active_adapter: RwLock::new(None),
            consolidation_threshold,
        }
    }

    /// Begins a new session for `agent_id`. `warm_start` requests that
    /// the caller intends to seed the session from consolidated
    /// cross-session patterns rather than starting cold (tracked for
    /// bookkeeping; the orchestrator decides how to act on it).
    pub fn begin_session(&self, agent_id: &str, warm_start: bool) -> Result<SessionUuid> {
        let id = SessionUuid::new();
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| StorageError::corrupted("federation session map lock poisoned"))?;
        sessions.insert(
            id,
            SessionState {
                agent_id: agent_id.to_string(),
                trajectories: Vec::new(),
                started_at: Timestamp::now(),
                warm_start,
                ended: false,
            },
        );
        Ok(id)
    }

    /// Records a trajectory within a live session.
    pub fn record_trajectory(
        &self,
        session: SessionUuid,
        embedding: Vec<f32>,
        quality: f32,
        route: Option<String>,
    ) -> Result<()> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| StorageError::corrupted("federation session map lock poisoned"))?;
        let state = sessions
            .get_mut(&session)
            .ok_or_else(|| ValidationError::invalid_field("session", "unknown or already-ended session id"))?;
        if state.ended {
            return Err(ValidationError::invalid_field("session", "session has already ended").into());
        }
        state.trajectories.push(SessionTrajectory {
            embedding,
            quality: clamp_quality(quality),
            route,
            recorded_at: Timestamp::now(),
        });
        Ok(())
    }

    /// Ends a session, returning its summary. A session that never
    /// received trajectories still ends cleanly with `avg_quality: 0.0`.
    pub fn end_session(&self, session: SessionUuid) -> Result<SessionSummary> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| StorageError::corrupted("federation session map lock poisoned"))?;
        let state = sessions
            .get_mut(&session)
            .ok_or_else(|| ValidationError::invalid_field("session", "unknown session id"))?;
        state.ended = true;

        let count = state.trajectories.len();
        let avg_quality = if count == 0 {
            0.0
        } else {
            state.trajectories.iter().map(|t| t.quality).sum::<f32>() / count as f32
        };
        let duration = state.started_at.elapsed_ms_since(Timestamp::now());

        Ok(SessionSummary {
            session: Some(session),
            trajectory_count: count,
            avg_quality,
            session_duration_ms: duration,
        })
    }

    /// Clusters a live or ended session's trajectories into up to
    /// `top_k` patterns, ranked by cluster size.
    pub fn get_patterns(&self, session: SessionUuid, top_k: usize) -> Result<Vec<Pattern>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| StorageError::corrupted("federation session map lock poisoned"))?;
        let state = sessions
            .get(&session)
            .ok_or_else(|| ValidationError::invalid_field("session", "unknown session id"))?;
        let mut patterns = cluster(&state.trajectories);
        patterns.sort_by(|a, b| b.count.cmp(&a.count));
        patterns.truncate(top_k.max(1));
        Ok(patterns)
    }

    /// Folds every ended session's above-threshold trajectories into
    /// the cross-session consolidated pattern set. Returns the number
    /// of consolidated patterns after folding.
    pub fn consolidate(&self) -> Result<usize> {
        let qualifying: Vec<SessionTrajectory> = {
            let sessions = self
                .sessions
                .read()
                .map_err(|_| StorageError::corrupted("federation session map lock poisoned"))?;
            sessions
                .values()
                .filter(|s| s.ended)
                .flat_map(|s| s.trajectories.iter().cloned())
                .filter(|t| t.quality >= self.consolidation_threshold)
                .collect()
        };

        let mut consolidated = self
            .consolidated
            .write()
            .map_err(|_| StorageError::corrupted("federation consolidated-pattern lock poisoned"))?;
        let mut all = consolidated.clone();
        all.extend(cluster(&qualifying));
        *consolidated = merge_patterns(all);
        info!(patterns = consolidated.len(), "federation consolidation complete");
        Ok(consolidated.len())
    }

    /// Ends every still-live session without requiring the caller to
    /// name each one. Used on orchestrator shutdown so no session is
    /// left dangling; returns the number of sessions ended.
    pub fn end_all_live_sessions(&self) -> Result<usize> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| StorageError::corrupted("federation session map lock poisoned"))?;
        let mut ended = 0;
        for state in sessions.values_mut() {
            if !state.ended {
                state.ended = true;
                ended += 1;
            }
        }
        Ok(ended)
    }

    /// The current consolidated cross-session pattern set.
    pub fn consolidated_patterns(&self) -> Vec<Pattern> {
        self.consolidated.read().map(|p| p.clone()).unwrap_or_default()
    }

    /// Creates (or replaces) a LoRA adapter of the given rank (clamped
    /// to `[1, 64]`) for `dim`-dimensional embeddings.
    pub fn create_adapter(&self, name: &str, dim: usize, rank: usize) -> Result<()> {
        let rank = clamp_rank(rank);
        let mut rng = rand::thread_rng();
        let scale = 1.0 / (rank as f32).sqrt();
        let a = (0..rank)
            .map(|_| (0..dim).map(|_| rng.gen_range(-scale..scale)).collect())
            .collect();
        let b = (0..dim).map(|_| vec![0.0f32; rank]).collect();

        let mut adapters = self
            .adapters
            .write()
            .map_err(|_| StorageError::corrupted("adapter registry lock poisoned"))?;
        adapters.insert(
            name.to_string(),
            LoraAdapter {
                name: name.to_string(),
                rank,
                a,
                b,
                scale: LORA_SCALE,
            },
        );
        Ok(())
    }

    /// Activates a previously created adapter by name.
    pub fn activate_adapter(&self, name: &str) -> Result<()> {
        let adapters = self
            .adapters
            .read()
            .map_err(|_| StorageError::corrupted("adapter registry lock poisoned"))?;
        if !adapters.contains_key(name) {
            return Err(ValidationError::invalid_field("adapter", "no such adapter").into());
        }
        drop(adapters);
        *self
            .active_adapter
            .write()
            .map_err(|_| StorageError::corrupted("active adapter lock poisoned"))? = Some(name.to_string());
        Ok(())
    }

    /// Deactivates whatever adapter is currently active, if any.
    pub fn deactivate_adapter(&self) -> Result<()> {
        *self
            .active_adapter
            .write()
            .map_err(|_| StorageError::corrupted("active adapter lock poisoned"))? = None;
        Ok(())
    }

    /// Applies the active adapter (if any) to `v`, returning `v`
    /// unchanged when no adapter is active.
    pub fn apply_lora(&self, v: &[f32]) -> Result<Vec<f32>> {
        let active = self
            .active_adapter
            .read()
            .map_err(|_| StorageError::corrupted("active adapter lock poisoned"))?
            .clone();
        let Some(name) = active else {
            return Ok(v.to_vec());
        };
        let adapters = self
            .adapters
            .read()
            .map_err(|_| StorageError::corrupted("adapter registry lock poisoned"))?;
        let Some(adapter) = adapters.get(&name) else {
            return Ok(v.to_vec());
        };

        // down-project: rank-dim vector
        let down: Vec<f32> = adapter.a.iter().map(|row| dot(row, v)).collect();
        // up-project back to embedding dim
        let up: Vec<f32> = adapter.b.iter().map(|row| dot(row, &down)).collect();
        Ok(v.iter().zip(up.iter()).map(|(x, u)| x + adapter.scale * u).collect())
    }

    /// Name of the currently active adapter, if any.
    pub fn active_adapter_name(&self) -> Option<String> {
        self.active_adapter.read().ok().and_then(|a| a.clone())
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let d = dot(a, b);
    let na = dot(a, a).sqrt();
    let nb = dot(b, b).sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        d / (na * nb)
    }
}

/// Greedy single-pass clustering: each trajectory joins the first
/// existing cluster it's similar enough to, else starts a new one.
fn cluster(trajectories: &[SessionTrajectory]) -> Vec<Pattern> {
    let mut patterns: Vec<Pattern> = Vec::new();
    for t in trajectories {
        if let Some(p) = patterns
            .iter_mut()
            .find(|p| cosine(&p.centroid, &t.embedding) >= CLUSTER_SIMILARITY_THRESHOLD)
        {
            let n = p.count as f32;
            for (c, e) in p.centroid.iter_mut().zip(t.embedding.iter()) {
                *c += (*e - *c) / (n + 1.0);
            }
            p.avg_quality = (p.avg_quality * n + t.quality) / (n + 1.0);
            p.count += 1;
        } else {
            patterns.push(Pattern {
                centroid: t.embedding.clone(),
                count: 1,
                avg_quality: t.quality,
            });
        }
    }
    patterns
}

fn merge_patterns(patterns: Vec<Pattern>) -> Vec<Pattern> {
    let mut merged: Vec<Pattern> = Vec::new();
    for p in patterns {
        if let Some(existing) = merged
            .iter_mut()
            .find(|m| cosine(&m.centroid, &p.centroid) >= CLUSTER_SIMILARITY_THRESHOLD)
        {
            let total = (existing.count + p.count) as f32;
            for (c, e) in existing.centroid.iter_mut().zip(p.centroid.iter()) {
                *c = (*c * existing.count as f32 + *e * p.count as f32) / total;
            }
            existing.avg_quality = (existing.avg_quality * existing.count as f32 + p.avg_quality * p.count as f32) / total;
            existing.count += p.count;
        } else {
            merged.push(p);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_lifecycle_summary() {
        let manager = FederationManager::new(0.3);
        let session = manager.begin_session("agent-1", true).unwrap();
        manager.record_trajectory(session, vec![1.0, 0.0], 0.9, Some("greet".into())).unwrap();
        manager.record_trajectory(session, vec![0.9, 0.1], 0.7, None).unwrap();
        let summary = manager.end_session(session).unwrap();
        assert_eq!(summary.trajectory_count, 2);
        assert!((summary.avg_quality - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_record_after_end_rejected() {
        let manager = FederationManager::new(0.3);
        let session = manager.begin_session("agent-1", false).unwrap();
        manager.end_session(session).unwrap();
        let err = manager.record_trajectory(session, vec![1.0], 0.5, None).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_get_patterns_clusters_similar_trajectories() {
        let manager = FederationManager::new(0.3);
        let session = manager.begin_session("agent-1", false).unwrap();
        manager.record_trajectory(session, vec![1.0, 0.0], 0.9, None).unwrap();
        manager.record_trajectory(session, vec![0.99, 0.01], 0.8, None).unwrap();
        manager.record_trajectory(session, vec![0.0, 1.0], 0.6, None).unwrap();
        let patterns = manager.get_patterns(session, 5).unwrap();
        assert_eq!(patterns.len(), 2);
        assert_eq!(patterns[0].count, 2);
    }

    #[test]
    fn test_consolidate_only_folds_above_threshold() {
        let manager = FederationManager::new(0.5);
        let session = manager.begin_session("agent-1", false).unwrap();
        manager.record_trajectory(session, vec![1.0, 0.0], 0.9, None).unwrap();
        manager.record_trajectory(session, vec![0.0, 1.0], 0.2, None).unwrap();
        manager.end_session(session).unwrap();
        manager.consolidate().unwrap();
        let patterns = manager.consolidated_patterns();
        assert_eq!(patterns.len(), 1);
        assert!(patterns[0].avg_quality >= 0.5);
    }

    #[test]
    fn test_lora_adapter_roundtrip() {
        let manager = FederationManager::new(0.3);
        manager.create_adapter("style-a", 4, 2).unwrap();
        manager.activate_adapter("style-a").unwrap();
        let v = vec![1.0, 2.0, 3.0, 4.0];
        // b is zero-initialized, so applying a fresh adapter is a no-op.
        let out = manager.apply_lora(&v).unwrap();
        assert_eq!(out, v);
        manager.deactivate_adapter().unwrap();
        assert!(manager.active_adapter_name().is_none());
    }

    #[test]
    fn test_end_all_live_sessions() {
        let manager = FederationManager::new(0.3);
        let a = manager.begin_session("agent-1", false).unwrap();
        let b = manager.begin_session("agent-2", false).unwrap();
        manager.end_session(a).unwrap();
        let ended = manager.end_all_live_sessions().unwrap();
        assert_eq!(ended, 1);
        let err = manager.record_trajectory(b, vec![1.0], 0.5, None).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_create_adapter_clamps_rank() {
        assert_eq!(clamp_rank(0), 1);
        assert_eq!(clamp_rank(1000), 64);
        assert_eq!(clamp_rank(8), 8);
    }
}
