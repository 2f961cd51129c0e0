//! Types for federated session tracking and LoRA adapters.

use crate::types::{SessionUuid, Timestamp};

/// One recorded interaction within a session: an embedding, the
/// caller-reported quality of the outcome, and the route (if any) that
/// produced it.
#[derive(Clone, Debug)]
pub struct SessionTrajectory {
    /// The query or result embedding this trajectory recorded.
    pub embedding: Vec<f32>,
    /// Caller-reported quality in `[0, 1]`.
    pub quality: f32,
    /// Router intent name that handled this query, if routed.
    pub route: Option<String>,
    /// When this trajectory was recorded.
    pub recorded_at: Timestamp,
}

/// Summary returned when a session ends.
#[derive(Clone, Copy, Debug, Default)]
pub struct SessionSummary {
    /// Session identifier.
    pub session: Option<SessionUuid>,
    /// Number of trajectories recorded during the session.
    pub trajectory_count: usize,
    /// Mean quality across all recorded trajectories.
    pub avg_quality: f32,
    /// Wall-clock session duration.
    pub session_duration_ms: u64,
}

/// A cluster of similar trajectories, used both for a single session's
/// `get_patterns` and for cross-session `consolidate`.
#[derive(Clone, Debug)]
pub struct Pattern {
    /// Cluster centroid embedding.
    pub centroid: Vec<f32>,
    /// Number of trajectories folded into this cluster.
    pub count: usize,
    /// Mean quality of folded trajectories.
    pub avg_quality: f32,
}

/// A low-rank adaptation head: `output = input + scale * B(A(input))`.
pub struct LoraAdapter {
    pub(super) name: String,
    pub(super) rank: usize,
    /// `rank x dim`
    pub(super) a: Vec<Vec<f32>>,
    /// `dim x rank`
    pub(super) b: Vec<Vec<f32>>,
    pub(super) scale: f32,
}

/// Clamps a requested LoRA rank into the supported range `[1, 64]`.
pub fn clamp_rank(rank: usize) -> usize {
    rank.clamp(1, 64)
}
