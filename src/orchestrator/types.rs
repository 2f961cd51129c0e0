//! Types returned by the self-learning orchestrator.

use crate::router::RouterStats;
use crate::store::{SearchResult, Stats};
use crate::types::TrajectoryId;

/// Result of [`super::SelfLearningOrchestrator::search`]: the ranked
/// hits plus a `query_id` the caller passes back to
/// [`super::SelfLearningOrchestrator::record_feedback`] once the
/// results have actually been used.
#[derive(Clone, Debug)]
pub struct SearchOutcome {
    /// Identifies this search for a later `record_feedback` call.
    pub query_id: TrajectoryId,
    /// Ranked search hits, identical to what the underlying store returned.
    pub results: Vec<SearchResult>,
    /// The router's best-matching intent, if any cleared its threshold.
    pub routed_intent: Option<String>,
}

/// Point-in-time snapshot of every learning component, for monitoring.
#[derive(Clone, Debug)]
pub struct HealthReport {
    /// Underlying store statistics.
    pub store_stats: Stats,
    /// Cumulative router statistics.
    pub router_stats: RouterStats,
    /// Number of ids tracked by the access-frequency compressor.
    pub frequency_tracked: usize,
    /// Number of cross-session consolidated patterns.
    pub federation_consolidated_patterns: usize,
    /// Buffered contrastive samples awaiting a training step.
    pub contrastive_buffered_samples: usize,
    /// Ticks completed since this orchestrator was created.
    pub ticks_completed: u64,
}
