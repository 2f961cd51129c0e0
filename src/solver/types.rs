//! Types for the adaptive `ef_search` bandit policy.

/// Query-difficulty context bucket, derived from a caller-supplied
/// difficulty/selectivity score in `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Context {
    /// Highly selective query (score > 0.7): few candidates satisfy it.
    Narrow,
    /// Moderately selective query (score > 0.4).
    Medium,
    /// Broad query (score <= 0.4): most candidates are plausible matches.
    Wide,
}

impl Context {
    /// Buckets a difficulty/selectivity score into a context.
    pub fn from_score(score: f32) -> Self {
        if score > 0.7 {
            Context::Narrow
        } else if score > 0.4 {
            Context::Medium
        } else {
            Context::Wide
        }
    }
}

/// The fixed set of `ef_search` values the bandit chooses between.
pub const ARMS: [usize; 4] = [50, 100, 200, 400];

/// Running statistics for one `(context, arm)` cell.
#[derive(Clone, Copy, Debug, Default)]
pub struct CellStats {
    /// Number of times this arm was selected in this context.
    pub attempts: u64,
    /// Number of those selections judged successful.
    pub successes: u64,
    /// Exponential moving average of observed cost (e.g. latency proxy).
    pub cost_ema: f32,
}

impl CellStats {
    /// Acceptance-gated reward estimate: hit rate minus a cost penalty.
    pub fn score(&self) -> f32 {
        if self.attempts == 0 {
            return f32::NEG_INFINITY;
        }
        (self.successes as f32 / self.attempts as f32) - 0.01 * self.cost_ema
    }
}

/// Configuration for one [`super::EfSearchPolicy::acceptance`] run.
#[derive(Clone, Copy, Debug)]
pub struct AcceptanceConfig {
    /// Number of train/evaluate cycles to run.
    pub cycles: usize,
    /// Synthetic holdout episodes evaluated per cycle.
    pub holdout_size: usize,
    /// Synthetic training episodes run before each evaluation.
    pub training_per_cycle: usize,
}

impl Default for AcceptanceConfig {
    fn default() -> Self {
        Self {
            cycles: 3,
            holdout_size: 50,
            training_per_cycle: 100,
        }
    }
}

/// Per-mode holdout evaluation result.
#[derive(Clone, Copy, Debug, Default)]
pub struct ModeResult {
    /// Fraction of holdout episodes judged successful.
    pub accuracy: f32,
    /// Fraction of holdout episodes judged successful when the
    /// success probability is perturbed by synthetic noise, a
    /// robustness proxy.
    pub accuracy_under_noise: f32,
    /// Mean cost across holdout episodes.
    pub avg_cost: f32,
    /// Number of holdout episodes whose cost exceeded the cost budget.
    pub violation_count: u64,
    /// Number of distinct `(context, arm)` cells with at least one
    /// recorded success. Only meaningful for Mode C, which keeps
    /// training online through the holdout.
    pub patterns_distilled: u64,
}

/// Outcome of an acceptance cycle: Mode A is a fixed `ef_search=100`
/// baseline, Mode B is the deterministic score-bucket heuristic, and
/// Mode C is the learned bandit policy, further trained online over
/// the holdout itself. Retention gates on Mode C's performance against
/// both A and B.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptanceReport {
    /// Fixed `ef_search=100` baseline.
    pub mode_a: ModeResult,
    /// Deterministic score-bucket heuristic (narrow/medium/wide).
    pub mode_b: ModeResult,
    /// Learned bandit policy, trained further online during holdout.
    pub mode_c: ModeResult,
    /// Whether Mode C's accuracy is at least Mode A's (within tolerance).
    pub accuracy_maintained: bool,
    /// Whether Mode C incurred no cost-budget violations.
    pub zero_violations: bool,
    /// How many of {accuracy, avg_cost, accuracy_under_noise} improved
    /// for Mode C relative to Mode B.
    pub dimensions_improved: u8,
    /// Whether the learned policy should be retained (gates on all
    /// three criteria above: `accuracy_maintained && zero_violations
    /// && dimensions_improved >= 2`). When `false`, the caller disables
    /// adaptive `ef_search` selection and halves the learning rate.
    pub accepted: bool,
}
