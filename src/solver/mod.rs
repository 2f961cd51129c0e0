//! Adaptive `ef_search` bandit policy.
//!
//! [`EfSearchPolicy`] picks the HNSW `ef_search` candidate-list size per
//! query from a fixed arm set (see [`types::ARMS`]), stratified by a
//! caller-supplied difficulty [`types::Context`]. Each `(context, arm)`
//! cell tracks attempts, successes, and an exponential moving average
//! of cost; [`EfSearchPolicy::select_arm`] picks the arm maximizing a
//! simple hit-rate-minus-cost-penalty score, falling back to a
//! deterministic score-bucket heuristic for a context with no recorded
//! outcomes at all. [`EfSearchPolicy::train`] runs synthetic episodes
//! to warm the table; [`EfSearchPolicy::acceptance`] runs a held-out
//! A/B/C comparison gating whether the learned policy should stay in
//! control of live search, toggling an internal enable flag and
//! learning rate that [`EfSearchPolicy::effective_arm`] and
//! [`EfSearchPolicy::record_outcome`] honor. The orchestrator is
//! responsible for recording the outcome of an acceptance cycle into
//! the witness chain — this module has no I/O of its own.

pub mod types;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use tracing::{debug, info};

use crate::error::{Result, StorageError};

pub use types::{AcceptanceConfig, AcceptanceReport, CellStats, Context, ModeResult, ARMS};

/// Fixed `ef_search` used for Mode A's baseline in an acceptance cycle.
const BASELINE_ARM: usize = 100;

/// Initial (and post-acceptance reset) learning rate for the cost EMA.
const DEFAULT_LEARNING_RATE: f32 = 0.1;

/// Floor the learning rate never drops below, however many consecutive
/// rejections occur.
const MIN_LEARNING_RATE: f32 = 0.001;

/// Summary of a synthetic training run.
#[derive(Clone, Copy, Debug, Default)]
pub struct TrainSummary {
    /// Number of synthetic episodes run.
    pub episodes: usize,
    /// Fraction of episodes judged successful.
    pub success_rate: f32,
}

/// Context-stratified multi-armed bandit over `ef_search` values.
pub struct EfSearchPolicy {
    arms: [usize; 4],
    table: RwLock<HashMap<(ContextKey, usize), CellStats>>,
    /// Whether live search should use the learned policy at all. Set
    /// to `false` by a rejected [`EfSearchPolicy::acceptance`] cycle
    /// until a later cycle is accepted.
    adaptive_enabled: AtomicBool,
    /// Current learning rate for the cost EMA in [`Self::record_outcome`].
    /// Halved on each rejected acceptance cycle, reset on acceptance.
    learning_rate: RwLock<f32>,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum ContextKey {
    Narrow,
    Medium,
    Wide,
}

impl From<Context> for ContextKey {
    fn from(c: Context) -> Self {
        match c {
            Context::Narrow => ContextKey::Narrow,
            Context::Medium => ContextKey::Medium,
            Context::Wide => ContextKey::Wide,
        }
    }
}

/// The deterministic score-bucket heuristic: the fallback `ef_search`
/// for a context with no learned signal, and Mode B's policy in an
/// acceptance cycle.
fn heuristic_arm(context: Context) -> usize {
    match context {
        Context::Narrow => 50,
        Context::Medium => 100,
        Context::Wide => 400,
    }
}

impl EfSearchPolicy {
    /// Creates a policy over the given arm set (normally
    /// [`crate::config::Config::ef_search_arms`]). Starts with adaptive
    /// search enabled and the default learning rate.
    pub fn new(arms: [usize; 4]) -> Self {
        Self {
            arms,
            table: RwLock::new(HashMap::new()),
            adaptive_enabled: AtomicBool::new(true),
            learning_rate: RwLock::new(DEFAULT_LEARNING_RATE),
        }
    }

    /// Whether the learned policy currently controls `ef_search`
    /// selection. `false` after a rejected acceptance cycle.
    pub fn is_adaptive_enabled(&self) -> bool {
        self.adaptive_enabled.load(Ordering::SeqCst)
    }

    /// Current learning rate used by [`Self::record_outcome`]'s cost EMA.
    pub fn learning_rate(&self) -> Result<f32> {
        let lr = self
            .learning_rate
            .read()
            .map_err(|_| StorageError::corrupted("solver learning rate lock poisoned"))?;
        Ok(*lr)
    }

    fn halve_learning_rate(&self) -> Result<()> {
        let mut lr = self
            .learning_rate
            .write()
            .map_err(|_| StorageError::corrupted("solver learning rate lock poisoned"))?;
        *lr = (*lr * 0.5).max(MIN_LEARNING_RATE);
        Ok(())
    }

    fn reset_learning_rate(&self) -> Result<()> {
        let mut lr = self
            .learning_rate
            .write()
            .map_err(|_| StorageError::corrupted("solver learning rate lock poisoned"))?;
        *lr = DEFAULT_LEARNING_RATE;
        Ok(())
    }

    /// Selects an `ef_search` value for the given context, honoring the
    /// adaptive-search enable flag: when disabled (a prior acceptance
    /// cycle was rejected), falls back to the deterministic heuristic
    /// instead of consulting the learned table at all.
    pub fn effective_arm(&self, context: Context) -> Result<usize> {
        if self.is_adaptive_enabled() {
            self.select_arm(context)
        } else {
            Ok(heuristic_arm(context))
        }
    }

    /// Selects an `ef_search` value for the given context from the
    /// learned table. A context with no recorded outcomes at all falls
    /// back to the deterministic score-bucket heuristic rather than
    /// exploring arms in a fixed round-robin order; once the context
    /// has at least one outcome, unexplored cells are preferred over
    /// scored ones, in arm order, so every arm still gets tried at
    /// least once per context before exploitation begins.
    pub fn select_arm(&self, context: Context) -> Result<usize> {
        let table = self
            .table
            .read()
            .map_err(|_| StorageError::corrupted("solver table lock poisoned"))?;
        let key: ContextKey = context.into();

        let context_is_cold = self.arms.iter().all(|arm| table.get(&(key, *arm)).is_none());
        if context_is_cold {
            return Ok(heuristic_arm(context));
        }

        for arm in self.arms {
            if table.get(&(key, arm)).map(|c| c.attempts).unwrap_or(0) == 0 {
                return Ok(arm);
            }
        }

        let mut best_arm = self.arms[0];
        let mut best_score = f32::NEG_INFINITY;
        for arm in self.arms {
            let score = table.get(&(key, arm)).map(|c| c.score()).unwrap_or(f32::NEG_INFINITY);
            if score > best_score {
                best_score = score;
                best_arm = arm;
            }
        }
        Ok(best_arm)
    }

    /// Records the outcome of a query answered with `arm` under
    /// `context`: whether it was judged successful, and its observed
    /// cost (e.g. a latency or candidate-count proxy). The cost EMA
    /// uses the current learning rate, which a rejected acceptance
    /// cycle may have halved.
    pub fn record_outcome(&self, context: Context, arm: usize, success: bool, cost: f32) -> Result<()> {
        let alpha = self.learning_rate()?;
        let mut table = self
            .table
            .write()
            .map_err(|_| StorageError::corrupted("solver table lock poisoned"))?;
        let key: ContextKey = context.into();
        let cell = table.entry((key, arm)).or_insert_with(CellStats::default);
        cell.attempts += 1;
        if success {
            cell.successes += 1;
        }
        cell.cost_ema = if cell.attempts == 1 {
            cost
        } else {
            alpha * cost + (1.0 - alpha) * cell.cost_ema
        };
        Ok(())
    }

    /// Current stats for a `(context, arm)` cell, if any outcomes have
    /// been recorded.
    pub fn cell(&self, context: Context, arm: usize) -> Option<CellStats> {
        let table = self.table.read().ok()?;
        table.get(&(context.into(), arm)).copied()
    }

    fn distinct_successful_cells(&self) -> Result<u64> {
        let table = self
            .table
            .read()
            .map_err(|_| StorageError::corrupted("solver table lock poisoned"))?;
        Ok(table.values().filter(|c| c.successes > 0).count() as u64)
    }

    /// Runs `count` synthetic training episodes with difficulty sampled
    /// uniformly from `[min_difficulty, max_difficulty]`. An episode's
    /// outcome is simulated: larger arms succeed more reliably on
    /// harder (higher-difficulty) contexts but cost proportionally
    /// more. `seed` makes the run reproducible; `None` uses entropy.
    pub fn train(
        &self,
        count: usize,
        min_difficulty: f32,
        max_difficulty: f32,
        seed: Option<u64>,
    ) -> Result<TrainSummary> {
        let mut rng: Box<dyn RngCore> = match seed {
            Some(s) => Box::new(StdRng::seed_from_u64(s)),
            None => Box::new(StdRng::from_entropy()),
        };

        let mut successes = 0usize;
        for _ in 0..count {
            let difficulty = rng.gen_range(min_difficulty.min(max_difficulty)..=min_difficulty.max(max_difficulty));
            let context = Context::from_score(difficulty);
            let arm = self.select_arm(context)?;
            let (success, cost) = simulate_episode(arm, difficulty, &mut *rng);
            self.record_outcome(context, arm, success, cost)?;
            if success {
                successes += 1;
            }
        }

        let summary = TrainSummary {
            episodes: count,
            success_rate: if count == 0 { 0.0 } else { successes as f32 / count as f32 },
        };
        debug!(episodes = summary.episodes, success_rate = summary.success_rate, "solver train");
        Ok(summary)
    }

    /// Runs an acceptance cycle: `config.cycles` rounds of training
    /// (`config.training_per_cycle` episodes each) to warm the table,
    /// followed by a `config.holdout_size`-episode evaluation of three
    /// modes — a fixed `ef_search=100` baseline (Mode A), the
    /// deterministic score-bucket heuristic (Mode B), and the learned
    /// policy (Mode C), which keeps training online on every holdout
    /// episode. Each mode's accuracy, noise-perturbed accuracy, average
    /// cost, and cost-budget violation count are measured; Mode C also
    /// reports how many distinct `(context, arm)` cells it has
    /// distilled a success pattern for.
    ///
    /// Retention gates on Mode C: `accuracy_maintained` compares its
    /// accuracy to Mode A's, `zero_violations` requires no budget
    /// violations of its own, and `dimensions_improved` counts how many
    /// of {accuracy, avg_cost, accuracy_under_noise} beat Mode B.
    /// Acceptance enables adaptive search and resets the learning rate;
    /// rejection disables it (routing `effective_arm` through the
    /// heuristic) and halves the learning rate.
    pub fn acceptance(&self, config: AcceptanceConfig, seed: Option<u64>) -> Result<AcceptanceReport> {
        let mut rng: Box<dyn RngCore> = match seed {
            Some(s) => Box::new(StdRng::seed_from_u64(s)),
            None => Box::new(StdRng::from_entropy()),
        };

        for _ in 0..config.cycles {
            self.train(config.training_per_cycle, 0.0, 1.0, seed)?;
        }

        let cost_budget = (BASELINE_ARM as f32 / 50.0) * 1.5;

        let mut mode_a = ModeResult::default();
        let mut mode_b = ModeResult::default();
        let mut mode_c = ModeResult::default();
        let (mut a_ok, mut b_ok, mut c_ok) = (0u64, 0u64, 0u64);
        let (mut a_noisy_ok, mut b_noisy_ok, mut c_noisy_ok) = (0u64, 0u64, 0u64);

        for _ in 0..config.holdout_size {
            let difficulty: f32 = rng.gen_range(0.0..=1.0);
            let context = Context::from_score(difficulty);

            let (success_a, cost_a) = simulate_episode(BASELINE_ARM, difficulty, &mut *rng);
            let (noisy_a, _) = simulate_episode_noisy(BASELINE_ARM, difficulty, &mut *rng);
            a_ok += success_a as u64;
            a_noisy_ok += noisy_a as u64;
            mode_a.avg_cost += cost_a;
            if cost_a > cost_budget {
                mode_a.violation_count += 1;
            }

            let arm_b = heuristic_arm(context);
            let (success_b, cost_b) = simulate_episode(arm_b, difficulty, &mut *rng);
            let (noisy_b, _) = simulate_episode_noisy(arm_b, difficulty, &mut *rng);
            b_ok += success_b as u64;
            b_noisy_ok += noisy_b as u64;
            mode_b.avg_cost += cost_b;
            if cost_b > cost_budget {
                mode_b.violation_count += 1;
            }

            let arm_c = self.select_arm(context)?;
            let (success_c, cost_c) = simulate_episode(arm_c, difficulty, &mut *rng);
            let (noisy_c, _) = simulate_episode_noisy(arm_c, difficulty, &mut *rng);
            self.record_outcome(context, arm_c, success_c, cost_c)?;
            c_ok += success_c as u64;
            c_noisy_ok += noisy_c as u64;
            mode_c.avg_cost += cost_c;
            if cost_c > cost_budget {
                mode_c.violation_count += 1;
            }
        }

        let n = config.holdout_size.max(1) as f32;
        mode_a.accuracy = a_ok as f32 / n;
        mode_a.accuracy_under_noise = a_noisy_ok as f32 / n;
        mode_a.avg_cost /= n;

        mode_b.accuracy = b_ok as f32 / n;
        mode_b.accuracy_under_noise = b_noisy_ok as f32 / n;
        mode_b.avg_cost /= n;

        mode_c.accuracy = c_ok as f32 / n;
        mode_c.accuracy_under_noise = c_noisy_ok as f32 / n;
        mode_c.avg_cost /= n;
        mode_c.patterns_distilled = self.distinct_successful_cells()?;

        let accuracy_maintained = mode_c.accuracy >= mode_a.accuracy - 0.02;
        let zero_violations = mode_c.violation_count == 0;

        let mut dimensions_improved = 0u8;
        if mode_c.accuracy > mode_b.accuracy {
            dimensions_improved += 1;
        }
        if mode_c.avg_cost < mode_b.avg_cost {
            dimensions_improved += 1;
        }
        if mode_c.accuracy_under_noise > mode_b.accuracy_under_noise {
            dimensions_improved += 1;
        }

        let accepted = accuracy_maintained && zero_violations && dimensions_improved >= 2;

        if accepted {
            self.adaptive_enabled.store(true, Ordering::SeqCst);
            self.reset_learning_rate()?;
        } else {
            self.adaptive_enabled.store(false, Ordering::SeqCst);
            self.halve_learning_rate()?;
        }

        let report = AcceptanceReport {
            mode_a,
            mode_b,
            mode_c,
            accuracy_maintained,
            zero_violations,
            dimensions_improved,
            accepted,
        };
        info!(
            accepted = report.accepted,
            dimensions_improved = report.dimensions_improved,
            adaptive_enabled = accepted,
            "solver acceptance cycle"
        );
        Ok(report)
    }
}

/// Simulates a single episode's outcome for a given arm and difficulty.
/// Larger `ef_search` values succeed more often as difficulty rises,
/// at proportionally higher cost; this is a synthetic stand-in for an
/// actual measured recall/latency tradeoff.
fn simulate_episode(arm: usize, difficulty: f32, rng: &mut dyn RngCore) -> (bool, f32) {
    let capacity = arm as f32 / 400.0;
    let success_prob = (capacity - difficulty * 0.5 + 0.3).clamp(0.0, 1.0);
    let success = rng.gen_range(0.0..1.0) < success_prob;
    let cost = arm as f32 / 50.0;
    (success, cost)
}

/// Same as [`simulate_episode`] but perturbs the success probability
/// with symmetric noise, simulating recall measured under a noisier
/// holdout distribution. Used for the `accuracy_under_noise` dimension.
fn simulate_episode_noisy(arm: usize, difficulty: f32, rng: &mut dyn RngCore) -> (bool, f32) {
    let capacity = arm as f32 / 400.0;
    let noise = rng.gen_range(-0.2f32..0.2);
    let success_prob = (capacity - difficulty * 0.5 + 0.3 + noise).clamp(0.0, 1.0);
    let success = rng.gen_range(0.0..1.0) < success_prob;
    let cost = arm as f32 / 50.0;
    (success, cost)
}
