//! The self-learning orchestrator.
//!
//! [`SelfLearningOrchestrator`] wraps a [`VectorStore`] with the
//! learning components built on top of it: a [`QueryRouter`] for
//! intent classification, a [`ContrastiveTrainer`] that biases queries
//! toward embeddings the caller has rated well, an
//! [`AccessFrequencyCompressor`] tracking popularity, a
//! [`FederationManager`] for per-agent session bookkeeping, and an
//! [`EfSearchPolicy`] bandit picking `ef_search` per query. `tick()`
//! drives the periodic housekeeping (training steps, decay, pruning,
//! acceptance cycles); `search`/`insert`/`remove` mirror the store's own
//! API while wiring query outcomes through the learning components.
//!
//! Learning-component failures never block a storage operation: they
//! are logged and swallowed, so a broken trainer or router degrades the
//! orchestrator's adaptiveness without ever losing a write or a search
//! result. Validation errors from the store itself still propagate.

pub mod types;

use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::{info, warn};

use crate::config::{Config, LearningConfig};
use crate::contrastive::{ContrastiveSample, ContrastiveTrainer};
use crate::error::{LifecycleError, Result, StorageError, ValidationError};
use crate::federation::{FederationManager, SessionSummary};
use crate::frequency::AccessFrequencyCompressor;
use crate::router::QueryRouter;
use crate::solver::{AcceptanceConfig, Context, EfSearchPolicy};
use crate::store::{SearchOptions, VectorStore};
use crate::types::{clamp_quality, Metadata, SessionUuid, TrajectoryId};
use crate::witness::WitnessOp;

pub use types::{HealthReport, SearchOutcome};

struct RecentSearch {
    query_id: TrajectoryId,
    context: Context,
    arm: usize,
    query_embedding: Vec<f32>,
    result_ids: Vec<String>,
    session: Option<SessionUuid>,
}

/// Coordinates a [`VectorStore`] with the self-learning wrapper
/// described above.
pub struct SelfLearningOrchestrator {
    store: VectorStore,
    router: QueryRouter,
    trainer: ContrastiveTrainer,
    frequency: AccessFrequencyCompressor,
    federation: FederationManager,
    solver: EfSearchPolicy,
    config: LearningConfig,
    recent_searches: Mutex<VecDeque<RecentSearch>>,
    tick_lock: Mutex<()>,
    tick_count: AtomicU64,
    destroyed: AtomicBool,
}

impl SelfLearningOrchestrator {
    /// Opens (or creates) a store at `store_path` and a router
    /// persisting to `router_path`, wiring up every learning component
    /// from `learning`'s hyperparameters.
    pub fn open(
        store_path: impl AsRef<Path>,
        router_path: impl AsRef<Path>,
        config: Config,
        learning: LearningConfig,
    ) -> Result<Self> {
        config.validate()?;
        learning.validate()?;

        let store = VectorStore::open(store_path, config.clone())?;
        let router = QueryRouter::load(router_path, learning.router_threshold, learning.router_debounce)?;
        let trainer = ContrastiveTrainer::new(
            config.dimension,
            learning.trainer_learning_rate,
            learning.trainer_temperature,
            learning.max_contrastive_samples,
        );
        let frequency = AccessFrequencyCompressor::new(
            learning.frequency_decay,
            learning.frequency_prune_threshold,
            learning.frequency_prune_every_ticks,
        );
        let federation = FederationManager::new(learning.consolidation_threshold);
        let solver = EfSearchPolicy::new(config.ef_search_arms);

        info!("self-learning orchestrator ready");
        Ok(Self {
            store,
            router,
            trainer,
            frequency,
            federation,
            solver,
            config: learning,
            recent_searches: Mutex::new(VecDeque::new()),
            tick_lock: Mutex::new(()),
            tick_count: AtomicU64::new(0),
            destroyed: AtomicBool::new(false),
        })
    }

    fn check_alive(&self) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(LifecycleError::destroyed("orchestrator").into());
        }
        Ok(())
    }

    /// Inserts a vector, then seeds its access-frequency score.
    pub fn insert(&self, id: &str, vector: &[f32], metadata: Option<Metadata>) -> Result<()> {
        self.check_alive()?;
        self.store.insert(id, vector, metadata)?;
        if let Err(e) = self.frequency.seed(id) {
            warn!(error = %e, "frequency seed failed");
        }
        Ok(())
    }

    /// Removes a vector, then drops its tracked access-frequency score.
    pub fn remove(&self, id: &str) -> Result<bool> {
        self.check_alive()?;
        let removed = self.store.remove(id)?;
        if removed {
            if let Err(e) = self.frequency.remove(id) {
                warn!(error = %e, "frequency remove failed");
            }
        }
        Ok(removed)
    }

    /// Searches the store, routing the query through every learning
    /// component: the router classifies intent, the contrastive
    /// projection and any active LoRA adapter bias the query embedding,
    /// the `ef_search` bandit picks a candidate-list size, falling back
    /// to the deterministic heuristic while adaptive search is disabled
    /// (unless the caller already set one explicitly, which always
    /// wins), and every hit's access-frequency score is nudged up.
    /// `session`, if given,
    /// ties this query to a live federated session for later pattern
    /// extraction.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        mut options: SearchOptions,
        session: Option<SessionUuid>,
    ) -> Result<SearchOutcome> {
        self.check_alive()?;

        let difficulty = {
            let stats = self.store.stats()?;
            if options.filter.is_some() {
                0.8
            } else if stats.count == 0 {
                0.0
            } else {
                1.0 - (k as f32 / stats.count as f32).min(1.0)
            }
        };
        let context = Context::from_score(difficulty);
        let (arm, solver_managed) = match options.ef_search {
            Some(explicit) => (explicit, false),
            None => (self.solver.effective_arm(context)?, true),
        };
        options.ef_search = Some(arm);

        let projected = self.trainer.project(query).unwrap_or_else(|e| {
            warn!(error = %e, "contrastive projection failed, searching with raw query");
            query.to_vec()
        });
        let biased_query = self.federation.apply_lora(&projected).unwrap_or_else(|e| {
            warn!(error = %e, "lora application failed, searching without adaptation");
            projected.clone()
        });

        let routed_intent = match self.router.route(query, 3) {
            Ok(route) => route.intent,
            Err(e) => {
                warn!(error = %e, "router query failed");
                None
            }
        };

        let results = self.store.search(&biased_query, k, options)?;

        for r in &results {
            if let Err(e) = self.frequency.record_hit(&r.id) {
                warn!(error = %e, "frequency record_hit failed");
            }
        }

        let query_id = TrajectoryId::new();
        if solver_managed {
            if let Ok(mut recent) = self.recent_searches.lock() {
                if recent.len() >= self.config.recent_searches_cap {
                    recent.pop_front();
                }
                recent.push_back(RecentSearch {
                    query_id,
                    context,
                    arm,
                    query_embedding: query.to_vec(),
                    result_ids: results.iter().map(|r| r.id.clone()).collect(),
                    session,
                });
            }
        }

        Ok(SearchOutcome {
            query_id,
            results,
            routed_intent,
        })
    }

    /// Records caller-reported feedback (quality in `[0, 1]`) for a
    /// previously returned `query_id`: updates the bandit's cell stats,
    /// folds a trajectory into the query's session (if any), and — for
    /// well-rated searches whose top hit is still resolvable — buffers
    /// a contrastive training sample.
    pub fn record_feedback(&self, query_id: TrajectoryId, quality: f32) -> Result<()> {
        self.check_alive()?;
        let quality = clamp_quality(quality);

        let entry = {
            let mut recent = self
                .recent_searches
                .lock()
                .map_err(|_| StorageError::corrupted("recent searches lock poisoned"))?;
            let pos = recent.iter().position(|r| r.query_id == query_id);
            pos.and_then(|i| recent.remove(i))
        };
        let Some(entry) = entry else {
            return Err(ValidationError::invalid_field("query_id", "no matching recent search").into());
        };

        let success = quality >= self.config.positive_quality_threshold;
        let cost = entry.arm as f32 / 50.0;
        if let Err(e) = self.solver.record_outcome(entry.context, entry.arm, success, cost) {
            warn!(error = %e, "solver record_outcome failed");
        }

        if let Some(session) = entry.session {
            if let Err(e) = self
                .federation
                .record_trajectory(session, entry.query_embedding.clone(), quality, None)
            {
                warn!(error = %e, "federation record_trajectory failed");
            }
        }

        if success {
            if let Some(positive_id) = entry.result_ids.first() {
                if let Ok(Some(positive_vec)) = self.store.get_vector(positive_id) {
                    let pool = self.store.snapshot_vectors(256).unwrap_or_default();
                    let mut excluded = HashSet::new();
                    excluded.insert(positive_id.clone());
                    let negatives: Vec<Vec<f32>> = self
                        .trainer
                        .mine_hard_negatives(&entry.query_embedding, &pool, &excluded, 4)
                        .into_iter()
                        .map(|(_, v)| v.clone())
                        .collect();
                    if !negatives.is_empty() {
                        let sample = ContrastiveSample {
                            anchor: entry.query_embedding,
                            positive: positive_vec,
                            negatives,
                        };
                        if let Err(e) = self.trainer.add_sample(sample) {
                            warn!(error = %e, "buffering contrastive sample failed");
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Begins a federated session for `agent_id`.
    pub fn begin_session(&self, agent_id: &str, warm_start: bool) -> Result<SessionUuid> {
        self.check_alive()?;
        self.federation.begin_session(agent_id, warm_start)
    }

    /// Ends a federated session, returning its summary.
    pub fn end_session(&self, session: SessionUuid) -> Result<SessionSummary> {
        self.check_alive()?;
        self.federation.end_session(session)
    }

    /// Runs one round of periodic housekeeping: a contrastive training
    /// step, an access-frequency decay tick, cross-session
    /// consolidation, and — every `acceptance_interval_ticks` calls — a
    /// solver acceptance cycle recorded into the witness chain.
    /// Non-reentrant: a `tick()` already in progress causes concurrent
    /// callers to return a storage error rather than double-run
    /// housekeeping.
    pub fn tick(&self) -> Result<()> {
        self.check_alive()?;
        let _guard = self
            .tick_lock
            .try_lock()
            .map_err(|_| StorageError::corrupted("tick already in progress"))?;
        let count = self.tick_count.fetch_add(1, Ordering::SeqCst) + 1;

        if let Err(e) = self.trainer.train_batch(self.config.trainer_batch_size) {
            warn!(error = %e, "contrastive train_batch failed during tick");
        }
        if let Err(e) = self.frequency.tick() {
            warn!(error = %e, "frequency tick failed during tick");
        }
        if let Err(e) = self.federation.consolidate() {
            warn!(error = %e, "federation consolidate failed during tick");
        }

        if count % self.config.acceptance_interval_ticks.max(1) == 0 {
            match self.solver.acceptance(AcceptanceConfig::default(), None) {
                Ok(report) => {
                    let payload = format!("accepted={} dims={}", report.accepted, report.dimensions_improved).into_bytes();
                    if let Err(e) = self.store.record_event(WitnessOp::Acceptance, &payload) {
                        warn!(error = %e, "failed to record acceptance witness event");
                    }
                    info!(
                        accepted = report.accepted,
                        adaptive_enabled = self.solver.is_adaptive_enabled(),
                        tick = count,
                        "solver acceptance cycle completed"
                    );
                }
                Err(e) => warn!(error = %e, "solver acceptance cycle failed"),
            }
        }
        Ok(())
    }

    /// Forces an immediate contrastive training step and witness
    /// record, bypassing the tick cadence. Intended for tests and
    /// operator-triggered retraining, not the steady-state hot path.
    pub fn force_learn(&self) -> Result<()> {
        self.check_alive()?;
        let report = self.trainer.train_batch(self.config.trainer_batch_size)?;
        let payload = format!("loss={:.6} batch_size={}", report.loss, report.batch_size).into_bytes();
        self.store.record_event(WitnessOp::Train, &payload)?;
        Ok(())
    }

    /// Point-in-time health snapshot across every component.
    pub fn health(&self) -> Result<HealthReport> {
        self.check_alive()?;
        Ok(HealthReport {
            store_stats: self.store.stats()?,
            router_stats: self.router.stats()?,
            frequency_tracked: self.frequency.size(),
            federation_consolidated_patterns: self.federation.consolidated_patterns().len(),
            contrastive_buffered_samples: self.trainer.buffered_samples(),
            ticks_completed: self.tick_count.load(Ordering::SeqCst),
        })
    }

    /// Direct access to the underlying store, for operations (compact,
    /// derive, save) the learning wrapper doesn't itself need to mediate.
    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Shuts the orchestrator down: ends every still-live federated
    /// session, forces a final synchronous router save, and rejects all
    /// further calls. Idempotent.
    pub fn destroy(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.federation.end_all_live_sessions() {
            warn!(error = %e, "ending live sessions during destroy failed");
        }
        if let Err(e) = self.router.save_now() {
            warn!(error = %e, "router save_now failed during destroy");
        }
        info!("self-learning orchestrator destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orchestrator(dir: &tempfile::TempDir) -> SelfLearningOrchestrator {
        let mut config = Config::new(4);
        config.batch_threshold = 1;
        SelfLearningOrchestrator::open(
            dir.path().join("store.rvf"),
            dir.path().join("router.json"),
            config,
            LearningConfig {
                router_debounce: std::time::Duration::from_millis(10),
                acceptance_interval_ticks: 2,
                ..LearningConfig::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_insert_and_search_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(&dir);
        orch.insert("a", &[1.0, 0.0, 0.0, 0.0], None).unwrap();
        let outcome = orch.search(&[1.0, 0.0, 0.0, 0.0], 1, SearchOptions::default(), None).unwrap();
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].id, "a");
    }

    #[test]
    fn test_record_feedback_updates_solver_and_requires_known_query() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(&dir);
        orch.insert("a", &[1.0, 0.0, 0.0, 0.0], None).unwrap();
        orch.insert("b", &[0.0, 1.0, 0.0, 0.0], None).unwrap();
        let outcome = orch.search(&[1.0, 0.0, 0.0, 0.0], 1, SearchOptions::default(), None).unwrap();
        orch.record_feedback(outcome.query_id, 0.9).unwrap();

        let err = orch.record_feedback(outcome.query_id, 0.9).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_session_lifecycle_through_orchestrator() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(&dir);
        let session = orch.begin_session("agent-1", false).unwrap();
        let summary = orch.end_session(session).unwrap();
        assert_eq!(summary.trajectory_count, 0);
    }

    #[test]
    fn test_tick_runs_acceptance_cycle_at_cadence() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(&dir);
        orch.tick().unwrap();
        orch.tick().unwrap();
        let health = orch.health().unwrap();
        assert_eq!(health.ticks_completed, 2);
    }

    #[test]
    fn test_destroy_rejects_further_calls() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(&dir);
        orch.destroy().unwrap();
        let err = orch.insert("a", &[1.0, 0.0, 0.0, 0.0], None).unwrap_err();
        assert!(err.is_lifecycle());
        orch.destroy().unwrap();
    }

    #[test]
    fn test_destroy_ends_live_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(&dir);
        let session = orch.begin_session("agent-1", false).unwrap();
        orch.destroy().unwrap();
        let err = orch.federation.record_trajectory(session, vec![1.0], 0.5, None).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_force_learn_is_noop_with_empty_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(&dir);
        orch.force_learn().unwrap();
    }
}
