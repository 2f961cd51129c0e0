//! Temporal access-frequency tracking.
//!
//! [`AccessFrequencyCompressor`] keeps a decaying popularity score per
//! vector id in `[0, 1]`. New ids start "hot" (seeded to 1.0); each
//! search hit nudges the score up; every tick decays every score
//! toward zero, and cold entries are periodically pruned. The
//! orchestrator can use these scores to bias eviction or compaction
//! ordering without touching the store's actual tombstone logic.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

use crate::error::{Result, StorageError};
use crate::types::clamp_quality;

const SEARCH_HIT_BOOST: f32 = 0.01;
const DEFAULT_DECAY: f32 = 0.99;
const DEFAULT_PRUNE_THRESHOLD: f32 = 0.001;
const DEFAULT_PRUNE_EVERY_TICKS: u64 = 50;

/// Tracks a decaying popularity score per id.
pub struct AccessFrequencyCompressor {
    scores: RwLock<HashMap<String, f32>>,
    decay: f32,
    prune_threshold: f32,
    prune_every_ticks: u64,
    ticks: RwLock<u64>,
}

impl AccessFrequencyCompressor {
    /// Creates a compressor with the given decay factor and pruning
    /// cadence (matching [`crate::config::LearningConfig`] defaults: a
    /// 0.99 per-tick decay, pruning entries below 0.001 every 50 ticks).
    pub fn new(decay: f32, prune_threshold: f32, prune_every_ticks: u64) -> Self {
        Self {
            scores: RwLock::new(HashMap::new()),
            decay,
            prune_threshold,
            prune_every_ticks,
            ticks: RwLock::new(0),
        }
    }

    /// Registers a newly inserted id, seeded to maximum popularity.
    pub fn seed(&self, id: &str) -> Result<()> {
        let mut scores = self
            .scores
            .write()
            .map_err(|_| StorageError::corrupted("frequency map lock poisoned"))?;
        scores.insert(id.to_string(), 1.0);
        Ok(())
    }

    /// Records a search hit for `id`, nudging its score upward.
    pub fn record_hit(&self, id: &str) -> Result<()> {
        let mut scores = self
            .scores
            .write()
            .map_err(|_| StorageError::corrupted("frequency map lock poisoned"))?;
        let score = scores.entry(id.to_string()).or_insert(0.5);
        *score = clamp_quality(*score + SEARCH_HIT_BOOST);
        Ok(())
    }

    /// Removes `id`'s tracked score (e.g. on `VectorStore::remove`).
    pub fn remove(&self, id: &str) -> Result<()> {
        self.scores
            .write()
            .map_err(|_| StorageError::corrupted("frequency map lock poisoned"))?
            .remove(id);
        Ok(())
    }

    /// Applies one decay tick to every tracked score, and prunes cold
    /// entries every `prune_every_ticks` calls.
    pub fn tick(&self) -> Result<usize> {
        let mut scores = self
            .scores
            .write()
            .map_err(|_| StorageError::corrupted("frequency map lock poisoned"))?;
        for score in scores.values_mut() {
            *score *= self.decay;
        }

        let mut ticks = self
            .ticks
            .write()
            .map_err(|_| StorageError::corrupted("frequency tick counter lock poisoned"))?;
        *ticks += 1;

        let mut pruned = 0;
        if *ticks % self.prune_every_ticks.max(1) == 0 {
            let before = scores.len();
            scores.retain(|_, score| *score >= self.prune_threshold);
            pruned = before - scores.len();
            if pruned > 0 {
                debug!(pruned, "frequency map pruned cold entries");
            }
        }
        Ok(pruned)
    }

    /// Current score for `id`, or `None` if untracked.
    pub fn score(&self, id: &str) -> Option<f32> {
        self.scores.read().ok().and_then(|s| s.get(id).copied())
    }

    /// Number of tracked ids.
    pub fn size(&self) -> usize {
        self.scores.read().map(|s| s.len()).unwrap_or(0)
    }
}

impl Default for AccessFrequencyCompressor {
    fn default() -> Self {
        Self::new(DEFAULT_DECAY, DEFAULT_PRUNE_THRESHOLD, DEFAULT_PRUNE_EVERY_TICKS)
    }
}
