//! Contrastive projection trainer.
//!
//! [`ContrastiveTrainer`] learns a linear projection `P` over the
//! store's embedding space using an InfoNCE-style objective: pull an
//! anchor's projection toward its positive's projection and push it
//! away from its negatives'. The projection is applied at query time
//! (see [`crate::orchestrator::SelfLearningOrchestrator`]) to bias
//! search toward embeddings the caller has rated well in the past.

pub mod types;

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, RwLock};

use rand::Rng;
use tracing::debug;

use crate::error::{Result, StorageError};

pub use types::{stage_for_step, ContrastiveSample, CurriculumStage, TrainReport};

/// Learns and applies a linear contrastive projection over embeddings.
pub struct ContrastiveTrainer {
    dim: usize,
    projection: RwLock<Vec<Vec<f32>>>,
    learning_rate: f32,
    temperature: f32,
    samples: Mutex<VecDeque<ContrastiveSample>>,
    max_samples: usize,
    steps_completed: Mutex<u64>,
}

impl ContrastiveTrainer {
    /// Creates a trainer for `dim`-dimensional embeddings, with the
    /// projection initialized to identity plus small uniform noise (so
    /// gradients aren't degenerate from the very first step).
    pub fn new(dim: usize, learning_rate: f32, temperature: f32, max_samples: usize) -> Self {
        let mut rng = rand::thread_rng();
        let noise = 0.01;
        let mut projection = vec![vec![0.0f32; dim]; dim];
        for i in 0..dim {
            projection[i][i] = 1.0 + rng.gen_range(-noise..noise);
        }
        Self {
            dim,
            projection: RwLock::new(projection),
            learning_rate,
            temperature: temperature.max(1e-6),
            samples: Mutex::new(VecDeque::new()),
            max_samples,
            steps_completed: Mutex::new(0),
        }
    }

    /// Projects an embedding through the current learned matrix.
    pub fn project(&self, v: &[f32]) -> Result<Vec<f32>> {
        let p = self
            .projection
            .read()
            .map_err(|_| StorageError::corrupted("trainer projection lock poisoned"))?;
        Ok(matvec(&p, v))
    }

    /// Buffers a training sample. Drops the oldest sample if the buffer
    /// is already at `max_samples`.
    pub fn add_sample(&self, sample: ContrastiveSample) -> Result<()> {
        let mut samples = self
            .samples
            .lock()
            .map_err(|_| StorageError::corrupted("trainer sample buffer lock poisoned"))?;
        if samples.len() >= self.max_samples {
            samples.pop_front();
        }
        samples.push_back(sample);
        Ok(())
    }

    /// Current number of buffered samples.
    pub fn buffered_samples(&self) -> usize {
        self.samples.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// The curriculum stage implied by steps completed so far.
    pub fn curriculum_stage(&self) -> CurriculumStage {
        let steps = self.steps_completed.lock().map(|s| *s).unwrap_or(0);
        stage_for_step(steps)
    }

    /// Selects up to `k` hardest negatives for `anchor` from `pool`,
    /// excluding ids in `excluded`. "Hardest" means highest cosine
    /// similarity to the anchor while still being a negative.
    pub fn mine_hard_negatives<'a>(
        &self,
        anchor: &[f32],
        pool: &'a [(String, Vec<f32>)],
        excluded: &HashSet<String>,
        k: usize,
    ) -> Vec<&'a (String, Vec<f32>)> {
        let mut scored: Vec<(&(String, Vec<f32>), f32)> = pool
            .iter()
            .filter(|(id, _)| !excluded.contains(id))
            .map(|entry| (entry, cosine(anchor, &entry.1)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().take(k).map(|(entry, _)| entry).collect()
    }

    /// Drains up to `batch_size` buffered samples and performs one
    /// InfoNCE gradient step over the projection matrix.
    pub fn train_batch(&self, batch_size: usize) -> Result<TrainReport> {
        let batch: Vec<ContrastiveSample> = {
            let mut samples = self
                .samples
                .lock()
                .map_err(|_| StorageError::corrupted("trainer sample buffer lock poisoned"))?;
            let n = batch_size.min(samples.len());
            samples.drain(..n).collect()
        };
        if batch.is_empty() {
            return Ok(TrainReport::default());
        }

        let mut grad_accum = vec![vec![0.0f32; self.dim]; self.dim];
        let mut total_loss = 0.0f32;
        let mut total_grad_norm = 0.0f32;

        {
            let p = self
                .projection
                .read()
                .map_err(|_| StorageError::corrupted("trainer projection lock poisoned"))?;

            for sample in &batch {
                let za = matvec(&p, &sample.anchor);
                let zp = matvec(&p, &sample.positive);
                let zns: Vec<Vec<f32>> = sample.negatives.iter().map(|n| matvec(&p, n)).collect();

                let sim_p = dot(&za, &zp) / self.temperature;
                let sims_n: Vec<f32> = zns.iter().map(|zn| dot(&za, zn) / self.temperature).collect();

                let max_logit = sims_n.iter().cloned().fold(sim_p, f32::max);
                let exp_p = (sim_p - max_logit).exp();
                let exp_n: Vec<f32> = sims_n.iter().map(|s| (s - max_logit).exp()).collect();
                let denom = exp_p + exp_n.iter().sum::<f32>();
                let softmax_p = exp_p / denom;
                let softmax_n: Vec<f32> = exp_n.iter().map(|e| e / denom).collect();

                total_loss += -(softmax_p.max(1e-12)).ln();

                // dL/dza = (softmax_p - 1) * zp / T + sum_i softmax_n_i * zn_i / T
                let mut grad_za = vec![0.0f32; self.dim];
                for d in 0..self.dim {
                    grad_za[d] += (softmax_p - 1.0) * zp[d] / self.temperature;
                    for (zn, s) in zns.iter().zip(softmax_n.iter()) {
                        grad_za[d] += s * zn[d] / self.temperature;
                    }
                }
                total_grad_norm += grad_za.iter().map(|g| g * g).sum::<f32>().sqrt();

                // dL/dP = outer(dL/dza, anchor)
                for (row, g) in grad_accum.iter_mut().zip(grad_za.iter()) {
                    for (cell, a) in row.iter_mut().zip(sample.anchor.iter()) {
                        *cell += g * a;
                    }
                }
            }
        }

        let n = batch.len() as f32;
        {
            let mut p = self
                .projection
                .write()
                .map_err(|_| StorageError::corrupted("trainer projection lock poisoned"))?;
            for (row, grad_row) in p.iter_mut().zip(grad_accum.iter()) {
                for (cell, g) in row.iter_mut().zip(grad_row.iter()) {
                    *cell -= self.learning_rate * (g / n);
                }
            }
        }

        if let Ok(mut steps) = self.steps_completed.lock() {
            *steps += 1;
        }

        let report = TrainReport {
            loss: total_loss / n,
            batch_size: batch.len(),
            avg_grad_norm: total_grad_norm / n,
        };
        debug!(loss = report.loss, batch_size = report.batch_size, "contrastive train_batch");
        Ok(report)
    }
}

fn matvec(matrix: &[Vec<f32>], v: &[f32]) -> Vec<f32> {
    matrix.iter().map(|row| dot(row, v)).collect()
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_identity_like_at_init() {
        let trainer = ContrastiveTrainer::new(4, 0.01, 0.1, 100);
        let v = vec![1.0, 2.0, 3.0, 4.0];
        let projected = trainer.project(&v).unwrap();
        for (a, b) in v.iter().zip(projected.iter()) {
            assert!((a - b).abs() < 0.05);
        }
    }

    #[test]
    fn test_train_batch_empty_buffer_is_noop() {
        let trainer = ContrastiveTrainer::new(4, 0.01, 0.1, 100);
        let report = trainer.train_batch(8).unwrap();
        assert_eq!(report.batch_size, 0);
    }

    #[test]
    fn test_train_batch_reduces_buffer_and_reports_loss() {
        let trainer = ContrastiveTrainer::new(4, 0.05, 0.2, 100);
        for i in 0..10 {
            trainer
                .add_sample(ContrastiveSample {
                    anchor: vec![1.0, 0.0, 0.0, 0.0],
                    positive: vec![0.9, 0.1, 0.0, 0.0],
                    negatives: vec![vec![0.0, 1.0, 0.0, 0.0], vec![0.0, 0.0, 1.0, i as f32 * 0.01]],
                })
                .unwrap();
        }
        let report = trainer.train_batch(4).unwrap();
        assert_eq!(report.batch_size, 4);
        assert!(report.loss.is_finite());
        assert_eq!(trainer.buffered_samples(), 6);
    }

    #[test]
    fn test_mine_hard_negatives_excludes_and_ranks() {
        let trainer = ContrastiveTrainer::new(2, 0.01, 0.1, 10);
        let pool = vec![
            ("a".to_string(), vec![1.0, 0.0]),
            ("b".to_string(), vec![0.9, 0.1]),
            ("c".to_string(), vec![0.0, 1.0]),
        ];
        let mut excluded = HashSet::new();
        excluded.insert("a".to_string());
        let hard = trainer.mine_hard_negatives(&[1.0, 0.0], &pool, &excluded, 1);
        assert_eq!(hard.len(), 1);
        assert_eq!(hard[0].0, "b");
    }

    #[test]
    fn test_curriculum_stage_starts_at_zero() {
        let trainer = ContrastiveTrainer::new(4, 0.01, 0.1, 10);
        assert_eq!(trainer.curriculum_stage().stage, 0);
    }
}
