//! Types for the contrastive projection trainer.

/// One training example: an anchor, a positive match, and its negatives.
#[derive(Clone, Debug)]
pub struct ContrastiveSample {
    /// Anchor embedding (e.g. a query).
    pub anchor: Vec<f32>,
    /// Positive embedding (e.g. a result the caller rated highly).
    pub positive: Vec<f32>,
    /// Negative embeddings the anchor should be pushed away from.
    pub negatives: Vec<Vec<f32>>,
}

/// Result of one [`super::ContrastiveTrainer::train_batch`] call.
#[derive(Clone, Copy, Debug, Default)]
pub struct TrainReport {
    /// Mean InfoNCE loss over the batch.
    pub loss: f32,
    /// Number of samples actually consumed (may be less than requested
    /// if the buffer held fewer).
    pub batch_size: usize,
    /// Mean L2 norm of the per-sample anchor gradient.
    pub avg_grad_norm: f32,
}

/// A curriculum stage: how many negatives to mine and how hard they
/// should be, as a function of training progress.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CurriculumStage {
    /// Stage index, starting at 0.
    pub stage: usize,
    /// Negatives to mine per anchor at this stage.
    pub negative_count: usize,
    /// Minimum anchor-negative similarity to count as "hard" at this stage.
    pub min_hardness: f32,
}

/// Fixed curriculum: later stages mine more, harder negatives as the
/// trainer accumulates steps, matching the common easy-to-hard
/// contrastive training schedule.
const STAGES: &[CurriculumStage] = &[
    CurriculumStage { stage: 0, negative_count: 2, min_hardness: 0.0 },
    CurriculumStage { stage: 1, negative_count: 4, min_hardness: 0.3 },
    CurriculumStage { stage: 2, negative_count: 8, min_hardness: 0.5 },
    CurriculumStage { stage: 3, negative_count: 16, min_hardness: 0.7 },
];

/// Ticks of `train_batch` between curriculum stage advances.
const STEPS_PER_STAGE: u64 = 50;

/// Selects the curriculum stage for a given step count.
pub fn stage_for_step(steps_completed: u64) -> CurriculumStage {
    let idx = ((steps_completed / STEPS_PER_STAGE) as usize).min(STAGES.len() - 1);
    STAGES[idx]
}
