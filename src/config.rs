//! Configuration types for the RVF engine.
//!
//! [`Config`] controls the vector store (dimension, metric, HNSW tuning,
//! batching). [`LearningConfig`] controls the self-learning wrapper
//! (router threshold, trainer hyperparameters, bandit arms, acceptance
//! cadence). Both have sensible defaults and a `validate()` method
//! following the same fail-fast pattern: reject bad configuration
//! before any I/O happens.
//!
//! # Example
//! ```rust
//! use rvf::{Config, Metric, HnswConfig};
//!
//! let config = Config {
//!     dimension: 768,
//!     metric: Metric::Cosine,
//!     hnsw: HnswConfig::default(),
//!     ..Config::new(768)
//! };
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::Metric;

/// Vector store configuration.
///
/// All fields except `dimension` have sensible defaults. Use struct
/// update syntax to override specific settings.
#[derive(Clone, Debug)]
pub struct Config {
    /// Fixed vector dimension `D`, `1 <= D <= 4096`.
    pub dimension: usize,

    /// Distance metric, immutable after store creation.
    pub metric: Metric,

    /// HNSW graph tuning parameters.
    pub hnsw: HnswConfig,

    /// Number of buffered inserts that triggers an automatic flush.
    /// Default: 1000. Must be `<= max_pending_writes`.
    pub batch_threshold: usize,

    /// Hard cap on unflushed buffered inserts; exceeding it is a
    /// [`crate::error::ResourceError`]. Default: 100_000.
    pub max_pending_writes: usize,

    /// Candidate `ef_search` values exposed to the adaptive policy as
    /// bandit arms. Fixed at `{50, 100, 200, 400}`; exposed here only so
    /// tests can shrink it.
    pub ef_search_arms: [usize; 4],
}

impl Config {
    /// Creates a configuration for the given dimension, cosine metric,
    /// and default tuning.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            metric: Metric::Cosine,
            hnsw: HnswConfig::default(),
            batch_threshold: 1000,
            max_pending_writes: 100_000,
            ef_search_arms: [50, 100, 200, 400],
        }
    }

    /// Validates the configuration.
    ///
    /// Called automatically by [`crate::store::VectorStore::open`]. Can
    /// also be called explicitly before attempting to open a store.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.dimension == 0 || self.dimension > 4096 {
            return Err(ValidationError::invalid_field(
                "dimension",
                "must be between 1 and 4096",
            ));
        }
        if self.hnsw.max_nb_connection == 0 {
            return Err(ValidationError::invalid_field(
                "hnsw.max_nb_connection",
                "must be greater than 0",
            ));
        }
        if self.hnsw.ef_construction == 0 {
            return Err(ValidationError::invalid_field(
                "hnsw.ef_construction",
                "must be greater than 0",
            ));
        }
        if self.hnsw.ef_search == 0 {
            return Err(ValidationError::invalid_field(
                "hnsw.ef_search",
                "must be greater than 0",
            ));
        }
        if self.batch_threshold == 0 {
            return Err(ValidationError::invalid_field(
                "batch_threshold",
                "must be greater than 0",
            ));
        }
        if self.batch_threshold > self.max_pending_writes {
            return Err(ValidationError::invalid_field(
                "batch_threshold",
                "must not exceed max_pending_writes",
            ));
        }
        if self.max_pending_writes == 0 {
            return Err(ValidationError::invalid_field(
                "max_pending_writes",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Configuration for the HNSW vector index.
///
/// Controls the trade-off between index build time, memory usage, and
/// search accuracy.
///
/// # Tuning Guide
///
/// | Use Case     | M  | ef_construction | ef_search |
/// |--------------|----|-----------------|-----------|
/// | Low memory   |  8 |             100 |        30 |
/// | Balanced     | 16 |             200 |       100 |
/// | High recall  | 32 |             400 |       200 |
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Maximum bidirectional connections per node (`M`). Default: 16.
    pub max_nb_connection: usize,

    /// Candidate-list size tracked at build time. Default: 200.
    pub ef_construction: usize,

    /// Default per-query candidate-list size; may be overridden per
    /// search via `SearchOptions::ef_search` or the adaptive policy.
    /// Default: 100.
    pub ef_search: usize,

    /// Maximum number of layers in the skip-list structure. Default: 16.
    pub max_layer: usize,

    /// Initial pre-allocated capacity (number of vectors). Default: 10_000.
    pub max_elements: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            max_nb_connection: 16,
            ef_construction: 200,
            ef_search: 100,
            max_layer: 16,
            max_elements: 10_000,
        }
    }
}

/// Configuration for the self-learning wrapper.
///
/// Every field has a default matching the values named by the source
/// behavior; the orchestrator clamps and validates these the same way
/// [`Config`] does for the store.
#[derive(Clone, Debug)]
pub struct LearningConfig {
    /// Cosine-similarity threshold above which a router match counts.
    pub router_threshold: f32,

    /// Debounce window for router persistence. Default: 5s.
    pub router_debounce: std::time::Duration,

    /// Contrastive trainer learning rate.
    pub trainer_learning_rate: f32,

    /// InfoNCE temperature.
    pub trainer_temperature: f32,

    /// Batch size for `trainBatch`.
    pub trainer_batch_size: usize,

    /// Quality threshold above which a trajectory becomes a positive
    /// anchor/positive synthesis source. Default: 0.7.
    pub positive_quality_threshold: f32,

    /// Quality threshold below which a trajectory feeds the negatives
    /// pool. Default: 0.3.
    pub negative_quality_threshold: f32,

    /// Maximum live trajectories. Default: 500.
    pub max_live_trajectories: usize,

    /// Trajectory TTL before neutral-quality eviction. Default: 60s.
    pub trajectory_ttl: std::time::Duration,

    /// Maximum buffered contrastive samples. Default: 1000.
    pub max_contrastive_samples: usize,

    /// Access-frequency decay factor applied per tick. Default: 0.99.
    pub frequency_decay: f32,

    /// Access-frequency prune threshold. Default: 0.001.
    pub frequency_prune_threshold: f32,

    /// Ticks between frequency-map pruning passes. Default: 50.
    pub frequency_prune_every_ticks: u64,

    /// Cross-session consolidation quality threshold. Default: 0.3.
    pub consolidation_threshold: f32,

    /// Ticks between automatic acceptance cycles. Default: 100.
    pub acceptance_interval_ticks: u64,

    /// Recent-searches ring buffer capacity. Default: 200.
    pub recent_searches_cap: usize,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            router_threshold: 0.5,
            router_debounce: std::time::Duration::from_secs(5),
            trainer_learning_rate: 0.01,
            trainer_temperature: 0.1,
            trainer_batch_size: 32,
            positive_quality_threshold: 0.7,
            negative_quality_threshold: 0.3,
            max_live_trajectories: 500,
            trajectory_ttl: std::time::Duration::from_secs(60),
            max_contrastive_samples: 1000,
            frequency_decay: 0.99,
            frequency_prune_threshold: 0.001,
            frequency_prune_every_ticks: 50,
            consolidation_threshold: 0.3,
            acceptance_interval_ticks: 100,
            recent_searches_cap: 200,
        }
    }
}

impl LearningConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(0.0..=1.0).contains(&self.router_threshold) {
            return Err(ValidationError::invalid_field(
                "router_threshold",
                "must be within [0, 1]",
            ));
        }
        if self.trainer_batch_size == 0 {
            return Err(ValidationError::invalid_field(
                "trainer_batch_size",
                "must be greater than 0",
            ));
        }
        if self.max_live_trajectories == 0 {
            return Err(ValidationError::invalid_field(
                "max_live_trajectories",
                "must be greater than 0",
            ));
        }
        if self.max_contrastive_samples == 0 {
            return Err(ValidationError::invalid_field(
                "max_contrastive_samples",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}
