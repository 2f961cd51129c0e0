//! # rvf
//!
//! A single-file, crash-safe vector storage engine with an online-learning
//! search layer built on top of it.
//!
//! At its core, [`VectorStore`] is an HNSW-indexed approximate nearest
//! neighbor store: single-file persistence, filtered search, soft
//! deletion, compaction, and content-addressed lineage (`derive`), all
//! recorded in a SHAKE-256 hash-chained witness log so tampering with
//! the mutation history is detectable. On top of it,
//! [`SelfLearningOrchestrator`] wires in query-intent routing, a
//! contrastive projection trainer, a temporal access-frequency
//! compressor, federated per-agent session tracking, and an adaptive
//! `ef_search` bandit policy whose retraining is gated by acceptance
//! cycles before it's trusted.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rvf::{VectorStore, Config, SearchOptions};
//!
//! let store = VectorStore::open("./vectors.rvf", Config::new(768))?;
//! store.insert("doc-1", &embedding, None)?;
//! let hits = store.search(&query, 10, SearchOptions::default())?;
//! # Ok::<(), rvf::RvfError>(())
//! ```
//!
//! ## Key Concepts
//!
//! ### Store
//!
//! A [`VectorStore`] owns exactly one `.rvf` file: a single-writer,
//! multiple-reader container holding vectors, their metadata, and the
//! witness chain. `derive()` creates a copy-on-write child store sharing
//! the parent's vectors at the point of derivation, forking the witness
//! chain from the parent's current tip.
//!
//! ### Witness chain
//!
//! Every mutation — insert, delete, compaction, derivation, a
//! contrastive trainer step, a solver acceptance cycle — appends a
//! fixed-size entry to an append-only SHAKE-256 hash chain. `verify()`
//! walks the chain from genesis, detecting tampering at the first
//! broken link.
//!
//! ### Self-learning wrapper
//!
//! [`SelfLearningOrchestrator`] never lets a learning-component failure
//! block a storage operation: router, trainer, frequency, and
//! federation errors are logged and swallowed, while validation errors
//! from the store itself still propagate. `tick()` drives periodic
//! housekeeping; acceptance cycles gate whether a retrained bandit
//! policy actually replaces the previous one.
//!
//! ## Thread Safety
//!
//! [`VectorStore`] and [`SelfLearningOrchestrator`] are `Send + Sync`
//! and may be shared across threads via `Arc`. Mutating store methods
//! (`insert*`, `remove`, `flush`, `compact`) must still be serialized by
//! the caller (single-writer model); `search` and `stats` may run
//! concurrently with each other and with a writer, observing a snapshot
//! consistent with the most recently completed flush.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

// ============================================================================
// Module declarations
// ============================================================================

mod cancellation;
mod config;
mod error;
mod types;

/// Metadata filtering for vector search.
pub mod search;

/// Vector index abstractions (HNSW) for approximate nearest-neighbor search.
pub mod vector;

/// The persistent, HNSW-indexed vector store.
pub mod store;

/// Tamper-evident witness chain over store mutations.
pub mod witness;

/// Query intent classification and routing.
pub mod router;

/// Contrastive projection trainer.
pub mod contrastive;

/// Temporal access-frequency tracking.
pub mod frequency;

/// Federated session management and LoRA-style adaptation.
pub mod federation;

/// Adaptive `ef_search` bandit policy.
pub mod solver;

/// The self-learning orchestrator wiring every learning component together.
pub mod orchestrator;

// ============================================================================
// Public API re-exports
// ============================================================================

pub use cancellation::CancellationToken;

pub use config::{Config, HnswConfig, LearningConfig};

pub use error::{IntegrityError, LifecycleError, ResourceError, Result, RvfError, StorageError, ValidationError};

pub use types::{
    clamp_quality, Metadata, MetadataValue, Metric, SessionUuid, Timestamp, TrajectoryId,
    RESERVED_METADATA_KEYS,
};

pub use search::{BoolOp, CompareOp, Filter, RawFilter};

pub use vector::{HnswIndex, VectorIndex};

pub use store::{CompactionReport, SearchOptions, SearchResult, Stats, VectorStore};

pub use witness::{VerifyReport, WitnessChain, WitnessEntry, WitnessOp, ENTRY_SIZE, GENESIS_HASH};

pub use router::{Intent, QueryRouter, RouteResult, RouterStats};

pub use contrastive::{ContrastiveSample, ContrastiveTrainer, CurriculumStage, TrainReport};

pub use frequency::AccessFrequencyCompressor;

pub use federation::{FederationManager, LoraAdapter, Pattern, SessionSummary, SessionTrajectory};

pub use solver::{AcceptanceConfig, AcceptanceReport, CellStats, Context, EfSearchPolicy, ModeResult, TrainSummary, ARMS};

pub use orchestrator::{HealthReport, SearchOutcome, SelfLearningOrchestrator};

// ============================================================================
// Prelude module for convenient imports
// ============================================================================

/// Convenient imports for common `rvf` usage.
///
/// ```rust
/// use rvf::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{Config, LearningConfig};
    pub use crate::error::{Result, RvfError};
    pub use crate::orchestrator::SelfLearningOrchestrator;
    pub use crate::store::{SearchOptions, SearchResult, VectorStore};
    pub use crate::types::{Metadata, Metric, Timestamp};
}
