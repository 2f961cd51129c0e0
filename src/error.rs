//! Error types for the RVF engine.
//!
//! The engine uses a hierarchical error system mirroring the error kinds
//! catalogued for the storage/learning layers:
//! - [`RvfError`] is the top-level error returned by all public APIs
//! - Specific error types ([`ValidationError`], [`ResourceError`],
//!   [`StorageError`], [`IntegrityError`]) provide detail
//!
//! # Error Handling Pattern
//! ```rust,ignore
//! use rvf::{VectorStore, Config, Result};
//!
//! fn example() -> Result<()> {
//!     let mut store = VectorStore::open("./vectors.rvf", Config::default())?;
//!     store.insert("a", &[1.0, 0.0, 0.0, 0.0], None)?;
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for RVF operations.
pub type Result<T> = std::result::Result<T, RvfError>;

/// Top-level error enum for all engine operations.
///
/// This is the only error type returned by public APIs. Use pattern
/// matching, or the `is_*()` helpers, to handle specific cases.
#[derive(Debug, Error)]
pub enum RvfError {
    /// Input shape/size/charset rejected synchronously.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A queue, cap, or batch limit was exceeded.
    #[error("resource error: {0}")]
    Resource(#[from] ResourceError),

    /// File I/O or on-disk corruption.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Witness chain mismatch or graph corruption.
    #[error("integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    /// Use of a destroyed/uninitialized component.
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Operation was cancelled via a [`crate::cancellation::CancellationToken`].
    #[error("operation cancelled at {at}")]
    Cancelled {
        /// Coarse-grained safe point at which the cancellation was observed.
        at: &'static str,
    },

    /// Operation exceeded its time budget.
    #[error("operation timed out after {budget_ms} ms")]
    Timeout {
        /// Configured budget that was exceeded.
        budget_ms: u64,
    },

    /// General I/O error not otherwise categorized.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RvfError {
    /// Creates a cancellation error at the given safe point.
    pub fn cancelled(at: &'static str) -> Self {
        Self::Cancelled { at }
    }

    /// Creates a timeout error for the given budget.
    pub fn timeout(budget_ms: u64) -> Self {
        Self::Timeout { budget_ms }
    }

    /// Returns true if this is a validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a resource-limit error.
    pub fn is_resource(&self) -> bool {
        matches!(self, Self::Resource(_))
    }

    /// Returns true if this is a storage error.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if this is an integrity error.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity(_))
    }

    /// Returns true if this is a lifecycle (use-after-destroy) error.
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::Lifecycle(_))
    }

    /// Returns true if this is a cancellation or timeout error.
    ///
    /// Per the spec, timeouts are handled identically to cancellations
    /// by callers walking coarse-grained safe points.
    pub fn is_cancelled_or_timeout(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::Timeout { .. })
    }
}

/// Validation errors for input data.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Vector length doesn't match the store's configured dimension.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Expected dimension from store configuration.
        expected: usize,
        /// Actual vector length provided.
        got: usize,
    },

    /// A field has an invalid value.
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// Name of the invalid field.
        field: String,
        /// Why the value is invalid.
        reason: String,
    },

    /// Content (metadata, id, path) exceeds an allowed size.
    #[error("'{field}' too large: {size} bytes (max: {max} bytes)")]
    TooLarge {
        /// Name of the oversized field.
        field: String,
        /// Actual size in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },

    /// A required field is missing or empty.
    #[error("required field missing: {field}")]
    RequiredField {
        /// Name of the missing field.
        field: String,
    },

    /// Too many items in a collection field.
    #[error("too many items in '{field}': {count} (max: {max})")]
    TooManyItems {
        /// Name of the field.
        field: String,
        /// Actual count.
        count: usize,
        /// Maximum allowed.
        max: usize,
    },

    /// A filter expression used an unrecognized operator.
    #[error("unknown filter operator: {0}")]
    UnknownOperator(String),

    /// A filter expression tree exceeded the allowed nesting depth.
    #[error("filter expression depth {depth} exceeds maximum {max}")]
    ExpressionTooDeep {
        /// Observed depth.
        depth: usize,
        /// Maximum allowed depth.
        max: usize,
    },

    /// A path argument failed traversal/null-byte/root validation.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath {
        /// The offending path, rendered for diagnostics.
        path: String,
        /// Why the path was rejected.
        reason: String,
    },
}

impl ValidationError {
    /// Creates a dimension mismatch error.
    pub fn dimension_mismatch(expected: usize, got: usize) -> Self {
        Self::DimensionMismatch { expected, got }
    }

    /// Creates an invalid field error.
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a too-large error.
    pub fn too_large(field: impl Into<String>, size: usize, max: usize) -> Self {
        Self::TooLarge {
            field: field.into(),
            size,
            max,
        }
    }

    /// Creates a required-field error.
    pub fn required_field(field: impl Into<String>) -> Self {
        Self::RequiredField {
            field: field.into(),
        }
    }

    /// Creates a too-many-items error.
    pub fn too_many_items(field: impl Into<String>, count: usize, max: usize) -> Self {
        Self::TooManyItems {
            field: field.into(),
            count,
            max,
        }
    }

    /// Creates an invalid-path error.
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Resource-limit errors (queue/cap/batch exceeded).
///
/// Per the spec's recovery table, these are rejected; the caller must
/// drain (flush) before retrying.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The pending-write buffer reached its configured cap.
    #[error("pending-write buffer full: {pending} entries (cap: {cap}); call flush() first")]
    PendingWriteCapExceeded {
        /// Entries currently buffered.
        pending: usize,
        /// Configured cap.
        cap: usize,
    },

    /// A bounded in-memory collection (trajectories, contrastive samples,
    /// recent-searches ring) is at capacity and cannot accept this item
    /// without an explicit eviction policy override.
    #[error("bounded collection '{collection}' is full: {size} (cap: {cap})")]
    CollectionFull {
        /// Name of the collection.
        collection: String,
        /// Current size.
        size: usize,
        /// Configured cap.
        cap: usize,
    },
}

impl ResourceError {
    /// Creates a pending-write cap error.
    pub fn pending_write_cap_exceeded(pending: usize, cap: usize) -> Self {
        Self::PendingWriteCapExceeded { pending, cap }
    }

    /// Creates a bounded-collection-full error.
    pub fn collection_full(collection: impl Into<String>, size: usize, cap: usize) -> Self {
        Self::CollectionFull {
            collection: collection.into(),
            size,
            cap,
        }
    }
}

/// Storage-related errors (file I/O, corruption-on-read).
#[derive(Debug, Error)]
pub enum StorageError {
    /// Store file or a segment within it is corrupted.
    #[error("store corrupted: {0}")]
    Corrupted(String),

    /// Store file not found at the expected path.
    #[error("store not found: {0}")]
    NotFound(PathBuf),

    /// Store is held by another writer (advisory lock contention).
    #[error("store is locked by another writer")]
    Locked,

    /// Store file version/magic header doesn't match this implementation.
    #[error("unsupported store version: {0}")]
    UnsupportedVersion(u32),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Underlying I/O failure during flush/save/compact/load.
    #[error("I/O failure during {op}: {source}")]
    Io {
        /// The operation in progress when the failure occurred.
        op: &'static str,
        /// Underlying OS error, rendered for diagnostics.
        source: String,
    },
}

impl StorageError {
    /// Creates a corruption error with the given message.
    pub fn corrupted(msg: impl Into<String>) -> Self {
        Self::Corrupted(msg.into())
    }

    /// Creates a serialization error with the given message.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Creates an I/O error tagged with the operation in progress.
    pub fn io(op: &'static str, source: std::io::Error) -> Self {
        Self::Io {
            op,
            source: source.to_string(),
        }
    }
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for RvfError {
    fn from(err: bincode::Error) -> Self {
        RvfError::Storage(StorageError::from(err))
    }
}

/// Integrity errors (witness chain mismatch, graph corruption).
///
/// Per the spec's recovery table, these refuse further mutations until
/// `compact()` succeeds.
#[derive(Debug, Error)]
pub enum IntegrityError {
    /// The witness chain failed verification.
    #[error("witness chain mismatch at entry {index}")]
    WitnessMismatch {
        /// Index of the first mismatching entry.
        index: u64,
    },

    /// The HNSW graph was found to be corrupted during traversal.
    #[error("vector graph corrupted: {0}")]
    GraphCorrupted(String),
}

impl IntegrityError {
    /// Creates a witness-mismatch error at the given entry index.
    pub fn witness_mismatch(index: u64) -> Self {
        Self::WitnessMismatch { index }
    }

    /// Creates a graph-corrupted error with the given message.
    pub fn graph_corrupted(msg: impl Into<String>) -> Self {
        Self::GraphCorrupted(msg.into())
    }
}

/// Lifecycle errors (use-after-destroy, not-yet-initialized).
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The orchestrator or store has already been destroyed/closed.
    #[error("{0} has been destroyed and rejects further calls")]
    Destroyed(&'static str),
}

impl LifecycleError {
    /// Creates a destroyed error for the named component.
    pub fn destroyed(component: &'static str) -> Self {
        Self::Destroyed(component)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::dimension_mismatch(4, 8);
        assert_eq!(err.to_string(), "dimension mismatch: expected 4, got 8");
    }

    #[test]
    fn test_resource_error_display() {
        let err = ResourceError::pending_write_cap_exceeded(100_001, 100_000);
        assert!(err.to_string().contains("pending-write buffer full"));
    }

    #[test]
    fn test_is_validation() {
        let err: RvfError = ValidationError::required_field("id").into();
        assert!(err.is_validation());
        assert!(!err.is_storage());
    }

    #[test]
    fn test_is_integrity() {
        let err: RvfError = IntegrityError::witness_mismatch(7).into();
        assert!(err.is_integrity());
    }

    #[test]
    fn test_cancelled_and_timeout_share_recovery_class() {
        let cancelled = RvfError::cancelled("search");
        let timed_out = RvfError::timeout(5_000);
        assert!(cancelled.is_cancelled_or_timeout());
        assert!(timed_out.is_cancelled_or_timeout());
    }

    #[test]
    fn test_error_conversion_chain() {
        fn inner() -> Result<()> {
            Err(StorageError::corrupted("bad segment"))?
        }
        let result = inner();
        assert!(result.is_err());
        assert!(result.unwrap_err().is_storage());
    }

    #[test]
    fn test_lifecycle_error_display() {
        let err = LifecycleError::destroyed("orchestrator");
        assert_eq!(
            err.to_string(),
            "orchestrator has been destroyed and rejects further calls"
        );
    }
}
