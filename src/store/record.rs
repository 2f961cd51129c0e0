//! Vector record validation and the on-disk record shape.
//!
//! A record couples a caller-supplied id with its dense vector, optional
//! metadata, and creation timestamp. Validation happens once, at the
//! boundary (`insert`/`insert_batch`), so the container and HNSW layers
//! never have to re-check shape invariants.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::{strip_reserved_keys, Metadata, Timestamp};

/// Maximum length of a caller-supplied vector id, in bytes.
pub const MAX_ID_LEN: usize = 256;

/// Maximum serialized metadata size, in bytes.
pub const MAX_METADATA_BYTES: usize = 64 * 1024;

/// A single stored vector, as persisted in the container's vector-row segment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Caller-supplied id, unique within the store.
    pub id: String,
    /// Dense float vector of the store's configured dimension.
    pub vector: Vec<f32>,
    /// Optional metadata map (JSON-scalar values only).
    pub metadata: Metadata,
    /// Creation timestamp (set on first insert, unchanged on replace).
    pub created_at: Timestamp,
    /// Soft-delete marker. Present in the file, excluded from search,
    /// until `compact()` reclaims it.
    pub tombstoned: bool,
}

/// Validates a caller-supplied vector id.
///
/// Ids must be 1-256 bytes and must not contain a null byte, matching
/// the bound the spec places on both vector ids and router intent names.
pub fn validate_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() {
        return Err(ValidationError::required_field("id"));
    }
    if id.len() > MAX_ID_LEN {
        return Err(ValidationError::too_large("id", id.len(), MAX_ID_LEN));
    }
    if id.contains('\0') {
        return Err(ValidationError::invalid_field("id", "must not contain a null byte"));
    }
    Ok(())
}

/// Validates a vector against the store's configured dimension.
pub fn validate_dimension(vector: &[f32], dimension: usize) -> Result<(), ValidationError> {
    if vector.len() != dimension {
        return Err(ValidationError::dimension_mismatch(dimension, vector.len()));
    }
    Ok(())
}

/// Strips reserved keys and validates the serialized size of a metadata map.
pub fn sanitize_and_validate_metadata(mut metadata: Metadata) -> Result<Metadata, ValidationError> {
    strip_reserved_keys(&mut metadata);
    let size = bincode::serialized_size(&metadata)
        .map(|n| n as usize)
        .unwrap_or(usize::MAX);
    if size > MAX_METADATA_BYTES {
        return Err(ValidationError::too_large("metadata", size, MAX_METADATA_BYTES));
    }
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_id_rejects_empty() {
        assert!(validate_id("").is_err());
    }

    #[test]
    fn test_validate_id_rejects_null_byte() {
        assert!(validate_id("a\0b").is_err());
    }

    #[test]
    fn test_validate_id_rejects_too_long() {
        let id = "a".repeat(MAX_ID_LEN + 1);
        assert!(validate_id(&id).is_err());
    }

    #[test]
    fn test_validate_id_accepts_normal() {
        assert!(validate_id("vec-1").is_ok());
    }

    #[test]
    fn test_validate_dimension_mismatch() {
        assert!(validate_dimension(&[1.0, 2.0], 3).is_err());
        assert!(validate_dimension(&[1.0, 2.0, 3.0], 3).is_ok());
    }

    #[test]
    fn test_sanitize_strips_reserved_keys() {
        use crate::types::MetadataValue;
        let mut meta = Metadata::new();
        meta.insert("__proto__".into(), MetadataValue::Bool(true));
        meta.insert("color".into(), MetadataValue::String("red".into()));
        let sanitized = sanitize_and_validate_metadata(meta).unwrap();
        assert_eq!(sanitized.len(), 1);
    }
}
