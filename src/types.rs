//! Core type definitions shared across the engine: timestamps, metadata
//! scalars, and the distance metric enum. Vector ids are caller-supplied
//! `String`s (see [`crate::store::validate_vector_id`]) rather than a
//! minted type, since the spec requires the caller to choose them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Millisecond-resolution timestamp, matching wall-clock time.
///
/// Stored as `i64` milliseconds since the Unix epoch so it serializes
/// compactly and orders correctly as big-endian bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Returns the current time.
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Self(millis)
    }

    /// Constructs a timestamp from raw milliseconds.
    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the raw milliseconds.
    #[inline]
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Big-endian encoding, used for lexicographically-ordered index keys.
    #[inline]
    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Milliseconds elapsed since `self`, clamped to 0 if `self` is in the future.
    pub fn elapsed_ms_since(&self, now: Timestamp) -> u64 {
        (now.0 - self.0).max(0) as u64
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A JSON-scalar metadata value: string, number, boolean, or null.
///
/// Metadata maps are bounded (serialized size capped, see
/// [`crate::store::schema`]) and never hold nested objects/arrays — this
/// is the typed replacement for the source's polymorphic metadata map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// UTF-8 string value.
    String(String),
    /// Double-precision number.
    Number(f64),
    /// Boolean value.
    Bool(bool),
    /// Explicit null (distinct from a missing key).
    Null,
}

impl MetadataValue {
    /// Returns the value as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Returns the value as a number, if it is one.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Metadata map attached to a vector record.
///
/// An ordered map keeps serialization deterministic, which matters for
/// the witness chain's payload hash.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Reserved metadata keys stripped on insert to avoid prototype-pollution
/// style surprises for downstream consumers that deserialize metadata
/// into dynamically-typed objects.
pub const RESERVED_METADATA_KEYS: &[&str] = &["__proto__", "constructor", "prototype"];

/// Strips [`RESERVED_METADATA_KEYS`] from a metadata map in place.
pub fn strip_reserved_keys(metadata: &mut Metadata) {
    for key in RESERVED_METADATA_KEYS {
        metadata.remove(*key);
    }
}

/// Distance metric used by a store's HNSW graph.
///
/// Chosen at store creation and immutable thereafter (the graph's
/// geometry and similarity conversion both depend on it).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    /// Cosine distance; similarity is `1 - distance`.
    Cosine,
    /// Euclidean (L2) distance; similarity is `exp(-distance)`.
    L2,
    /// Negative inner product as a distance; similarity is `-distance`.
    InnerProduct,
}

impl Metric {
    /// Converts a raw graph distance into the spec's similarity score.
    pub fn similarity(&self, distance: f32) -> f32 {
        match self {
            Metric::Cosine => 1.0 - distance,
            Metric::L2 => (-distance).exp(),
            Metric::InnerProduct => -distance,
        }
    }

    /// Short tag used in persisted file headers.
    pub fn tag(&self) -> u8 {
        match self {
            Metric::Cosine => 0,
            Metric::L2 => 1,
            Metric::InnerProduct => 2,
        }
    }

    /// Parses a header tag back into a metric.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Metric::Cosine),
            1 => Some(Metric::L2),
            2 => Some(Metric::InnerProduct),
            _ => None,
        }
    }
}

/// Internally-minted session identifier (UUID v7, time-ordered).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionUuid(pub Uuid);

impl SessionUuid {
    /// Creates a new time-ordered session id.
    #[inline]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SessionUuid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Internally-minted trajectory identifier (UUID v7, time-ordered).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrajectoryId(pub Uuid);

impl TrajectoryId {
    /// Creates a new time-ordered trajectory id.
    #[inline]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for TrajectoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrajectoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Clamps a feedback/quality score into `[0, 1]`.
pub fn clamp_quality(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}
