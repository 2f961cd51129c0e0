//! Append-only witness chain over store mutations.
//!
//! Each mutating operation (insert, delete, flush, compact) appends a
//! fixed-size 73-byte entry: a 1-byte operation tag, a 32-byte hash of
//! the previous entry, a 32-byte hash of the operation's payload, and
//! an 8-byte big-endian epoch counter. Entries are hashed with
//! SHAKE-256 (arbitrary-length output truncated to 32 bytes), which is
//! what `sha3` exposes as `Shake256`.
//!
//! `derive()`d stores fork the chain: the child's first entry's
//! prev-hash is the parent's last entry hash at the fork point, so
//! `verify()` on a child can detect tampering with its own history
//! without re-validating the entire parent chain.

use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake256;

use crate::error::IntegrityError;

/// Size in bytes of one serialized witness entry.
pub const ENTRY_SIZE: usize = 73;

const HASH_SIZE: usize = 32;

/// The operation a witness entry records.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum WitnessOp {
    /// A single vector insert or upsert.
    Insert = 0,
    /// A batch insert.
    InsertBatch = 1,
    /// A soft-delete (tombstone).
    Delete = 2,
    /// A flush of the pending-write buffer to the segment log.
    Flush = 3,
    /// A compaction pass.
    Compact = 4,
    /// Creation of a derived (forked) store.
    Derive = 5,
    /// A contrastive trainer batch step.
    Train = 6,
    /// A solver acceptance cycle.
    Acceptance = 7,
}

impl WitnessOp {
    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Insert),
            1 => Some(Self::InsertBatch),
            2 => Some(Self::Delete),
            3 => Some(Self::Flush),
            4 => Some(Self::Compact),
            5 => Some(Self::Derive),
            6 => Some(Self::Train),
            7 => Some(Self::Acceptance),
            _ => None,
        }
    }
}

/// One entry in the witness chain: 73 bytes on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WitnessEntry {
    /// The operation this entry records.
    pub op: WitnessOp,
    /// Hash of the previous entry (or the fork's genesis hash for the
    /// first entry of a derived chain).
    pub prev_hash: [u8; HASH_SIZE],
    /// Hash of the operation's payload (e.g. the inserted vector + metadata).
    pub payload_hash: [u8; HASH_SIZE],
    /// Monotonically increasing epoch counter.
    pub epoch: u64,
}

impl WitnessEntry {
    /// Serializes the entry to its fixed 73-byte wire form.
    pub fn to_bytes(&self) -> [u8; ENTRY_SIZE] {
        let mut buf = [0u8; ENTRY_SIZE];
        buf[0] = self.op as u8;
        buf[1..33].copy_from_slice(&self.prev_hash);
        buf[33..65].copy_from_slice(&self.payload_hash);
        buf[65..73].copy_from_slice(&self.epoch.to_be_bytes());
        buf
    }

    /// Parses a 73-byte wire entry.
    pub fn from_bytes(buf: &[u8; ENTRY_SIZE]) -> Option<Self> {
        let op = WitnessOp::from_tag(buf[0])?;
        let mut prev_hash = [0u8; HASH_SIZE];
        prev_hash.copy_from_slice(&buf[1..33]);
        let mut payload_hash = [0u8; HASH_SIZE];
        payload_hash.copy_from_slice(&buf[33..65]);
        let mut epoch_bytes = [0u8; 8];
        epoch_bytes.copy_from_slice(&buf[65..73]);
        Some(Self {
            op,
            prev_hash,
            payload_hash,
            epoch: u64::from_be_bytes(epoch_bytes),
        })
    }

    /// The entry's own hash, used as the next entry's `prev_hash`.
    pub fn hash(&self) -> [u8; HASH_SIZE] {
        shake256_32(&self.to_bytes())
    }
}

/// Hashes arbitrary bytes to a 32-byte SHAKE-256 digest.
pub fn shake256_32(data: &[u8]) -> [u8; HASH_SIZE] {
    let mut hasher = Shake256::default();
    hasher.update(data);
    let mut out = [0u8; HASH_SIZE];
    hasher.finalize_xof().read(&mut out);
    out
}

/// The all-zero hash used as the prev-hash of the very first entry in
/// a root (non-derived) store.
pub const GENESIS_HASH: [u8; HASH_SIZE] = [0u8; HASH_SIZE];

/// Outcome of [`WitnessChain::verify`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VerifyReport {
    /// Whether every entry's `prev_hash` matched the hash of its predecessor.
    pub valid: bool,
    /// Total number of entries examined.
    pub entry_count: u64,
    /// Index of the first mismatching entry, if any.
    pub first_mismatch_at: Option<u64>,
}

/// An in-memory, append-only chain of witness entries.
///
/// Entries are also persisted as a segment in the store's container
/// file; this type is the in-memory working copy the store mutates and
/// verifies against.
#[derive(Clone, Debug)]
pub struct WitnessChain {
    entries: Vec<WitnessEntry>,
    genesis: [u8; HASH_SIZE],
    next_epoch: u64,
}

impl WitnessChain {
    /// Creates a new chain rooted at the genesis hash (all zeros).
    pub fn new() -> Self {
        Self::forked_from(GENESIS_HASH)
    }

    /// Creates a new chain forked from a parent's last-entry hash, for
    /// use by `derive()`.
    pub fn forked_from(genesis: [u8; HASH_SIZE]) -> Self {
        Self {
            entries: Vec::new(),
            genesis,
            next_epoch: 0,
        }
    }

    /// Reconstructs a chain from previously persisted entries.
    pub fn from_entries(entries: Vec<WitnessEntry>, genesis: [u8; HASH_SIZE]) -> Self {
        let next_epoch = entries.last().map(|e| e.epoch + 1).unwrap_or(0);
        Self {
            entries,
            genesis,
            next_epoch,
        }
    }

    /// Appends a new entry recording `op` over `payload`, returning the
    /// entry that was appended.
    pub fn record(&mut self, op: WitnessOp, payload: &[u8]) -> WitnessEntry {
        let prev_hash = self
            .entries
            .last()
            .map(|e| e.hash())
            .unwrap_or(self.genesis);
        let entry = WitnessEntry {
            op,
            prev_hash,
            payload_hash: shake256_32(payload),
            epoch: self.next_epoch,
        };
        self.next_epoch += 1;
        self.entries.push(entry.clone());
        entry
    }

    /// Number of entries recorded so far.
    pub fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Whether the chain has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The hash a derived child should use as its genesis, i.e. this
    /// chain's current tip.
    pub fn tip_hash(&self) -> [u8; HASH_SIZE] {
        self.entries.last().map(|e| e.hash()).unwrap_or(self.genesis)
    }

    /// All recorded entries, in order.
    pub fn entries(&self) -> &[WitnessEntry] {
        &self.entries
    }

    /// Walks the chain verifying that every entry's `prev_hash` matches
    /// the hash of its predecessor (or the genesis hash for the first
    /// entry).
    pub fn verify(&self) -> VerifyReport {
        let mut expected = self.genesis;
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.prev_hash != expected {
                return VerifyReport {
                    valid: false,
                    entry_count: self.entries.len() as u64,
                    first_mismatch_at: Some(i as u64),
                };
            }
            expected = entry.hash();
        }
        VerifyReport {
            valid: true,
            entry_count: self.entries.len() as u64,
            first_mismatch_at: None,
        }
    }

    /// Returns `Ok(())` if the chain verifies, otherwise an
    /// [`IntegrityError::WitnessMismatch`] naming the first bad entry.
    pub fn verify_or_err(&self) -> Result<(), IntegrityError> {
        let report = self.verify();
        if report.valid {
            Ok(())
        } else {
            Err(IntegrityError::witness_mismatch(
                report.first_mismatch_at.unwrap_or(0),
            ))
        }
    }
}

impl Default for WitnessChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_roundtrip() {
        let entry = WitnessEntry {
            op: WitnessOp::Insert,
            prev_hash: [1u8; HASH_SIZE],
            payload_hash: [2u8; HASH_SIZE],
            epoch: 42,
        };
        let bytes = entry.to_bytes();
        assert_eq!(bytes.len(), ENTRY_SIZE);
        let parsed = WitnessEntry::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn test_empty_chain_verifies() {
        let chain = WitnessChain::new();
        let report = chain.verify();
        assert!(report.valid);
        assert_eq!(report.entry_count, 0);
    }

    #[test]
    fn test_chain_grows_and_verifies() {
        let mut chain = WitnessChain::new();
        chain.record(WitnessOp::Insert, b"vector-1-payload");
        chain.record(WitnessOp::Insert, b"vector-2-payload");
        chain.record(WitnessOp::Delete, b"vector-1");
        let report = chain.verify();
        assert!(report.valid);
        assert_eq!(report.entry_count, 3);
    }

    #[test]
    fn test_tampering_detected_at_correct_offset() {
        let mut chain = WitnessChain::new();
        chain.record(WitnessOp::Insert, b"a");
        chain.record(WitnessOp::Insert, b"b");
        chain.record(WitnessOp::Insert, b"c");

        let mut entries = chain.entries().to_vec();
        entries[1].payload_hash = [0xffu8; HASH_SIZE];
        let tampered = WitnessChain::from_entries(entries, GENESIS_HASH);

        let report = tampered.verify();
        assert!(!report.valid);
        assert_eq!(report.first_mismatch_at, Some(2));
    }

    #[test]
    fn test_derived_chain_forks_from_parent_tip() {
        let mut parent = WitnessChain::new();
        parent.record(WitnessOp::Insert, b"a");
        parent.record(WitnessOp::Insert, b"b");

        let mut child = WitnessChain::forked_from(parent.tip_hash());
        child.record(WitnessOp::Derive, b"fork-marker");
        child.record(WitnessOp::Insert, b"c");

        assert!(child.verify().valid);
        assert_ne!(child.entries()[0].prev_hash, GENESIS_HASH);
    }

    #[test]
    fn test_from_entries_resumes_epoch() {
        let mut chain = WitnessChain::new();
        chain.record(WitnessOp::Insert, b"a");
        chain.record(WitnessOp::Insert, b"b");
        let resumed = WitnessChain::from_entries(chain.entries().to_vec(), GENESIS_HASH);
        assert_eq!(resumed.next_epoch, 2);
    }
}
