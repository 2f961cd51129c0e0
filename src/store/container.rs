//! Single-file container backing a [`super::VectorStore`].
//!
//! The container is a [`redb`] database: a single-file, ACID key-value
//! store that already gives us the crash-safe, single-writer/
//! multiple-reader file semantics spec.md §6 asks for. Its tables stand
//! in for spec.md's length-prefixed segment sequence:
//!
//! | Segment (spec.md §6) | Table |
//! |---|---|
//! | header (magic/version/dimension/metric/HNSW params) | [`HEADER_TABLE`] |
//! | vector-row | [`VECTORS_TABLE`] |
//! | witness-block | [`WITNESS_TABLE`] |
//! | tombstone-bitmap | the `tombstoned` flag on each vector row |
//! | compaction-marker | `header.compaction_epoch` |
//!
//! A writer-opened container holds an advisory exclusive lock (via
//! `fs2`) on a `.lock` sidecar file for the process's lifetime; a
//! reader-opened container takes no lock, matching spec.md §6's
//! "readonly open acquires no write lock" rule. The HNSW graph-layer
//! and kernel/ebpf-blob segment kinds named in spec.md are not
//! persisted: the graph is rebuilt from vector rows on load (see
//! `super::VectorStore::load`), and no kernel/ebpf payload is produced
//! by this engine.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::config::HnswConfig;
use crate::error::{RvfError, StorageError};
use crate::types::Metric;
use crate::witness::WitnessEntry;

use super::record::VectorRecord;

/// Header/metadata table: a handful of string keys to bincode blobs.
const HEADER_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("rvf_header");
/// Vector rows, keyed by caller id.
const VECTORS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("rvf_vectors");
/// Witness entries, keyed by big-endian epoch.
const WITNESS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("rvf_witness");

const HEADER_KEY: &str = "header";

/// Current container format version. Bumped on incompatible layout changes.
pub const FORMAT_VERSION: u32 = 1;

/// Persisted store-level header: everything needed to reopen a store
/// without the caller re-specifying configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContainerHeader {
    /// Container format version.
    pub version: u32,
    /// Fixed vector dimension.
    pub dimension: usize,
    /// Distance metric, immutable after creation.
    pub metric: Metric,
    /// HNSW build parameters used for this store.
    pub hnsw: HnswConfig,
    /// Genesis hash for this store's witness chain: all-zero for a root
    /// store, or the parent's tip hash for a `derive()`d child.
    pub witness_genesis: [u8; 32],
    /// Lineage depth: 0 for a root store, parent depth + 1 for a derived one.
    pub lineage_depth: u64,
    /// Number of compaction passes applied so far.
    pub compaction_epoch: u64,
}

/// Open-mode for a container: readers take no lock, writers do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    /// Read-only: search/stats callers that never mutate the file.
    ReadOnly,
    /// Read-write: acquires an advisory exclusive lock for the container's lifetime.
    ReadWrite,
}

/// The single-file container.
pub struct Container {
    db: Database,
    path: PathBuf,
    /// Held for the container's lifetime in `ReadWrite` mode; releases
    /// the advisory lock on drop.
    _lock_file: Option<File>,
}

impl Container {
    /// Creates a brand-new container at `path` with the given header.
    pub fn create(path: impl AsRef<Path>, header: &ContainerHeader) -> Result<Self, RvfError> {
        let path = path.as_ref();
        let lock_file = Self::acquire_lock(path)?;
        let db = Database::create(path)
            .map_err(|e| StorageError::io("create container", std::io::Error::other(e.to_string())))?;

        let write_txn = db
            .begin_write()
            .map_err(|e| StorageError::corrupted(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(HEADER_TABLE)
                .map_err(|e| StorageError::corrupted(e.to_string()))?;
            let bytes = bincode::serialize(header)?;
            table
                .insert(HEADER_KEY, bytes.as_slice())
                .map_err(|e| StorageError::corrupted(e.to_string()))?;
            let _ = write_txn
                .open_table(VECTORS_TABLE)
                .map_err(|e| StorageError::corrupted(e.to_string()))?;
            let _ = write_txn
                .open_table(WITNESS_TABLE)
                .map_err(|e| StorageError::corrupted(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| StorageError::corrupted(e.to_string()))?;

        Ok(Self {
            db,
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Opens an existing container.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self, RvfError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StorageError::NotFound(path.to_path_buf()).into());
        }
        let lock_file = match mode {
            OpenMode::ReadWrite => Self::acquire_lock(path)?,
            OpenMode::ReadOnly => None,
        };
        let db = Database::open(path)
            .map_err(|e| StorageError::corrupted(format!("cannot open container: {e}")))?;
        Ok(Self {
            db,
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    fn acquire_lock(path: &Path) -> Result<Option<File>, RvfError> {
        let lock_path = Self::lock_path(path);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| StorageError::io("open lock file", e))?;
        file.try_lock_exclusive().map_err(|_| StorageError::Locked)?;
        Ok(Some(file))
    }

    fn lock_path(path: &Path) -> PathBuf {
        let mut os = path.as_os_str().to_owned();
        os.push(".lock");
        PathBuf::from(os)
    }

    /// The container's file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the persisted header.
    pub fn read_header(&self) -> Result<ContainerHeader, RvfError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| StorageError::corrupted(e.to_string()))?;
        let table = read_txn
            .open_table(HEADER_TABLE)
            .map_err(|e| StorageError::corrupted(e.to_string()))?;
        let bytes = table
            .get(HEADER_KEY)
            .map_err(|e| StorageError::corrupted(e.to_string()))?
            .ok_or_else(|| StorageError::corrupted("missing container header"))?;
        let header: ContainerHeader = bincode::deserialize(bytes.value())?;
        Ok(header)
    }

    /// Overwrites the persisted header (used after compaction to bump
    /// `compaction_epoch`).
    pub fn write_header(&self, header: &ContainerHeader) -> Result<(), RvfError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StorageError::corrupted(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(HEADER_TABLE)
                .map_err(|e| StorageError::corrupted(e.to_string()))?;
            let bytes = bincode::serialize(header)?;
            table
                .insert(HEADER_KEY, bytes.as_slice())
                .map_err(|e| StorageError::corrupted(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| StorageError::corrupted(e.to_string()))?;
        Ok(())
    }

    /// Writes a batch of vector rows (inserts or tombstone updates) and
    /// appends a batch of witness entries, atomically in one transaction.
    ///
    /// Either every record and every witness entry lands, or (on error)
    /// none of them do: the spec requires a batch never persists
    /// partially.
    pub fn write_batch(
        &self,
        records: &[VectorRecord],
        witness_entries: &[WitnessEntry],
    ) -> Result<(), RvfError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StorageError::corrupted(e.to_string()))?;
        {
            let mut vectors = write_txn
                .open_table(VECTORS_TABLE)
                .map_err(|e| StorageError::corrupted(e.to_string()))?;
            for record in records {
                let bytes = bincode::serialize(record)?;
                vectors
                    .insert(record.id.as_str(), bytes.as_slice())
                    .map_err(|e| StorageError::corrupted(e.to_string()))?;
            }
            let mut witness = write_txn
                .open_table(WITNESS_TABLE)
                .map_err(|e| StorageError::corrupted(e.to_string()))?;
            for entry in witness_entries {
                let bytes = entry.to_bytes();
                witness
                    .insert(entry.epoch, bytes.as_slice())
                    .map_err(|e| StorageError::corrupted(e.to_string()))?;
            }
        }
        write_txn
            .commit()
            .map_err(|e| StorageError::corrupted(e.to_string()))?;
        Ok(())
    }

    /// Reads a single vector row by id.
    pub fn get_vector(&self, id: &str) -> Result<Option<VectorRecord>, RvfError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| StorageError::corrupted(e.to_string()))?;
        let table = read_txn
            .open_table(VECTORS_TABLE)
            .map_err(|e| StorageError::corrupted(e.to_string()))?;
        let Some(bytes) = table.get(id).map_err(|e| StorageError::corrupted(e.to_string()))? else {
            return Ok(None);
        };
        let record: VectorRecord = bincode::deserialize(bytes.value())?;
        Ok(Some(record))
    }

    /// Reads every vector row (including tombstoned ones), e.g. to
    /// rebuild the HNSW graph on open.
    pub fn iter_all_vectors(&self) -> Result<Vec<VectorRecord>, RvfError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| StorageError::corrupted(e.to_string()))?;
        let table = read_txn
            .open_table(VECTORS_TABLE)
            .map_err(|e| StorageError::corrupted(e.to_string()))?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(|e| StorageError::corrupted(e.to_string()))? {
            let (_, value) = entry.map_err(|e| StorageError::corrupted(e.to_string()))?;
            let record: VectorRecord = bincode::deserialize(value.value())?;
            out.push(record);
        }
        Ok(out)
    }

    /// Reads the full witness chain in epoch order.
    pub fn iter_witness_entries(&self) -> Result<Vec<WitnessEntry>, RvfError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| StorageError::corrupted(e.to_string()))?;
        let table = read_txn
            .open_table(WITNESS_TABLE)
            .map_err(|e| StorageError::corrupted(e.to_string()))?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(|e| StorageError::corrupted(e.to_string()))? {
            let (_, value) = entry.map_err(|e| StorageError::corrupted(e.to_string()))?;
            let bytes: [u8; crate::witness::ENTRY_SIZE] = value
                .value()
                .try_into()
                .map_err(|_| StorageError::corrupted("malformed witness entry"))?;
            let parsed = WitnessEntry::from_bytes(&bytes)
                .ok_or_else(|| StorageError::corrupted("unrecognized witness op tag"))?;
            out.push(parsed);
        }
        Ok(out)
    }

    /// Rewrites the vectors table from scratch, dropping any row not in
    /// `live_records` (used by `compact()` to drop tombstones).
    pub fn rewrite_vectors(&self, live_records: &[VectorRecord]) -> Result<u64, RvfError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StorageError::corrupted(e.to_string()))?;
        let reclaimed;
        {
            let mut table = write_txn
                .open_table(VECTORS_TABLE)
                .map_err(|e| StorageError::corrupted(e.to_string()))?;
            let before: Vec<String> = table
                .iter()
                .map_err(|e| StorageError::corrupted(e.to_string()))?
                .filter_map(|r| r.ok().map(|(k, _)| k.value().to_string()))
                .collect();
            reclaimed = before.len() as u64;
            for id in &before {
                table
                    .remove(id.as_str())
                    .map_err(|e| StorageError::corrupted(e.to_string()))?;
            }
            for record in live_records {
                let bytes = bincode::serialize(record)?;
                table
                    .insert(record.id.as_str(), bytes.as_slice())
                    .map_err(|e| StorageError::corrupted(e.to_string()))?;
            }
        }
        write_txn
            .commit()
            .map_err(|e| StorageError::corrupted(e.to_string()))?;
        Ok(reclaimed.saturating_sub(live_records.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_header() -> ContainerHeader {
        ContainerHeader {
            version: FORMAT_VERSION,
            dimension: 4,
            metric: Metric::Cosine,
            hnsw: HnswConfig::default(),
            witness_genesis: [0u8; 32],
            lineage_depth: 0,
            compaction_epoch: 0,
        }
    }

    fn test_record(id: &str) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            vector: vec![1.0, 0.0, 0.0, 0.0],
            metadata: Default::default(),
            created_at: crate::types::Timestamp::now(),
            tombstoned: false,
        }
    }

    #[test]
    fn test_create_and_reopen_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.rvf");
        {
            let container = Container::create(&path, &test_header()).unwrap();
            container.write_batch(&[test_record("a")], &[]).unwrap();
        }
        let reopened = Container::open(&path, OpenMode::ReadWrite).unwrap();
        let header = reopened.read_header().unwrap();
        assert_eq!(header.dimension, 4);
        let record = reopened.get_vector("a").unwrap().unwrap();
        assert_eq!(record.vector, vec![1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_writer_lock_excludes_second_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.rvf");
        let _first = Container::create(&path, &test_header()).unwrap();
        let second = Container::open(&path, OpenMode::ReadWrite);
        assert!(second.is_err());
    }

    #[test]
    fn test_readonly_open_takes_no_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.rvf");
        let writer = Container::create(&path, &test_header()).unwrap();
        let reader = Container::open(&path, OpenMode::ReadOnly);
        assert!(reader.is_ok());
        drop(writer);
    }

    #[test]
    fn test_rewrite_vectors_drops_tombstones() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.rvf");
        let container = Container::create(&path, &test_header()).unwrap();
        container
            .write_batch(&[test_record("a"), test_record("b")], &[])
            .unwrap();
        let reclaimed = container.rewrite_vectors(&[test_record("a")]).unwrap();
        assert_eq!(reclaimed, 1);
        assert!(container.get_vector("b").unwrap().is_none());
        assert!(container.get_vector("a").unwrap().is_some());
    }
}
