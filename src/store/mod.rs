//! The persistent, HNSW-indexed vector store.
//!
//! [`VectorStore`] is the engine's storage layer: single-writer,
//! multiple-reader access to a single-file [`container`], a derived
//! in-memory [`crate::vector::HnswIndex`], and an append-only
//! [`crate::witness::WitnessChain`] recording every mutation.
//!
//! Inserts are buffered (see [`Config::batch_threshold`]) and flushed
//! as a single transaction; searches always flush first, so a search
//! never observes a write the caller believes already happened but the
//! store hasn't yet durably recorded.

pub mod container;
pub mod record;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use tracing::{info, instrument, warn};

use crate::cancellation::CancellationToken;
use crate::config::Config;
use crate::error::{ResourceError, Result, RvfError, StorageError, ValidationError};
use crate::search::Filter;
use crate::types::{Metadata, Metric, Timestamp};
use crate::vector::{HnswIndex, VectorIndex};
use crate::witness::{WitnessChain, WitnessOp};

use container::{Container, ContainerHeader, OpenMode, FORMAT_VERSION};
use record::VectorRecord;

pub use record::{validate_dimension, validate_id, MAX_ID_LEN, MAX_METADATA_BYTES};

/// Options accepted by [`VectorStore::search`].
#[derive(Clone, Debug, Default)]
pub struct SearchOptions {
    /// Explicit `ef_search` override. Per spec.md §9's Open Question
    /// resolution, an explicit value here always wins over any
    /// policy-suggested hint the caller (typically the orchestrator)
    /// may have derived elsewhere.
    pub ef_search: Option<usize>,
    /// Metadata filter evaluated against each HNSW candidate.
    pub filter: Option<Filter>,
    /// Cooperative cancellation handle, checked between candidate batches.
    pub cancellation: Option<CancellationToken>,
}

/// One search hit.
#[derive(Clone, Debug)]
pub struct SearchResult {
    /// The matching record's id.
    pub id: String,
    /// Raw graph distance in the store's metric space.
    pub distance: f32,
    /// Similarity score derived from `distance` (higher is closer).
    pub similarity: f32,
    /// The record's metadata at the time of the search.
    pub metadata: Metadata,
}

/// Snapshot statistics about a store.
#[derive(Clone, Debug)]
pub struct Stats {
    /// Live (non-tombstoned) vector count, including buffered-but-unflushed inserts.
    pub count: usize,
    /// Tombstoned rows still occupying the file (reclaimed by `compact()`).
    pub tombstoned: usize,
    /// Buffered inserts not yet flushed.
    pub pending: usize,
    /// Configured dimension.
    pub dimension: usize,
    /// Configured metric.
    pub metric: Metric,
}

/// Result of a [`VectorStore::compact`] call.
#[derive(Clone, Copy, Debug, Default)]
pub struct CompactionReport {
    /// Number of tombstoned rows dropped from the file.
    pub segments_compacted: usize,
    /// Approximate bytes reclaimed (serialized size of dropped rows).
    pub bytes_reclaimed: usize,
}

struct Inner {
    container: Container,
    index: HnswIndex,
    witness: WitnessChain,
    /// Cache of every row (including tombstoned), mirroring the container.
    records: HashMap<String, VectorRecord>,
}

/// A single-file, HNSW-indexed vector store.
///
/// `insert*`/`remove`/`flush`/`compact` must be serialized by the
/// caller (single-writer model); `search`/`stats` may run concurrently
/// with each other and see a snapshot consistent with the most
/// recently completed flush.
pub struct VectorStore {
    config: Config,
    inner: RwLock<Inner>,
    pending: Mutex<Vec<VectorRecord>>,
}

impl VectorStore {
    /// Creates a new store at `path`, or opens it if it already exists
    /// and its header matches `config`.
    #[instrument(skip(config), fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path, config);
        }

        let header = ContainerHeader {
            version: FORMAT_VERSION,
            dimension: config.dimension,
            metric: config.metric,
            hnsw: config.hnsw.clone(),
            witness_genesis: crate::witness::GENESIS_HASH,
            lineage_depth: 0,
            compaction_epoch: 0,
        };
        let container = Container::create(path, &header)?;
        let index = HnswIndex::new(config.dimension, config.metric, &config.hnsw);
        info!(dimension = config.dimension, "created new vector store");
        Ok(Self {
            config,
            inner: RwLock::new(Inner {
                container,
                index,
                witness: WitnessChain::new(),
                records: HashMap::new(),
            }),
            pending: Mutex::new(Vec::new()),
        })
    }

    /// Loads an existing store from `path`, rebuilding the HNSW graph
    /// and witness chain from the container's persisted rows/entries.
    #[instrument(skip(config), fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        config.validate()?;
        let container = Container::open(path, OpenMode::ReadWrite)?;
        let header = container.read_header()?;
        if header.dimension != config.dimension {
            return Err(ValidationError::dimension_mismatch(config.dimension, header.dimension).into());
        }
        if header.metric != config.metric {
            return Err(ValidationError::invalid_field("metric", "does not match store header").into());
        }

        let rows = container.iter_all_vectors()?;
        let live: Vec<(String, Vec<f32>)> = rows
            .iter()
            .filter(|r| !r.tombstoned)
            .map(|r| (r.id.clone(), r.vector.clone()))
            .collect();
        let tombstoned_ids: Vec<String> = rows
            .iter()
            .filter(|r| r.tombstoned)
            .map(|r| r.id.clone())
            .collect();

        let index = HnswIndex::rebuild_from_records(header.dimension, header.metric, &header.hnsw, live)?;
        index.restore_deleted_set(&tombstoned_ids)?;

        let entries = container.iter_witness_entries()?;
        let witness = WitnessChain::from_entries(entries, header.witness_genesis);
        witness.verify_or_err()?;

        let records = rows.into_iter().map(|r| (r.id.clone(), r)).collect();

        info!(count = index.len(), "opened existing vector store");
        Ok(Self {
            config,
            inner: RwLock::new(Inner {
                container,
                index,
                witness,
                records,
            }),
            pending: Mutex::new(Vec::new()),
        })
    }

    fn lock_inner(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| StorageError::corrupted("store state lock poisoned").into())
    }

    fn lock_inner_read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| StorageError::corrupted("store state lock poisoned").into())
    }

    /// Validates and buffers a single insert. Flushes automatically once
    /// the buffer reaches `config.batch_threshold`.
    #[instrument(skip(self, vector, metadata), fields(id = %id))]
    pub fn insert(&self, id: &str, vector: &[f32], metadata: Option<Metadata>) -> Result<()> {
        self.insert_batch(std::slice::from_ref(&(id.to_string(), vector.to_vec(), metadata)))
    }

    /// Validates and buffers a batch of inserts.
    ///
    /// Validation happens for the whole batch before anything is
    /// buffered: a single invalid entry rejects the entire call and
    /// leaves the store unchanged.
    pub fn insert_batch(&self, items: &[(String, Vec<f32>, Option<Metadata>)]) -> Result<()> {
        let now = Timestamp::now();
        let mut records = Vec::with_capacity(items.len());
        for (id, vector, metadata) in items {
            validate_id(id)?;
            validate_dimension(vector, self.config.dimension)?;
            let metadata = record::sanitize_and_validate_metadata(metadata.clone().unwrap_or_default())?;
            records.push(VectorRecord {
                id: id.clone(),
                vector: vector.clone(),
                metadata,
                created_at: now,
                tombstoned: false,
            });
        }

        let mut pending = self
            .pending
            .lock()
            .map_err(|_| StorageError::corrupted("pending buffer lock poisoned"))?;

        if pending.len() + records.len() > self.config.max_pending_writes {
            return Err(ResourceError::pending_write_cap_exceeded(
                pending.len() + records.len(),
                self.config.max_pending_writes,
            )
            .into());
        }
        pending.extend(records);
        let should_flush = pending.len() >= self.config.batch_threshold;
        drop(pending);

        if should_flush {
            self.flush()?;
        }
        Ok(())
    }

    /// Flushes any buffered inserts to the container and HNSW index as
    /// a single transaction. A no-op if nothing is buffered.
    ///
    /// Every buffered record gets its own `insert:<id>` witness entry
    /// (spec.md §2, §8.4) even though the whole batch lands in the
    /// container as one transaction — the witness chain's entry count
    /// tracks logical mutations, not flush calls.
    #[instrument(skip(self))]
    pub fn flush(&self) -> Result<()> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| StorageError::corrupted("pending buffer lock poisoned"))?;
        if pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut *pending);
        drop(pending);

        let mut inner = self.lock_inner()?;
        let entries: Vec<_> = batch
            .iter()
            .map(|record| inner.witness.record(WitnessOp::Insert, &record_payload(record)))
            .collect();
        inner.container.write_batch(&batch, &entries)?;

        let items: Vec<(String, Vec<f32>)> = batch.iter().map(|r| (r.id.clone(), r.vector.clone())).collect();
        inner.index.insert_batch(&items)?;
        for record in batch {
            inner.records.insert(record.id.clone(), record);
        }
        Ok(())
    }

    /// Searches for the `k` nearest neighbors to `query`.
    ///
    /// Flushes pending writes first, so the search always reflects
    /// every insert the caller believes completed.
    #[instrument(skip(self, query, options))]
    pub fn search(&self, query: &[f32], k: usize, options: SearchOptions) -> Result<Vec<SearchResult>> {
        self.flush()?;
        validate_dimension(query, self.config.dimension)?;
        if let Some(filter) = &options.filter {
            filter.validate().map_err(RvfError::Validation)?;
        }
        if let Some(token) = &options.cancellation {
            token.check("search:start")?;
        }

        let inner = self.lock_inner_read()?;
        let ef_search = options.ef_search.unwrap_or(self.config.hnsw.ef_search);
        let records = &inner.records;
        let filter = options.filter.clone();
        let predicate = move |id: &str| -> bool {
            match records.get(id) {
                Some(r) if !r.tombstoned => filter.as_ref().is_none_or(|f| f.matches(&r.metadata)),
                _ => false,
            }
        };

        let hits = inner.index.search_filtered(query, k, ef_search, &predicate)?;
        if let Some(token) = &options.cancellation {
            token.check("search:post-traversal")?;
        }

        let metric = self.config.metric;
        let mut results: Vec<SearchResult> = hits
            .into_iter()
            .filter_map(|(id, distance)| {
                inner.records.get(&id).map(|r| SearchResult {
                    id,
                    distance,
                    similarity: metric.similarity(distance),
                    metadata: r.metadata.clone(),
                })
            })
            .collect();
        results.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        Ok(results)
    }

    /// Marks `id` as deleted. Returns whether it was present (and not
    /// already tombstoned).
    #[instrument(skip(self), fields(id = %id))]
    pub fn remove(&self, id: &str) -> Result<bool> {
        self.flush()?;
        let mut inner = self.lock_inner()?;
        let present = matches!(inner.records.get(id), Some(r) if !r.tombstoned);
        if !present {
            return Ok(false);
        }
        inner.index.delete(id)?;
        let record = {
            let r = inner.records.get_mut(id).expect("checked above");
            r.tombstoned = true;
            r.clone()
        };
        let entry = inner.witness.record(WitnessOp::Delete, id.as_bytes());
        inner.container.write_batch(std::slice::from_ref(&record), std::slice::from_ref(&entry))?;
        Ok(true)
    }

    /// Rewrites the container dropping tombstones, rebuilds the HNSW
    /// graph, and records a `compact` witness event.
    #[instrument(skip(self))]
    pub fn compact(&self) -> Result<CompactionReport> {
        self.flush()?;
        let mut inner = self.lock_inner()?;

        let live: Vec<VectorRecord> = inner.records.values().filter(|r| !r.tombstoned).cloned().collect();
        let dropped: Vec<&VectorRecord> = inner.records.values().filter(|r| r.tombstoned).collect();
        let bytes_reclaimed: usize = dropped
            .iter()
            .map(|r| bincode::serialized_size(r).unwrap_or(0) as usize)
            .sum();
        let segments_compacted = dropped.len();

        inner.container.rewrite_vectors(&live)?;
        let live_pairs: Vec<(String, Vec<f32>)> = live.iter().map(|r| (r.id.clone(), r.vector.clone())).collect();
        inner.index = HnswIndex::rebuild_from_records(
            self.config.dimension,
            self.config.metric,
            &self.config.hnsw,
            live_pairs,
        )?;
        inner.records.retain(|_, r| !r.tombstoned);

        let mut header = inner.container.read_header()?;
        header.compaction_epoch += 1;
        inner.container.write_header(&header)?;

        let payload = format!("compact:{}", header.compaction_epoch).into_bytes();
        let entry = inner.witness.record(WitnessOp::Compact, &payload);
        inner.container.write_batch(&[], std::slice::from_ref(&entry))?;

        warn!(segments_compacted, bytes_reclaimed, "compaction complete");
        Ok(CompactionReport {
            segments_compacted,
            bytes_reclaimed,
        })
    }

    /// Flushes, then copies the container file to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.flush()?;
        let inner = self.lock_inner_read()?;
        std::fs::copy(inner.container.path(), path.as_ref()).map_err(|e| StorageError::io("save", e))?;
        Ok(())
    }

    /// Creates a copy-on-write child store at `child_path`, sharing this
    /// store's vectors at the point of derivation and forking the
    /// witness chain from this store's current tip.
    #[instrument(skip(self), fields(child_path = %child_path.as_ref().display()))]
    pub fn derive(&self, child_path: impl AsRef<Path>) -> Result<VectorStore> {
        self.flush()?;
        let inner = self.lock_inner_read()?;
        let parent_header = inner.container.read_header()?;
        let tip = inner.witness.tip_hash();

        let child_header = ContainerHeader {
            version: FORMAT_VERSION,
            dimension: parent_header.dimension,
            metric: parent_header.metric,
            hnsw: parent_header.hnsw.clone(),
            witness_genesis: tip,
            lineage_depth: parent_header.lineage_depth + 1,
            compaction_epoch: 0,
        };
        let child_container = Container::create(child_path.as_ref(), &child_header)?;

        let live: Vec<VectorRecord> = inner.records.values().filter(|r| !r.tombstoned).cloned().collect();
        let mut child_witness = WitnessChain::forked_from(tip);
        let fork_entry = child_witness.record(WitnessOp::Derive, &tip);
        child_container.write_batch(&live, std::slice::from_ref(&fork_entry))?;

        let live_pairs: Vec<(String, Vec<f32>)> = live.iter().map(|r| (r.id.clone(), r.vector.clone())).collect();
        let child_index =
            HnswIndex::rebuild_from_records(parent_header.dimension, parent_header.metric, &parent_header.hnsw, live_pairs)?;

        let child_records = live.into_iter().map(|r| (r.id.clone(), r)).collect();

        Ok(VectorStore {
            config: self.config.clone(),
            inner: RwLock::new(Inner {
                container: child_container,
                index: child_index,
                witness: child_witness,
                records: child_records,
            }),
            pending: Mutex::new(Vec::new()),
        })
    }

    /// Number of `derive()` hops between this store and its root ancestor.
    pub fn lineage_depth(&self) -> Result<u64> {
        let inner = self.lock_inner_read()?;
        Ok(inner.container.read_header()?.lineage_depth)
    }

    /// Point-in-time statistics.
    pub fn stats(&self) -> Result<Stats> {
        let inner = self.lock_inner_read()?;
        let pending = self
            .pending
            .lock()
            .map_err(|_| StorageError::corrupted("pending buffer lock poisoned"))?;
        let tombstoned = inner.records.values().filter(|r| r.tombstoned).count();
        let live = inner.records.len() - tombstoned;
        Ok(Stats {
            count: live + pending.len(),
            tombstoned,
            pending: pending.len(),
            dimension: self.config.dimension,
            metric: self.config.metric,
        })
    }

    /// Returns `id`'s current vector, or `None` if absent or tombstoned.
    pub fn get_vector(&self, id: &str) -> Result<Option<Vec<f32>>> {
        let inner = self.lock_inner_read()?;
        Ok(inner.records.get(id).filter(|r| !r.tombstoned).map(|r| r.vector.clone()))
    }

    /// Snapshots up to `limit` live vectors, for learning-layer
    /// consumers that need a sampling pool (e.g. hard-negative mining).
    /// Order is unspecified.
    pub fn snapshot_vectors(&self, limit: usize) -> Result<Vec<(String, Vec<f32>)>> {
        let inner = self.lock_inner_read()?;
        Ok(inner
            .records
            .values()
            .filter(|r| !r.tombstoned)
            .take(limit)
            .map(|r| (r.id.clone(), r.vector.clone()))
            .collect())
    }

    /// Appends a witness event for a non-storage mutation (e.g. a
    /// contrastive trainer step or a solver acceptance cycle) recorded
    /// by the self-learning orchestrator, persisting it alongside the
    /// store's own mutation history.
    pub fn record_event(&self, op: WitnessOp, payload: &[u8]) -> Result<()> {
        let mut inner = self.lock_inner()?;
        let entry = inner.witness.record(op, payload);
        inner.container.write_batch(&[], std::slice::from_ref(&entry))?;
        Ok(())
    }

    /// A snapshot of the witness chain's entries, for external verification.
    pub fn witness_chain(&self) -> Result<WitnessChain> {
        Ok(self.lock_inner_read()?.witness.clone())
    }

    /// Verifies the witness chain from genesis forward.
    pub fn verify_witness(&self) -> Result<crate::witness::VerifyReport> {
        Ok(self.lock_inner_read()?.witness.verify())
    }

    /// The store's configured dimension.
    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    /// The store's configured metric.
    pub fn metric(&self) -> Metric {
        self.config.metric
    }
}

fn record_payload(record: &VectorRecord) -> Vec<u8> {
    let mut payload = Vec::with_capacity(record.id.len() + record.vector.len() * 4);
    payload.extend_from_slice(record.id.as_bytes());
    for v in &record.vector {
        payload.extend_from_slice(&v.to_le_bytes());
    }
    payload
}
