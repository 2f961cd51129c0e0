//! Query intent classification and routing.
//!
//! [`QueryRouter`] keeps a small set of named [`Intent`] centroids in
//! memory and classifies incoming query embeddings against them by
//! cosine similarity. Persistence is JSON (human-inspectable, unlike
//! the store's bincode segments) and debounced: bursts of
//! `add_intent`/`remove_intent` calls coalesce into a single write
//! roughly [`crate::config::LearningConfig::router_debounce`] after the
//! last mutation, with a final synchronous save guaranteed on drop.

pub mod types;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::error::{Result, StorageError, ValidationError};
use crate::types::Metadata;

pub use types::{Intent, RouteResult, RouterStats};
use types::cosine_similarity;

enum DebounceSignal {
    Dirty,
    Shutdown,
}

struct RouterState {
    intents: RwLock<HashMap<String, Intent>>,
    stats: Mutex<RouterStats>,
    path: PathBuf,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct PersistedRouter {
    intents: Vec<Intent>,
    stats: RouterStats,
}

/// Classifies query embeddings against a small set of named intents.
pub struct QueryRouter {
    state: Arc<RouterState>,
    threshold: f32,
    tx: crossbeam_channel::Sender<DebounceSignal>,
    worker: Option<JoinHandle<()>>,
}

/// Validates that `path` has no `..` component and no null byte, and
/// resolves beneath `root`.
///
/// Router persistence paths are caller-supplied (e.g. derived from a
/// collection name), so this guards against path traversal escaping
/// the configured storage root.
pub fn validate_persist_path(root: &Path, path: &Path) -> Result<PathBuf> {
    let path_str = path.to_string_lossy();
    if path_str.contains('\0') {
        return Err(ValidationError::invalid_path(path_str.into_owned(), "contains a null byte").into());
    }
    if path.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return Err(ValidationError::invalid_path(path_str.into_owned(), "must not contain '..'").into());
    }
    let resolved = if path.is_absolute() { path.to_path_buf() } else { root.join(path) };
    if !resolved.starts_with(root) {
        return Err(ValidationError::invalid_path(
            resolved.display().to_string(),
            "must resolve beneath the configured root",
        )
        .into());
    }
    Ok(resolved)
}

impl QueryRouter {
    /// Creates a router persisting to `path`, with no intents loaded.
    pub fn new(path: impl Into<PathBuf>, threshold: f32, debounce: Duration) -> Self {
        let state = Arc::new(RouterState {
            intents: RwLock::new(HashMap::new()),
            stats: Mutex::new(RouterStats::default()),
            path: path.into(),
        });
        Self::spawn(state, threshold, debounce)
    }

    /// Loads a router from a previously persisted JSON file at `path`.
    /// If the file does not exist, starts empty (matching first-run behavior).
    #[instrument(skip(threshold, debounce), fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>, threshold: f32, debounce: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (intents, stats) = if path.exists() {
            let json = std::fs::read_to_string(&path).map_err(|e| StorageError::io("read router", e))?;
            let persisted: PersistedRouter =
                serde_json::from_str(&json).map_err(|e| StorageError::serialization(e.to_string()))?;
            let map = persisted.intents.into_iter().map(|i| (i.name.clone(), i)).collect();
            (map, persisted.stats)
        } else {
            (HashMap::new(), RouterStats::default())
        };

        let state = Arc::new(RouterState {
            intents: RwLock::new(intents),
            stats: Mutex::new(stats),
            path,
        });
        Ok(Self::spawn(state, threshold, debounce))
    }

    fn spawn(state: Arc<RouterState>, threshold: f32, debounce: Duration) -> Self {
        let (tx, rx) = crossbeam_channel::bounded::<DebounceSignal>(64);
        let worker_state = Arc::clone(&state);
        let worker = std::thread::spawn(move || Self::debounce_loop(worker_state, rx, debounce));
        Self {
            state,
            threshold,
            tx,
            worker: Some(worker),
        }
    }

    fn debounce_loop(state: Arc<RouterState>, rx: crossbeam_channel::Receiver<DebounceSignal>, debounce: Duration) {
        loop {
            match rx.recv() {
                Ok(DebounceSignal::Shutdown) | Err(_) => {
                    let _ = Self::persist(&state);
                    return;
                }
                Ok(DebounceSignal::Dirty) => {
                    // Drain any further signals that arrive within the debounce
                    // window, coalescing a burst of mutations into one save.
                    loop {
                        match rx.recv_timeout(debounce) {
                            Ok(DebounceSignal::Dirty) => continue,
                            Ok(DebounceSignal::Shutdown) => {
                                let _ = Self::persist(&state);
                                return;
                            }
                            Err(crossbeam_channel::RecvTimeoutError::Timeout) => break,
                            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                                let _ = Self::persist(&state);
                                return;
                            }
                        }
                    }
                    if let Err(e) = Self::persist(&state) {
                        warn!(error = %e, "debounced router persistence failed");
                    }
                }
            }
        }
    }

    fn persist(state: &RouterState) -> Result<()> {
        let intents: Vec<Intent> = state
            .intents
            .read()
            .map_err(|_| StorageError::corrupted("router intents lock poisoned"))?
            .values()
            .cloned()
            .collect();
        let stats = state
            .stats
            .lock()
            .map_err(|_| StorageError::corrupted("router stats lock poisoned"))?
            .clone();
        let persisted = PersistedRouter { intents, stats };
        let json =
            serde_json::to_string_pretty(&persisted).map_err(|e| StorageError::serialization(e.to_string()))?;

        if let Some(parent) = state.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StorageError::io("create router dir", e))?;
            }
        }
        let tmp_path = state.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json).map_err(|e| StorageError::io("write router", e))?;
        std::fs::rename(&tmp_path, &state.path).map_err(|e| StorageError::io("rename router", e))?;
        debug!(path = %state.path.display(), "router persisted");
        Ok(())
    }

    fn mark_dirty(&self) {
        let _ = self.tx.try_send(DebounceSignal::Dirty);
    }

    /// Adds or updates an intent. If `name` already exists, the new
    /// embedding folds into the existing centroid instead of replacing it.
    pub fn add_intent(&self, name: &str, embedding: Vec<f32>, metadata: Metadata) -> Result<()> {
        let mut intents = self
            .state
            .intents
            .write()
            .map_err(|_| StorageError::corrupted("router intents lock poisoned"))?;
        match intents.get_mut(name) {
            Some(existing) => {
                existing.fold_exemplar(&embedding);
                existing.metadata = metadata;
            }
            None => {
                intents.insert(name.to_string(), Intent::new(name, embedding, metadata));
            }
        }
        drop(intents);
        self.mark_dirty();
        Ok(())
    }

    /// Removes an intent. Returns whether it was present.
    pub fn remove_intent(&self, name: &str) -> Result<bool> {
        let removed = self
            .state
            .intents
            .write()
            .map_err(|_| StorageError::corrupted("router intents lock poisoned"))?
            .remove(name)
            .is_some();
        if removed {
            self.mark_dirty();
        }
        Ok(removed)
    }

    /// Routes `query` against all intents, returning the best match (if
    /// any cleared the threshold) plus every candidate considered.
    pub fn route(&self, query: &[f32], top_k: usize) -> Result<RouteResult> {
        let intents = self
            .state
            .intents
            .read()
            .map_err(|_| StorageError::corrupted("router intents lock poisoned"))?;

        let mut candidates: Vec<(String, f32)> = intents
            .values()
            .map(|intent| (intent.name.clone(), cosine_similarity(query, &intent.centroid)))
            .collect();
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(top_k.max(1));

        let best = candidates.first().cloned();
        drop(intents);

        let mut stats = self
            .state
            .stats
            .lock()
            .map_err(|_| StorageError::corrupted("router stats lock poisoned"))?;
        stats.total_queries += 1;

        let (matched_name, similarity) = match best {
            Some((name, sim)) if sim >= self.threshold => {
                stats.total_matched += 1;
                *stats.hits_by_intent.entry(name.clone()).or_insert(0) += 1;
                (Some(name), sim)
            }
            _ => (None, 0.0),
        };

        Ok(RouteResult {
            intent: matched_name,
            similarity,
            candidates,
        })
    }

    /// Snapshot of cumulative routing statistics.
    pub fn stats(&self) -> Result<RouterStats> {
        Ok(self
            .state
            .stats
            .lock()
            .map_err(|_| StorageError::corrupted("router stats lock poisoned"))?
            .clone())
    }

    /// Number of registered intents.
    pub fn intent_count(&self) -> usize {
        self.state.intents.read().map(|m| m.len()).unwrap_or(0)
    }

    /// Forces an immediate synchronous save, bypassing the debounce window.
    pub fn save_now(&self) -> Result<()> {
        Self::persist(&self.state)
    }
}

impl Drop for QueryRouter {
    fn drop(&mut self) {
        let _ = self.tx.send(DebounceSignal::Shutdown);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_matches_closest_intent_above_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let router = QueryRouter::new(dir.path().join("router.json"), 0.5, Duration::from_millis(10));
        router.add_intent("greet", vec![1.0, 0.0], Metadata::new()).unwrap();
        router.add_intent("farewell", vec![0.0, 1.0], Metadata::new()).unwrap();

        let result = router.route(&[0.9, 0.1], 2).unwrap();
        assert_eq!(result.intent.as_deref(), Some("greet"));
        assert_eq!(result.candidates.len(), 2);
    }

    #[test]
    fn test_route_below_threshold_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let router = QueryRouter::new(dir.path().join("router.json"), 0.99, Duration::from_millis(10));
        router.add_intent("greet", vec![1.0, 0.0], Metadata::new()).unwrap();
        let result = router.route(&[0.1, 0.9], 1).unwrap();
        assert!(result.intent.is_none());
    }

    #[test]
    fn test_save_now_persists_and_reload_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("router.json");
        {
            let router = QueryRouter::new(&path, 0.5, Duration::from_secs(5));
            router.add_intent("greet", vec![1.0, 0.0], Metadata::new()).unwrap();
            router.save_now().unwrap();
        }
        let reloaded = QueryRouter::load(&path, 0.5, Duration::from_secs(5)).unwrap();
        assert_eq!(reloaded.intent_count(), 1);
    }

    #[test]
    fn test_drop_performs_final_synchronous_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("router.json");
        {
            let router = QueryRouter::new(&path, 0.5, Duration::from_secs(30));
            router.add_intent("greet", vec![1.0, 0.0], Metadata::new()).unwrap();
        }
        assert!(path.exists());
    }

    #[test]
    fn test_remove_intent() {
        let dir = tempfile::tempdir().unwrap();
        let router = QueryRouter::new(dir.path().join("router.json"), 0.5, Duration::from_millis(10));
        router.add_intent("greet", vec![1.0, 0.0], Metadata::new()).unwrap();
        assert!(router.remove_intent("greet").unwrap());
        assert!(!router.remove_intent("greet").unwrap());
        assert_eq!(router.intent_count(), 0);
    }

    #[test]
    fn test_validate_persist_path_rejects_parent_dir() {
        let root = Path::new("/data/routers");
        let err = validate_persist_path(root, Path::new("../escape.json")).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_validate_persist_path_accepts_relative_under_root() {
        let root = Path::new("/data/routers");
        let resolved = validate_persist_path(root, Path::new("my-router.json")).unwrap();
        assert_eq!(resolved, Path::new("/data/routers/my-router.json"));
    }
}
