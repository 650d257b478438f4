//! The engine facade.
//!
//! `IndexEngine` owns one store, one coordinator thread and one watcher per
//! registered root, and exposes the narrow interface consumed by a
//! presentation layer: add/remove roots, search, status, path resolution.
//! Nothing outside the coordinator ever mutates the store.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Sender};
use parking_lot::{Mutex, RwLock};

use crate::cancel::SearchVersionTracker;
use crate::config::EngineConfig;
use crate::error::{canonicalize_existing_path, IndexError, Result};
use crate::persist;
use crate::query::{self, CompiledQuery};
use crate::store::{EntryKey, PathStore};
use crate::sync::coordinator::Coordinator;
use crate::sync::intent::{Sequencer, SyncMessage};
use crate::sync::root::RootHandle;
use crate::types::{EntryRef, RootId, RootState, RootStatus, SearchHit, SearchOptions};
use crate::watch::{self, RootWatcher};

struct RootEntry {
    handle: Arc<RootHandle>,
    /// `None` when the OS subscription could not be established; the root
    /// still scans and serves queries, it just receives no live updates.
    watcher: Mutex<Option<RootWatcher>>,
}

/// The real-time filesystem index engine.
///
/// Construct with [`IndexEngine::open`], register roots, search. All
/// methods are callable from any thread; searches run against lock-free
/// snapshots and never wait for writers.
pub struct IndexEngine {
    config: EngineConfig,
    store: Arc<PathStore>,
    tx: Sender<SyncMessage>,
    seq: Arc<Sequencer>,
    roots: RwLock<HashMap<RootId, RootEntry>>,
    tracker: SearchVersionTracker,
    next_root_id: AtomicU64,
    coordinator: Option<JoinHandle<()>>,
}

impl IndexEngine {
    /// Starts the engine. With a configured cache directory, previously
    /// registered roots are reloaded: their cached entry tables seed the
    /// index immediately and a validating scan reconciles them against disk
    /// (stale entries pruned, new ones inserted).
    pub fn open(config: EngineConfig) -> Result<Self> {
        let store = Arc::new(PathStore::new());
        let seq = Arc::new(Sequencer::new());
        let (tx, rx) = unbounded();

        let coordinator = Coordinator::new(
            rx,
            tx.clone(),
            store.clone(),
            seq.clone(),
            config.clone(),
        );
        let coordinator = std::thread::spawn(move || coordinator.run());

        let engine = Self {
            config,
            store,
            tx,
            seq,
            roots: RwLock::new(HashMap::new()),
            tracker: SearchVersionTracker::new(),
            next_root_id: AtomicU64::new(0),
            coordinator: Some(coordinator),
        };

        if let Some(cache_dir) = engine.config.cache_dir.clone() {
            for root in persist::load_root_registry(&cache_dir) {
                if let Err(error) = engine.add_root(&root) {
                    log::warn!(
                        "dropping persisted root {}: {error}",
                        root.display()
                    );
                }
            }
            engine.persist_registry();
        }

        Ok(engine)
    }

    /// Registers a directory for indexing and returns its id. The watcher
    /// subscription is established before the initial scan starts, so no
    /// event occurring during the scan window is missed. Re-adding an
    /// already registered path returns the existing id.
    pub fn add_root(&self, path: impl AsRef<Path>) -> Result<RootId> {
        let path = path.as_ref();
        let metadata = fs::metadata(path).map_err(|error| IndexError::InvalidRoot {
            path: path.to_path_buf(),
            reason: error.to_string(),
        })?;
        if !metadata.is_dir() {
            return Err(IndexError::InvalidRoot {
                path: path.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }
        let canonical = canonicalize_existing_path(path.to_path_buf());

        let mut roots = self.roots.write();
        if let Some((id, _)) = roots
            .iter()
            .find(|(_, entry)| entry.handle.path == canonical)
        {
            return Ok(*id);
        }

        let id = RootId(self.next_root_id.fetch_add(1, Ordering::SeqCst) + 1);
        let handle = Arc::new(RootHandle::new(id, canonical.clone()));

        let preloaded = self.load_cached_entries(&canonical);

        let watcher = match watch::spawn_root_watcher(
            handle.clone(),
            &self.config,
            self.tx.clone(),
            self.seq.clone(),
        ) {
            Ok(watcher) => Some(watcher),
            Err(error) => {
                handle.record_error(error.to_string());
                log::warn!(
                    "filesystem watcher disabled for {}: {error}",
                    canonical.display()
                );
                None
            }
        };

        roots.insert(
            id,
            RootEntry {
                handle: handle.clone(),
                watcher: Mutex::new(watcher),
            },
        );
        drop(roots);

        self.tx
            .send(SyncMessage::AddRoot { handle, preloaded })
            .map_err(|_| IndexError::EngineClosed)?;
        self.persist_registry();
        Ok(id)
    }

    /// Detaches a root: cancels its scan, closes its watcher and drops all
    /// of its entries. Idempotent.
    pub fn remove_root(&self, id: RootId) -> Result<()> {
        let Some(entry) = self.roots.write().remove(&id) else {
            return Ok(());
        };
        entry.handle.set_state(RootState::Removing);
        entry.handle.cancel_scan();
        // Closes the subscription and flushes the debounce worker.
        drop(entry.watcher);
        self.tx
            .send(SyncMessage::RemoveRoot { root: id })
            .map_err(|_| IndexError::EngineClosed)?;
        self.persist_registry();
        Ok(())
    }

    /// Forces a full rescan of a root (generation bump). The root stays
    /// queryable while the scan runs.
    pub fn rescan(&self, id: RootId) -> Result<()> {
        if !self.roots.read().contains_key(&id) {
            return Err(IndexError::RootNotFound(id.as_u64()));
        }
        self.tx
            .send(SyncMessage::Rescan { root: id })
            .map_err(|_| IndexError::EngineClosed)
    }

    /// Ids of all registered roots.
    pub fn roots(&self) -> Vec<RootId> {
        let mut ids: Vec<RootId> = self.roots.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Searches the index. Each call supersedes the previous one: an
    /// in-flight search from an earlier call is cancelled and returns
    /// `Ok(None)`. Results are ranked (exact, prefix, substring; ties by
    /// depth then path) and truncated to `options.limit`.
    pub fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Option<Vec<SearchHit>>> {
        let version = self.tracker.next_version();
        self.search_versioned(query, options, version)
    }

    /// Allocates a version for an explicit search session (incremental
    /// typeahead). Searching with a newer version cancels searches holding
    /// older ones.
    pub fn next_search_version(&self) -> u64 {
        self.tracker.next_version()
    }

    /// Like [`search`](Self::search), but the caller owns the session
    /// version. A search whose version has been superseded returns
    /// `Ok(None)`; its partial result is discarded, never merged.
    pub fn search_versioned(
        &self,
        query: &str,
        options: &SearchOptions,
        version: u64,
    ) -> Result<Option<Vec<SearchHit>>> {
        self.tracker.activate_version(version);
        let token = self.tracker.token_for_version(version);
        let compiled = CompiledQuery::compile(query)?;

        if token.is_cancelled().is_none() {
            return Ok(None);
        }
        let snapshot = self.store.snapshot();
        Ok(query::search_snapshot(&snapshot, &compiled, options, &token))
    }

    /// Status of one root.
    pub fn status(&self, id: RootId) -> Result<RootStatus> {
        let roots = self.roots.read();
        let entry = roots
            .get(&id)
            .ok_or(IndexError::RootNotFound(id.as_u64()))?;
        let handle = &entry.handle;
        let snapshot = self.store.snapshot();
        let watcher_enabled = entry.watcher.lock().is_some();
        Ok(RootStatus {
            root: handle.path.clone(),
            state: handle.state(),
            entries_indexed: snapshot.root_len(id),
            scanned_files: handle.scanned_files.load(Ordering::Relaxed),
            scanned_dirs: handle.scanned_dirs.load(Ordering::Relaxed),
            generation: handle.generation.load(Ordering::Relaxed),
            errors: handle.errors.load(Ordering::Relaxed),
            watcher_enabled,
            last_error: handle.last_error(),
        })
    }

    /// Resolves an entry reference to its absolute path, for opening a file
    /// or revealing its folder. Performs no index mutation.
    pub fn resolve_path(&self, entry: &EntryRef) -> Result<PathBuf> {
        let snapshot = self.store.snapshot();
        let key = EntryKey::new(entry.root, entry.path.clone());
        if snapshot.contains(&key) {
            Ok(PathBuf::from(&entry.path))
        } else {
            Err(IndexError::PathNotFound(PathBuf::from(&entry.path)))
        }
    }

    /// Shuts the engine down: closes watchers, drains the coordinator and
    /// flushes caches.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Stop producers first so the final drain settles.
        {
            let roots = self.roots.read();
            for entry in roots.values() {
                entry.handle.cancel_scan();
                *entry.watcher.lock() = None;
            }
        }
        let _ = self.tx.send(SyncMessage::Shutdown);
        if let Some(coordinator) = self.coordinator.take() {
            let _ = coordinator.join();
        }
    }

    fn load_cached_entries(&self, root: &Path) -> Vec<(PathBuf, crate::types::EntryMeta)> {
        let Some(cache_dir) = &self.config.cache_dir else {
            return Vec::new();
        };
        match persist::load_root_snapshot(cache_dir, root) {
            Ok(Some(entries)) => entries
                .into_iter()
                .map(|entry| (PathBuf::from(&entry.path), entry.meta()))
                .collect(),
            Ok(None) => Vec::new(),
            Err(error) => {
                // Corrupt or unreadable cache: rebuild from a clean scan.
                log::warn!(
                    "discarding unusable index cache for {}: {error}",
                    root.display()
                );
                Vec::new()
            }
        }
    }

    fn persist_registry(&self) {
        let Some(cache_dir) = &self.config.cache_dir else {
            return;
        };
        let mut roots: Vec<PathBuf> = self
            .roots
            .read()
            .values()
            .map(|entry| entry.handle.path.clone())
            .collect();
        roots.sort();
        if let Err(error) = persist::write_root_registry(cache_dir, roots) {
            log::warn!("failed to persist root registry: {error}");
        }
    }
}

impl Drop for IndexEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
