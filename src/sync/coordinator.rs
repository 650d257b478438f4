//! The synchronization coordinator: the single-writer authority.
//!
//! One thread per engine consumes the intent channel and owns the write
//! path exclusively. Mutations are applied to a working copy of the table
//! and published as one atomic snapshot per batch, so readers observe whole
//! batches or nothing. Per-root lifecycle (Initializing → Active →
//! Removing), end-of-scan generation reconciliation, move handling, queue
//! overflow recovery and cache flushing all live here.

use std::fs;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use fnv::FnvHashMap;

use crate::config::EngineConfig;
use crate::persist::{self, PersistedEntry};
use crate::scan::ScanTask;
use crate::store::{EntryKey, PathStore, PathTable};
use crate::sync::intent::{IntentSource, MutationIntent, MutationOp, Sequencer, SyncMessage};
use crate::sync::root::RootHandle;
use crate::types::{EntryKind, EntryMeta, RootId, RootState};

/// Per-root bookkeeping private to the coordinator.
struct RootSync {
    handle: Arc<RootHandle>,
    /// Generation of the scan the coordinator currently expects.
    generation: u64,
    /// Sequence cutoff of that scan, for reconciliation.
    since_seq: u64,
    /// A scan is in flight; removals leave tombstones while this holds.
    scanning: bool,
}

pub(crate) struct Coordinator {
    rx: Receiver<SyncMessage>,
    /// Kept for handing to spawned scans.
    tx: Sender<SyncMessage>,
    store: Arc<PathStore>,
    seq: Arc<Sequencer>,
    config: EngineConfig,
    roots: FnvHashMap<RootId, RootSync>,
    /// Sequence numbers of removals observed while a scan is in flight.
    /// Guards against a stale scan insert resurrecting a deleted path.
    /// Cleared per root when its scan settles.
    tombstones: FnvHashMap<EntryKey, u64>,
    dirty: bool,
    last_flush: Instant,
}

impl Coordinator {
    pub fn new(
        rx: Receiver<SyncMessage>,
        tx: Sender<SyncMessage>,
        store: Arc<PathStore>,
        seq: Arc<Sequencer>,
        config: EngineConfig,
    ) -> Self {
        Self {
            rx,
            tx,
            store,
            seq,
            config,
            roots: FnvHashMap::default(),
            tombstones: FnvHashMap::default(),
            dirty: false,
            last_flush: Instant::now(),
        }
    }

    /// The coordinator loop: block for the next message or the batch tick,
    /// whichever is sooner.
    pub fn run(mut self) {
        loop {
            match self.rx.recv_timeout(self.config.batch_tick) {
                Ok(message) => {
                    if self.process_batch(message) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            self.flush_caches(false);
        }
        self.flush_caches(true);
    }

    /// Applies `first` plus everything else already queued as one batch,
    /// committing a single new snapshot. Returns true on shutdown.
    fn process_batch(&mut self, first: SyncMessage) -> bool {
        let mut working: Option<PathTable> = None;
        let mut shutdown = false;

        if self.rx.len() > self.config.queue_capacity {
            self.recover_from_overflow(first, &mut working, &mut shutdown);
        } else {
            self.handle_message(first, &mut working, &mut shutdown);
            while !shutdown {
                match self.rx.try_recv() {
                    Ok(message) => self.handle_message(message, &mut working, &mut shutdown),
                    Err(_) => break,
                }
            }
        }

        if let Some(table) = working {
            self.store.commit(table);
            self.dirty = true;
        }
        shutdown
    }

    /// The backlog exceeded capacity: drop every queued mutation wholesale
    /// (control messages are still honored) and resynchronize all roots
    /// against disk with fresh scans.
    fn recover_from_overflow(
        &mut self,
        first: SyncMessage,
        working: &mut Option<PathTable>,
        shutdown: &mut bool,
    ) {
        let mut backlog = vec![first];
        backlog.extend(self.rx.try_iter());

        let mut dropped = 0usize;
        for message in backlog {
            if matches!(message, SyncMessage::Intent(_)) {
                dropped += 1;
            } else {
                self.handle_message(message, working, shutdown);
            }
        }

        log::warn!(
            "intent queue overflow: dropped {dropped} queued mutations, rescanning {} roots",
            self.roots.len()
        );
        let ids: Vec<RootId> = self.roots.keys().copied().collect();
        for id in ids {
            self.start_scan(id);
        }
    }

    fn handle_message(
        &mut self,
        message: SyncMessage,
        working: &mut Option<PathTable>,
        shutdown: &mut bool,
    ) {
        match message {
            SyncMessage::Intent(intent) => {
                let table = working_table(&self.store, working);
                self.apply_intent(table, intent);
            }
            SyncMessage::AddRoot { handle, preloaded } => {
                let id = handle.id;
                if self.roots.contains_key(&id) {
                    return;
                }
                let table = working_table(&self.store, working);
                for (path, meta) in &preloaded {
                    // Generation 0 / sequence 0: any live observation wins,
                    // and the validating scan prunes what is gone from disk.
                    table.insert(id, path, *meta, 0, 0);
                }
                log::info!(
                    "root registered id={} path={} preloaded_entries={}",
                    id.as_u64(),
                    handle.path.display(),
                    preloaded.len()
                );
                self.roots.insert(
                    id,
                    RootSync {
                        handle,
                        generation: 0,
                        since_seq: 0,
                        scanning: false,
                    },
                );
                self.start_scan(id);
            }
            SyncMessage::RemoveRoot { root } => {
                let Some(root_sync) = self.roots.remove(&root) else {
                    return; // idempotent
                };
                root_sync.handle.set_state(RootState::Removing);
                root_sync.handle.cancel_scan();
                let removed = working_table(&self.store, working).remove_root(root);
                self.tombstones.retain(|key, _| key.root != root);
                if let Some(cache_dir) = &self.config.cache_dir {
                    persist::remove_root_snapshot(cache_dir, &root_sync.handle.path);
                }
                log::info!(
                    "root removed id={} path={} entries_dropped={}",
                    root.as_u64(),
                    root_sync.handle.path.display(),
                    removed
                );
            }
            SyncMessage::Rescan { root } => {
                if self.roots.contains_key(&root) {
                    log::info!("rescan requested for root id={}", root.as_u64());
                    self.start_scan(root);
                }
            }
            SyncMessage::ScanStarted {
                root,
                generation,
                since_seq,
            } => {
                if let Some(root_sync) = self.roots.get_mut(&root) {
                    if generation == root_sync.generation {
                        root_sync.since_seq = since_seq;
                        root_sync.scanning = true;
                    }
                }
            }
            SyncMessage::ScanCompleted { root, generation } => {
                let Some(root_sync) = self.roots.get_mut(&root) else {
                    return;
                };
                if generation != root_sync.generation {
                    return; // superseded scan
                }
                root_sync.scanning = false;
                let since_seq = root_sync.since_seq;
                let handle = root_sync.handle.clone();
                let pruned = working_table(&self.store, working)
                    .prune_generation(root, generation, since_seq);
                self.tombstones.retain(|key, _| key.root != root);
                handle.set_state(RootState::Active);
                log::info!(
                    "scan completed root={} generation={} pruned={} scanned_files={} scanned_dirs={}",
                    handle.path.display(),
                    generation,
                    pruned,
                    handle.scanned_files.load(Ordering::Relaxed),
                    handle.scanned_dirs.load(Ordering::Relaxed),
                );
            }
            SyncMessage::ScanAborted {
                root,
                generation,
                error,
            } => {
                let Some(root_sync) = self.roots.get_mut(&root) else {
                    return;
                };
                if generation != root_sync.generation {
                    return; // cancelled in favor of a newer scan
                }
                root_sync.scanning = false;
                self.tombstones.retain(|key, _| key.root != root);
                // Whatever is indexed stays queryable.
                root_sync.handle.set_state(RootState::Active);
                if let Some(message) = error {
                    log::warn!(
                        "scan failed for {}: {message}",
                        root_sync.handle.path.display()
                    );
                    root_sync.handle.record_error(message);
                }
            }
            SyncMessage::Shutdown => *shutdown = true,
        }
    }

    fn apply_intent(&mut self, table: &mut PathTable, intent: MutationIntent) {
        let MutationIntent {
            seq,
            root,
            source,
            op,
        } = intent;
        let Some(root_sync) = self.roots.get(&root) else {
            // Unknown or removing root: discard.
            log::debug!("discarding intent for unregistered root {}", root.as_u64());
            return;
        };
        let scanning = root_sync.scanning;
        let root_generation = root_sync.handle.generation.load(Ordering::Relaxed);

        match op {
            MutationOp::Insert {
                path,
                meta,
                generation,
            } => {
                self.apply_upsert(table, root, &path, meta, generation, seq, source, true);
            }
            MutationOp::Update { path, meta } => {
                let key = EntryKey::from_path(root, &path);
                if table.contains(&key) {
                    if stale_for(table, &key, seq) {
                        return;
                    }
                    table.update_meta(&key, meta, seq);
                } else {
                    // Missed create: treat as an insert at the current
                    // generation.
                    self.apply_upsert(table, root, &path, meta, root_generation, seq, source, true);
                }
            }
            MutationOp::Remove { path } => {
                let key = EntryKey::from_path(root, &path);
                let removed = table.remove_subtree(root, &key.path);
                if removed == 0 {
                    // Harmless: already gone.
                    log::debug!("remove for absent path {}", path.display());
                }
                if scanning {
                    self.tombstones.insert(key, seq);
                }
            }
            MutationOp::Move { from, to } => {
                let from_key = EntryKey::from_path(root, &from);
                let to_key = EntryKey::from_path(root, &to);
                if table.contains(&from_key) {
                    table.rename_subtree(root, &from_key.path, &to_key.path, seq);
                    if scanning {
                        self.tombstones.insert(from_key, seq);
                    }
                } else {
                    // Unknown source: fall back to ground truth for the
                    // destination.
                    log::debug!(
                        "move from unindexed path {}, inserting destination",
                        from.display()
                    );
                    match fs::symlink_metadata(&to) {
                        Ok(metadata) => {
                            let meta = EntryMeta::from_fs_metadata(&metadata);
                            self.apply_upsert(
                                table,
                                root,
                                &to,
                                meta,
                                root_generation,
                                seq,
                                source,
                                true,
                            );
                        }
                        Err(_) => log::debug!("move destination {} already gone", to.display()),
                    }
                }
            }
        }
    }

    /// Inserts (or replaces) one entry, enforcing per-path monotonic apply
    /// order and the tombstone ground-truth check.
    #[allow(clippy::too_many_arguments)]
    fn apply_upsert(
        &self,
        table: &mut PathTable,
        root: RootId,
        path: &Path,
        meta: EntryMeta,
        generation: u64,
        seq: u64,
        source: IntentSource,
        expand: bool,
    ) {
        let key = EntryKey::from_path(root, path);
        if stale_for(table, &key, seq) {
            return;
        }

        if let Some(tombstone_seq) = self.newest_tombstone_covering(root, &key.path) {
            // A removal was recorded for this path (or an ancestor) while
            // the scan is in flight. Sequence order decides, except that a
            // scanner-sourced insert may have statted the file before the
            // deletion yet sequenced afterwards — disk is the tie-breaker.
            let survives = match source {
                IntentSource::Scanner => fs::symlink_metadata(path).is_ok(),
                IntentSource::Watcher => seq > tombstone_seq,
            };
            if !survives {
                log::debug!(
                    "discarding stale insert for removed path {}",
                    path.display()
                );
                return;
            }
        }

        let was_indexed = table.contains(&key);
        table.insert(root, path, meta, generation, seq);

        // A watcher-created directory may already contain entries the
        // backend never reported individually (moves into the tree, archive
        // extraction on some platforms). Walk it once, inline.
        if expand
            && source == IntentSource::Watcher
            && meta.kind == EntryKind::Directory
            && !was_indexed
        {
            self.expand_directory(table, root, generation, path);
        }
    }

    /// Recursively indexes the contents of a directory the watcher reported
    /// as new.
    fn expand_directory(
        &self,
        table: &mut PathTable,
        root: RootId,
        generation: u64,
        dir: &Path,
    ) {
        let Ok(read) = fs::read_dir(dir) else {
            return;
        };
        let mut children: Vec<_> = read.filter_map(|e| e.ok()).map(|e| e.path()).collect();
        children.sort();

        for child in children {
            if self
                .config
                .ignored_paths
                .iter()
                .any(|ignored| child == *ignored || child.starts_with(ignored))
            {
                continue;
            }
            let Ok(metadata) = fs::symlink_metadata(&child) else {
                continue;
            };
            let meta = EntryMeta::from_fs_metadata(&metadata);
            table.insert(root, &child, meta, generation, self.seq.next());
            if metadata.file_type().is_dir() {
                self.expand_directory(table, root, generation, &child);
            }
        }
    }

    /// Newest tombstone covering `path`: the path itself or any ancestor
    /// removed while the current scan is in flight.
    fn newest_tombstone_covering(&self, root: RootId, path: &str) -> Option<u64> {
        if self.tombstones.is_empty() {
            return None;
        }
        let mut newest: Option<u64> = None;
        let mut current = std::path::PathBuf::from(path);
        loop {
            if let Some(&seq) = self.tombstones.get(&EntryKey::from_path(root, &current)) {
                newest = Some(newest.map_or(seq, |best: u64| best.max(seq)));
            }
            if !current.pop() {
                break;
            }
        }
        newest
    }

    /// Starts (or restarts) the full scan of a root. Any in-flight scan is
    /// cancelled first; there is at most one live scan per root.
    fn start_scan(&mut self, root: RootId) {
        let Some(root_sync) = self.roots.get_mut(&root) else {
            return;
        };
        let cancel = root_sync.handle.arm_scan_cancel();
        let generation = root_sync.handle.generation.fetch_add(1, Ordering::SeqCst) + 1;
        root_sync.generation = generation;
        root_sync.scanning = false;
        root_sync.handle.reset_progress();
        root_sync.handle.set_state(RootState::Initializing);

        let task = ScanTask::new(
            root_sync.handle.clone(),
            generation,
            cancel,
            self.tx.clone(),
            self.seq.clone(),
            self.config.transient_retries,
            self.config.ignored_paths.clone(),
        );
        thread::spawn(move || task.run());
        log::info!(
            "scan started root={} generation={generation}",
            root_sync.handle.path.display()
        );
    }

    /// Writes per-root cache snapshots. Failures surface as
    /// `StoreUnavailable` on the root status and suspend nothing but the
    /// cache itself: the in-memory index keeps serving.
    fn flush_caches(&mut self, force: bool) {
        let Some(cache_dir) = self.config.cache_dir.clone() else {
            return;
        };
        if !self.dirty {
            return;
        }
        if !force && self.last_flush.elapsed() < self.config.flush_interval {
            return;
        }

        let snapshot = self.store.snapshot();
        let mut all_ok = true;
        for root_sync in self.roots.values() {
            let entries: Vec<PersistedEntry> = snapshot
                .iter_root(root_sync.handle.id)
                .map(|(key, entry)| PersistedEntry {
                    path: key.path.clone(),
                    kind: entry.meta.kind,
                    size: entry.meta.size,
                    modified_at: entry.meta.modified_at,
                })
                .collect();
            match persist::write_root_snapshot(&cache_dir, &root_sync.handle.path, entries) {
                Ok(()) => {
                    if root_sync.handle.store_unavailable.swap(false, Ordering::SeqCst) {
                        log::info!(
                            "index cache writable again for {}",
                            root_sync.handle.path.display()
                        );
                    }
                }
                Err(error) => {
                    all_ok = false;
                    root_sync
                        .handle
                        .store_unavailable
                        .store(true, Ordering::SeqCst);
                    root_sync.handle.record_error(error.to_string());
                    log::warn!(
                        "index cache write failed for {}: {error}",
                        root_sync.handle.path.display()
                    );
                }
            }
        }
        self.last_flush = Instant::now();
        if all_ok {
            self.dirty = false;
            log::debug!(
                "flushed {} entries across {} roots",
                snapshot.len(),
                self.roots.len()
            );
        }
    }
}

/// True when the stored entry was last written by a newer intent.
fn stale_for(table: &PathTable, key: &EntryKey, seq: u64) -> bool {
    table.get(key).is_some_and(|entry| entry.last_seq > seq)
}

/// Lazily clones the current snapshot into this batch's working table.
fn working_table<'a>(store: &PathStore, working: &'a mut Option<PathTable>) -> &'a mut PathTable {
    working.get_or_insert_with(|| PathTable::clone(&store.snapshot()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::KindFilter;
    use crossbeam_channel::unbounded;
    use std::fs::File;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_coordinator(config: EngineConfig) -> Coordinator {
        let (tx, rx) = unbounded();
        Coordinator::new(
            rx,
            tx,
            Arc::new(PathStore::new()),
            Arc::new(Sequencer::new()),
            config,
        )
    }

    fn add_root(coordinator: &mut Coordinator, id: u64, path: &Path) -> Arc<RootHandle> {
        let handle = Arc::new(RootHandle::new(RootId(id), path.to_path_buf()));
        let message = SyncMessage::AddRoot {
            handle: handle.clone(),
            preloaded: Vec::new(),
        };
        coordinator.tx.send(message).unwrap();
        pump_until_active(coordinator, &handle);
        handle
    }

    /// Processes queued messages until the root settles into Active.
    fn pump_until_active(coordinator: &mut Coordinator, handle: &RootHandle) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while handle.state() != RootState::Active {
            match coordinator.rx.recv_timeout(Duration::from_millis(100)) {
                Ok(message) => {
                    assert!(!coordinator.process_batch(message));
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => panic!("channel closed"),
            }
            assert!(Instant::now() < deadline, "root never became active");
        }
    }

    fn watcher_intent(coordinator: &Coordinator, root: RootId, op: MutationOp) -> SyncMessage {
        SyncMessage::Intent(MutationIntent {
            seq: coordinator.seq.next(),
            root,
            source: IntentSource::Watcher,
            op,
        })
    }

    fn apply(coordinator: &mut Coordinator, message: SyncMessage) {
        assert!(!coordinator.process_batch(message));
    }

    fn file_meta(size: u64) -> EntryMeta {
        EntryMeta {
            kind: EntryKind::File,
            size,
            modified_at: 0,
        }
    }

    #[test]
    fn initial_scan_indexes_every_entry() {
        let temp = TempDir::new().unwrap();
        File::create(temp.path().join("a.txt")).unwrap();
        fs::create_dir(temp.path().join("sub")).unwrap();
        File::create(temp.path().join("sub/b.txt")).unwrap();

        let mut coordinator = test_coordinator(EngineConfig::default());
        add_root(&mut coordinator, 1, temp.path());

        // 2 files + 1 subdirectory + the root itself.
        assert_eq!(coordinator.store.snapshot().root_len(RootId(1)), 4);
    }

    #[test]
    fn rescanning_unchanged_tree_is_idempotent() {
        let temp = TempDir::new().unwrap();
        File::create(temp.path().join("a.txt")).unwrap();
        fs::create_dir(temp.path().join("sub")).unwrap();
        File::create(temp.path().join("sub/b.txt")).unwrap();

        let mut coordinator = test_coordinator(EngineConfig::default());
        let handle = add_root(&mut coordinator, 1, temp.path());

        let before: Vec<String> = coordinator
            .store
            .snapshot()
            .iter_root(RootId(1))
            .map(|(key, _)| key.path.clone())
            .collect();

        coordinator
            .tx
            .send(SyncMessage::Rescan { root: RootId(1) })
            .unwrap();
        let message = coordinator.rx.recv().unwrap();
        apply(&mut coordinator, message);
        pump_until_active(&mut coordinator, &handle);

        let after: Vec<String> = coordinator
            .store
            .snapshot()
            .iter_root(RootId(1))
            .map(|(key, _)| key.path.clone())
            .collect();
        assert_eq!(before, after);
        assert_eq!(handle.generation.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn scan_prunes_entries_missing_from_disk() {
        let temp = TempDir::new().unwrap();
        File::create(temp.path().join("kept.txt")).unwrap();

        let mut coordinator = test_coordinator(EngineConfig::default());
        // Preloaded cache claims a file that no longer exists on disk.
        let handle = Arc::new(RootHandle::new(RootId(1), temp.path().to_path_buf()));
        coordinator
            .tx
            .send(SyncMessage::AddRoot {
                handle: handle.clone(),
                preloaded: vec![
                    (temp.path().join("kept.txt"), file_meta(1)),
                    (temp.path().join("phantom.txt"), file_meta(1)),
                ],
            })
            .unwrap();
        pump_until_active(&mut coordinator, &handle);

        let snapshot = coordinator.store.snapshot();
        let key = EntryKey::from_path(RootId(1), &temp.path().join("phantom.txt"));
        assert!(!snapshot.contains(&key));
        let kept = EntryKey::from_path(RootId(1), &temp.path().join("kept.txt"));
        assert!(snapshot.contains(&kept));
    }

    #[test]
    fn stale_intent_never_overwrites_newer_state() {
        let temp = TempDir::new().unwrap();
        let mut coordinator = test_coordinator(EngineConfig::default());
        add_root(&mut coordinator, 1, temp.path());

        let path = temp.path().join("volatile.txt");
        let newer = coordinator.seq.next();
        let older = newer - 1; // never allocated to anyone else in this test

        apply(
            &mut coordinator,
            SyncMessage::Intent(MutationIntent {
                seq: newer,
                root: RootId(1),
                source: IntentSource::Watcher,
                op: MutationOp::Insert {
                    path: path.clone(),
                    meta: file_meta(100),
                    generation: 1,
                },
            }),
        );
        apply(
            &mut coordinator,
            SyncMessage::Intent(MutationIntent {
                seq: older,
                root: RootId(1),
                source: IntentSource::Watcher,
                op: MutationOp::Insert {
                    path: path.clone(),
                    meta: file_meta(5),
                    generation: 1,
                },
            }),
        );

        let snapshot = coordinator.store.snapshot();
        let entry = snapshot
            .get(&EntryKey::from_path(RootId(1), &path))
            .unwrap();
        assert_eq!(entry.meta.size, 100);
        assert_eq!(entry.last_seq, newer);
    }

    #[test]
    fn tombstone_blocks_stale_scanner_insert_for_deleted_path() {
        let temp = TempDir::new().unwrap();
        let mut coordinator = test_coordinator(EngineConfig::default());
        add_root(&mut coordinator, 1, temp.path());

        // Simulate a scan in flight.
        coordinator.roots.get_mut(&RootId(1)).unwrap().scanning = true;

        let gone = temp.path().join("deleted-during-scan.txt");
        let remove = watcher_intent(
            &coordinator,
            RootId(1),
            MutationOp::Remove { path: gone.clone() },
        );
        apply(&mut coordinator, remove);

        // A scanner insert sequenced after the removal, but the file is not
        // on disk: the ground-truth check drops it.
        let scanner_insert = SyncMessage::Intent(MutationIntent {
            seq: coordinator.seq.next(),
            root: RootId(1),
            source: IntentSource::Scanner,
            op: MutationOp::Insert {
                path: gone.clone(),
                meta: file_meta(1),
                generation: 1,
            },
        });
        apply(&mut coordinator, scanner_insert);
        let snapshot = coordinator.store.snapshot();
        assert!(!snapshot.contains(&EntryKey::from_path(RootId(1), &gone)));

        // A watcher insert with a newer sequence wins over the tombstone
        // (the path was recreated).
        let recreate = watcher_intent(
            &coordinator,
            RootId(1),
            MutationOp::Insert {
                path: gone.clone(),
                meta: file_meta(2),
                generation: 1,
            },
        );
        apply(&mut coordinator, recreate);
        let snapshot = coordinator.store.snapshot();
        assert!(snapshot.contains(&EntryKey::from_path(RootId(1), &gone)));
    }

    #[test]
    fn move_intent_renames_subtree_atomically() {
        let temp = TempDir::new().unwrap();
        let mut coordinator = test_coordinator(EngineConfig::default());
        add_root(&mut coordinator, 1, temp.path());
        let root = RootId(1);

        for path in ["old", "old/a.txt", "old/deep", "old/deep/b.txt"] {
            let meta = if path.ends_with(".txt") {
                file_meta(1)
            } else {
                EntryMeta {
                    kind: EntryKind::Directory,
                    size: 0,
                    modified_at: 0,
                }
            };
            let insert = watcher_intent(
                &coordinator,
                root,
                MutationOp::Insert {
                    path: temp.path().join(path),
                    meta,
                    generation: 1,
                },
            );
            apply(&mut coordinator, insert);
        }

        let before = coordinator.store.snapshot();
        let count_before = before.root_len(root);

        let rename = watcher_intent(
            &coordinator,
            root,
            MutationOp::Move {
                from: temp.path().join("old"),
                to: temp.path().join("new"),
            },
        );
        apply(&mut coordinator, rename);
        let after = coordinator.store.snapshot();

        // The pre-commit snapshot still shows only old prefixes; the
        // post-commit snapshot only new ones. No mixed state is observable.
        assert!(before.contains(&EntryKey::from_path(root, &temp.path().join("old/deep/b.txt"))));
        assert!(!before.contains(&EntryKey::from_path(root, &temp.path().join("new"))));
        assert!(after.contains(&EntryKey::from_path(root, &temp.path().join("new/deep/b.txt"))));
        assert!(!after
            .iter_root(root)
            .any(|(key, _)| key.path.contains("/old")));
        assert_eq!(after.root_len(root), count_before);
    }

    #[test]
    fn rapid_create_delete_burst_converges_to_final_state() {
        let temp = TempDir::new().unwrap();
        let mut coordinator = test_coordinator(EngineConfig::default());
        add_root(&mut coordinator, 1, temp.path());
        let root = RootId(1);
        let path = temp.path().join("churn.txt");

        // Queue 10,000 alternating create/delete intents, ending on delete,
        // then process them all.
        for i in 0..10_000u64 {
            let op = if i % 2 == 0 {
                MutationOp::Insert {
                    path: path.clone(),
                    meta: file_meta(i),
                    generation: 1,
                }
            } else {
                MutationOp::Remove { path: path.clone() }
            };
            coordinator
                .tx
                .send(watcher_intent(&coordinator, root, op))
                .unwrap();
        }
        let first = coordinator.rx.recv().unwrap();
        apply(&mut coordinator, first);

        let snapshot = coordinator.store.snapshot();
        assert!(!snapshot.contains(&EntryKey::from_path(root, &path)));

        // Same burst ending on create converges to present.
        for i in 0..10_001u64 {
            let op = if i % 2 == 0 {
                MutationOp::Insert {
                    path: path.clone(),
                    meta: file_meta(i),
                    generation: 1,
                }
            } else {
                MutationOp::Remove { path: path.clone() }
            };
            coordinator
                .tx
                .send(watcher_intent(&coordinator, root, op))
                .unwrap();
        }
        let first = coordinator.rx.recv().unwrap();
        apply(&mut coordinator, first);
        assert!(coordinator
            .store
            .snapshot()
            .contains(&EntryKey::from_path(root, &path)));
    }

    #[test]
    fn removed_root_discards_subsequent_intents() {
        let temp = TempDir::new().unwrap();
        let mut coordinator = test_coordinator(EngineConfig::default());
        let handle = add_root(&mut coordinator, 1, temp.path());
        let root = RootId(1);

        assert!(coordinator.store.snapshot().root_len(root) > 0);

        apply(&mut coordinator, SyncMessage::RemoveRoot { root });
        assert_eq!(coordinator.store.snapshot().root_len(root), 0);
        assert_eq!(handle.state(), RootState::Removing);

        let late = watcher_intent(
            &coordinator,
            root,
            MutationOp::Insert {
                path: temp.path().join("late.txt"),
                meta: file_meta(1),
                generation: 1,
            },
        );
        apply(&mut coordinator, late);
        assert_eq!(coordinator.store.snapshot().root_len(root), 0);

        // Removing again is idempotent.
        apply(&mut coordinator, SyncMessage::RemoveRoot { root });
    }

    #[test]
    fn directory_insert_from_watcher_expands_contents() {
        let temp = TempDir::new().unwrap();
        let mut coordinator = test_coordinator(EngineConfig::default());
        add_root(&mut coordinator, 1, temp.path());
        let root = RootId(1);

        // Create a populated directory after the scan, as if it was moved in
        // from outside and the backend reported only the top-level create.
        let new_dir = temp.path().join("dropped");
        fs::create_dir(&new_dir).unwrap();
        File::create(new_dir.join("inner.txt")).unwrap();

        let insert = watcher_intent(
            &coordinator,
            root,
            MutationOp::Insert {
                path: new_dir.clone(),
                meta: EntryMeta {
                    kind: EntryKind::Directory,
                    size: 0,
                    modified_at: 0,
                },
                generation: 1,
            },
        );
        apply(&mut coordinator, insert);

        let snapshot = coordinator.store.snapshot();
        assert!(snapshot.contains(&EntryKey::from_path(root, &new_dir)));
        assert!(snapshot.contains(&EntryKey::from_path(root, &new_dir.join("inner.txt"))));
    }

    #[test]
    fn overflow_drops_backlog_and_schedules_rescans() {
        let temp = TempDir::new().unwrap();
        File::create(temp.path().join("real.txt")).unwrap();

        let mut config = EngineConfig::default();
        config.queue_capacity = 8;
        let mut coordinator = test_coordinator(config);
        let handle = add_root(&mut coordinator, 1, temp.path());
        let root = RootId(1);
        let generation_before = handle.generation.load(Ordering::Relaxed);

        // Flood the queue past capacity with bogus inserts.
        for i in 0..64u64 {
            coordinator
                .tx
                .send(watcher_intent(
                    &coordinator,
                    root,
                    MutationOp::Insert {
                        path: temp.path().join(format!("bogus-{i}.txt")),
                        meta: file_meta(i),
                        generation: 1,
                    },
                ))
                .unwrap();
        }
        let first = coordinator.rx.recv().unwrap();
        apply(&mut coordinator, first);

        // The backlog was dropped, a fresh scan is resynchronizing.
        assert!(handle.generation.load(Ordering::Relaxed) > generation_before);
        pump_until_active(&mut coordinator, &handle);

        let snapshot = coordinator.store.snapshot();
        assert!(snapshot.contains(&EntryKey::from_path(root, &temp.path().join("real.txt"))));
        assert!(!snapshot
            .iter_root(root)
            .any(|(key, _)| key.path.contains("bogus")));
    }

    #[test]
    fn search_sees_only_committed_batches() {
        use crate::query::{search_snapshot, CompiledQuery};
        use crate::cancel::CancellationToken;

        let temp = TempDir::new().unwrap();
        File::create(temp.path().join("findme.txt")).unwrap();

        let mut coordinator = test_coordinator(EngineConfig::default());
        add_root(&mut coordinator, 1, temp.path());

        let query = CompiledQuery::compile("findme").unwrap();
        let options = crate::types::SearchOptions {
            root: Some(RootId(1)),
            kind: KindFilter::File,
            limit: None,
        };
        let hits = search_snapshot(
            &coordinator.store.snapshot(),
            &query,
            &options,
            &CancellationToken::noop(),
        )
        .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "findme.txt");

        // Delete processed: the next snapshot no longer matches.
        let remove = watcher_intent(
            &coordinator,
            RootId(1),
            MutationOp::Remove {
                path: temp.path().join("findme.txt"),
            },
        );
        apply(&mut coordinator, remove);
        let hits = search_snapshot(
            &coordinator.store.snapshot(),
            &query,
            &options,
            &CancellationToken::noop(),
        )
        .unwrap();
        assert!(hits.is_empty());
    }
}
