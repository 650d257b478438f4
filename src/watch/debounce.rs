//! Event debouncing and coalescing.
//!
//! Raw events arrive in bursts (large copies, archive extraction, rename
//! storms). Each watched root runs one debounce worker: semantic events
//! accumulate per path in arrival order, same-path events collapse to their
//! net effect, and one window after the first event the whole batch flushes
//! as mutation intents. Attributes are read from disk at flush time, so the
//! final on-disk state always wins over whatever the burst looked like.

use std::fs;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use fnv::FnvHashMap;
use parking_lot::{Condvar, Mutex};

use super::normalize::{EventNormalizer, PathEvent};
use crate::sync::intent::{IntentSource, MutationIntent, MutationOp, Sequencer, SyncMessage};
use crate::sync::root::RootHandle;
use crate::types::EntryMeta;

/// Net effect of every event seen for one path within the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetChange {
    /// Path exists (or existed); flush rereads its attributes. `created`
    /// distinguishes a new entry from an attribute refresh.
    Upsert { created: bool },
    Remove,
    /// Something was renamed onto this path from `from`.
    Move { from: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Incoming {
    Created,
    Modified,
    Removed,
}

/// Pending changes for one window, in first-arrival order.
#[derive(Debug, Default)]
pub struct PendingQueue {
    order: Vec<PathBuf>,
    by_path: FnvHashMap<PathBuf, NetChange>,
    rescan: bool,
    oldest: Option<Instant>,
}

impl PendingQueue {
    pub fn apply(&mut self, event: PathEvent) {
        match event {
            PathEvent::Created(path) => self.coalesce(path, Incoming::Created),
            PathEvent::Modified(path) => self.coalesce(path, Incoming::Modified),
            PathEvent::Removed(path) => self.coalesce(path, Incoming::Removed),
            PathEvent::Moved { from, to } => self.record_move(from, to),
            PathEvent::RescanNeeded => {
                self.rescan = true;
                self.note_activity();
            }
        }
    }

    #[cfg(test)]
    pub fn get(&self, path: &Path) -> Option<&NetChange> {
        self.by_path.get(path)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    fn coalesce(&mut self, path: PathBuf, incoming: Incoming) {
        self.note_activity();
        match self.by_path.get(&path).cloned() {
            None => {
                let change = match incoming {
                    Incoming::Created => NetChange::Upsert { created: true },
                    Incoming::Modified => NetChange::Upsert { created: false },
                    Incoming::Removed => NetChange::Remove,
                };
                self.by_path.insert(path.clone(), change);
                self.order.push(path);
            }
            Some(NetChange::Move { from }) if incoming == Incoming::Removed => {
                // Rename target removed again: both ends are gone.
                self.by_path.insert(path, NetChange::Remove);
                self.coalesce(from, Incoming::Removed);
            }
            Some(existing) => {
                let next = match (existing, incoming) {
                    (NetChange::Upsert { created }, Incoming::Created) => {
                        NetChange::Upsert { created }
                    }
                    (NetChange::Upsert { created }, Incoming::Modified) => {
                        NetChange::Upsert { created }
                    }
                    (NetChange::Upsert { .. }, Incoming::Removed) => NetChange::Remove,
                    // Removed then recreated within the window nets to a
                    // fresh entry with whatever is on disk at flush.
                    (NetChange::Remove, Incoming::Created | Incoming::Modified) => {
                        NetChange::Upsert { created: true }
                    }
                    (NetChange::Remove, Incoming::Removed) => NetChange::Remove,
                    // Rename target touched afterwards: flush restats it.
                    (change @ NetChange::Move { .. }, _) => change,
                };
                self.by_path.insert(path, next);
            }
        }
    }

    fn record_move(&mut self, from: PathBuf, to: PathBuf) {
        self.note_activity();
        match self.by_path.get(&from).cloned() {
            // Created then renamed within one window: only the destination
            // ever mattered.
            Some(NetChange::Upsert { created: true }) => {
                self.by_path.remove(&from);
                self.coalesce(to, Incoming::Created);
            }
            // Chained rename a -> b -> c collapses to a -> c.
            Some(NetChange::Move { from: earlier }) => {
                self.by_path.remove(&from);
                self.by_path.insert(to.clone(), NetChange::Move { from: earlier });
                self.order.push(to);
            }
            Some(NetChange::Remove) => {
                // The source name was already dead; the destination is new.
                self.coalesce(to, Incoming::Created);
            }
            other => {
                // A pending attribute refresh of the source is subsumed by
                // the move.
                if matches!(other, Some(NetChange::Upsert { .. })) {
                    self.by_path.remove(&from);
                }
                self.by_path.insert(to.clone(), NetChange::Move { from });
                self.order.push(to);
            }
        }
    }

    fn note_activity(&mut self) {
        if self.oldest.is_none() {
            self.oldest = Some(Instant::now());
        }
    }
}

/// State shared between the notify callback and the debounce worker.
pub(crate) struct DebounceShared {
    handle: Arc<RootHandle>,
    window: Duration,
    tx: Sender<SyncMessage>,
    seq: Arc<Sequencer>,
    ignored: Vec<PathBuf>,
    normalizer: Mutex<EventNormalizer>,
    pending: Mutex<PendingQueue>,
    wake: Condvar,
    shutdown: AtomicBool,
}

impl DebounceShared {
    /// Entry point for the notify callback thread.
    pub fn ingest(&self, event: notify::Event) {
        let mut events = Vec::new();
        self.normalizer.lock().normalize(event, &mut events);
        self.enqueue(events);
    }

    /// Watcher errors: counted, and the index is resynchronized from disk
    /// since events may have been lost.
    pub fn ingest_error(&self, error: &notify::Error) {
        self.handle.record_error(format!("watcher error: {error}"));
        log::warn!(
            "filesystem watcher error for {}: {error}",
            self.handle.path.display()
        );
        self.enqueue(vec![PathEvent::RescanNeeded]);
    }

    fn enqueue(&self, events: Vec<PathEvent>) {
        let filtered: Vec<PathEvent> = events
            .into_iter()
            .filter_map(|event| self.filter_event(event))
            .collect();

        let rename_waiting = self.normalizer.lock().has_pending_renames();
        if filtered.is_empty() && !rename_waiting {
            return;
        }

        let mut pending = self.pending.lock();
        for event in filtered {
            pending.apply(event);
        }
        if rename_waiting {
            // Keep the worker ticking so an unpaired rename half eventually
            // degrades to a remove.
            pending.note_activity();
        }
        self.wake.notify_one();
    }

    /// Restricts an event to this root's scope. Ignored paths behave like
    /// removals so a file moved into an ignored subtree disappears from the
    /// index.
    fn filter_event(&self, event: PathEvent) -> Option<PathEvent> {
        match event {
            PathEvent::RescanNeeded => Some(PathEvent::RescanNeeded),
            PathEvent::Moved { from, to } => {
                let from_ok = self.allows(&from);
                let to_ok = self.allows(&to);
                match (from_ok, to_ok) {
                    (true, true) => Some(PathEvent::Moved { from, to }),
                    (true, false) => Some(PathEvent::Removed(from)),
                    (false, true) => Some(PathEvent::Created(to)),
                    (false, false) => None,
                }
            }
            PathEvent::Created(path) | PathEvent::Modified(path)
                if !self.allows(&path) =>
            {
                if self.in_scope(&path) {
                    // In scope but ignored: make sure it is not indexed.
                    Some(PathEvent::Removed(path))
                } else {
                    None
                }
            }
            PathEvent::Removed(path) if !self.in_scope(&path) => None,
            other => Some(other),
        }
    }

    fn in_scope(&self, path: &Path) -> bool {
        path == self.handle.path || path.starts_with(&self.handle.path)
    }

    fn allows(&self, path: &Path) -> bool {
        self.in_scope(path)
            && !self
                .ignored
                .iter()
                .any(|ignored| path == ignored || path.starts_with(ignored))
    }

    /// Flushes one accumulated window as mutation intents.
    fn flush(&self, mut queue: PendingQueue) {
        let order = mem::take(&mut queue.order);
        for path in order {
            let Some(change) = queue.by_path.remove(&path) else {
                continue; // superseded within the window
            };
            match change {
                NetChange::Upsert { created } => match fs::symlink_metadata(&path) {
                    Ok(metadata) => {
                        let meta = EntryMeta::from_fs_metadata(&metadata);
                        let op = if created {
                            MutationOp::Insert {
                                path: path.clone(),
                                meta,
                                generation: self.handle.generation.load(Ordering::Relaxed),
                            }
                        } else {
                            MutationOp::Update {
                                path: path.clone(),
                                meta,
                            }
                        };
                        self.send_intent(op);
                    }
                    // Already gone again: the net effect is removal.
                    Err(_) => self.send_intent(MutationOp::Remove { path }),
                },
                NetChange::Remove => self.send_intent(MutationOp::Remove { path }),
                NetChange::Move { from } => match fs::symlink_metadata(&path) {
                    Ok(metadata) => {
                        self.send_intent(MutationOp::Move {
                            from,
                            to: path.clone(),
                        });
                        self.send_intent(MutationOp::Update {
                            path,
                            meta: EntryMeta::from_fs_metadata(&metadata),
                        });
                    }
                    Err(_) => {
                        self.send_intent(MutationOp::Remove { path: from });
                        self.send_intent(MutationOp::Remove { path });
                    }
                },
            }
        }

        if queue.rescan {
            let _ = self.tx.send(SyncMessage::Rescan {
                root: self.handle.id,
            });
        }
    }

    fn send_intent(&self, op: MutationOp) {
        let _ = self.tx.send(SyncMessage::Intent(MutationIntent {
            seq: self.seq.next(),
            root: self.handle.id,
            source: IntentSource::Watcher,
            op,
        }));
    }
}

/// Handle owning the debounce worker thread. Dropping it flushes and joins.
pub(crate) struct Debouncer {
    inner: Arc<DebounceShared>,
    worker: Option<JoinHandle<()>>,
}

impl Debouncer {
    pub fn spawn(
        handle: Arc<RootHandle>,
        window: Duration,
        ignored: Vec<PathBuf>,
        tx: Sender<SyncMessage>,
        seq: Arc<Sequencer>,
    ) -> Self {
        let inner = Arc::new(DebounceShared {
            handle,
            window,
            tx,
            seq,
            ignored,
            normalizer: Mutex::new(EventNormalizer::new()),
            pending: Mutex::new(PendingQueue::default()),
            wake: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });
        let worker_inner = inner.clone();
        let worker = std::thread::spawn(move || worker_loop(worker_inner));
        Self {
            inner,
            worker: Some(worker),
        }
    }

    pub fn shared(&self) -> Arc<DebounceShared> {
        self.inner.clone()
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(inner: Arc<DebounceShared>) {
    loop {
        let mut batch = {
            let mut pending = inner.pending.lock();
            loop {
                if inner.shutdown.load(Ordering::Relaxed) {
                    break;
                }
                match pending.oldest {
                    Some(oldest) => {
                        let elapsed = oldest.elapsed();
                        if elapsed >= inner.window {
                            break;
                        }
                        inner.wake.wait_for(&mut pending, inner.window - elapsed);
                    }
                    None => {
                        inner.wake.wait(&mut pending);
                    }
                }
            }
            mem::take(&mut *pending)
        };

        let shutting_down = inner.shutdown.load(Ordering::Relaxed);
        let mut stale = Vec::new();
        {
            let mut normalizer = inner.normalizer.lock();
            let age = if shutting_down {
                Duration::ZERO
            } else {
                inner.window
            };
            normalizer.drain_stale_renames(age, &mut stale);
        }
        for event in stale {
            if let Some(event) = inner.filter_event(event) {
                batch.apply(event);
            }
        }

        inner.flush(batch);

        if shutting_down {
            let remainder = mem::take(&mut *inner.pending.lock());
            inner.flush(remainder);
            break;
        }

        if inner.normalizer.lock().has_pending_renames() {
            inner.pending.lock().note_activity();
        }
    }
}
