//! Mutation intents and the coordinator channel protocol.
//!
//! The scanner and the watcher never touch the store. They describe what
//! they observed as typed messages on a single ordered channel, and the
//! coordinator — the sole consumer — applies them. Sequence numbers come
//! from one process-wide counter so intents for the same path are totally
//! ordered regardless of their source.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::sync::root::RootHandle;
use crate::types::{EntryMeta, RootId};

/// Monotonic sequence number shared by all intent producers.
#[derive(Debug, Default)]
pub struct Sequencer(AtomicU64);

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next sequence number (starting at 1).
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The most recently allocated sequence number.
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Which component produced an intent. Used for tie-breaking: a
/// scanner-sourced insert colliding with a newer removal gets a ground-truth
/// re-check instead of blind application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentSource {
    Scanner,
    Watcher,
}

/// The mutation itself.
#[derive(Debug, Clone)]
pub enum MutationOp {
    /// Insert (or replace) the entry at `path`.
    Insert {
        path: PathBuf,
        meta: EntryMeta,
        generation: u64,
    },
    /// Remove the entry at `path` and its descendants.
    Remove { path: PathBuf },
    /// Update attributes of an existing entry.
    Update { path: PathBuf, meta: EntryMeta },
    /// Atomically rename the subtree at `from` to `to`.
    Move { from: PathBuf, to: PathBuf },
}

/// A queued, ordered instruction to change the index.
#[derive(Debug, Clone)]
pub struct MutationIntent {
    pub seq: u64,
    pub root: RootId,
    pub source: IntentSource,
    pub op: MutationOp,
}

/// Everything that flows to the coordinator: mutations plus root lifecycle
/// control.
#[derive(Debug)]
pub enum SyncMessage {
    Intent(MutationIntent),
    /// Register a root. `preloaded` entries (from a persisted cache) are
    /// installed at generation 0 before the validating scan starts.
    AddRoot {
        handle: Arc<RootHandle>,
        preloaded: Vec<(PathBuf, EntryMeta)>,
    },
    /// Detach a root and drop all of its entries. Terminal for that root.
    RemoveRoot { root: RootId },
    /// Force a full rescan (user refresh or watcher overflow recovery).
    Rescan { root: RootId },
    /// A scan announces itself before emitting its first insert.
    /// `since_seq` marks the cutoff for end-of-scan reconciliation.
    ScanStarted {
        root: RootId,
        generation: u64,
        since_seq: u64,
    },
    ScanCompleted {
        root: RootId,
        generation: u64,
    },
    ScanAborted {
        root: RootId,
        generation: u64,
        error: Option<String>,
    },
    Shutdown,
}
