//! Concurrency-safe storage for the path table.
//!
//! Single-writer / multiple-reader: the coordinator is the only component
//! allowed to commit, and it commits whole batches by swapping in a new
//! `Arc<PathTable>`. Readers clone the `Arc` and evaluate against that
//! snapshot without holding any lock, so a query observes either the
//! pre-batch or post-batch table — never a torn one — and never blocks the
//! writer.

mod table;

pub use table::{EntryKey, PathTable, StoredEntry};

use std::sync::Arc;

use parking_lot::RwLock;

/// Snapshot-publishing wrapper around [`PathTable`].
#[derive(Debug, Default)]
pub struct PathStore {
    current: RwLock<Arc<PathTable>>,
}

impl PathStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the most recently committed snapshot.
    pub fn snapshot(&self) -> Arc<PathTable> {
        self.current.read().clone()
    }

    /// Publishes a new table as one atomic batch commit.
    ///
    /// Only the coordinator calls this.
    pub fn commit(&self, table: PathTable) {
        *self.current.write() = Arc::new(table);
    }
}
