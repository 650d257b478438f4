//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for an [`IndexEngine`](crate::IndexEngine).
///
/// The defaults are tuned for interactive use: short debounce and batch
/// windows keep the index within tens of milliseconds of on-disk reality
/// while still collapsing event bursts into single mutations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory for persisted index snapshots and the root registry.
    /// `None` disables persistence entirely (the index lives in memory only).
    pub cache_dir: Option<PathBuf>,
    /// How long the watcher accumulates raw events for a path before
    /// flushing their net effect as a single mutation.
    pub debounce_window: Duration,
    /// Coordinator batch-commit tick. Mutations become visible to readers at
    /// most this long after they were applied.
    pub batch_tick: Duration,
    /// How often dirty index snapshots are flushed to the cache directory.
    pub flush_interval: Duration,
    /// Intent backlog limit. A backlog beyond this is dropped wholesale and
    /// every active root is rescanned to resynchronize with disk.
    pub queue_capacity: usize,
    /// Retries for transient per-directory IO failures before the subtree
    /// is skipped.
    pub transient_retries: u32,
    /// Paths excluded from scanning and watching.
    pub ignored_paths: Vec<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            debounce_window: Duration::from_millis(50),
            batch_tick: Duration::from_millis(50),
            flush_interval: Duration::from_secs(10),
            queue_capacity: 16_384,
            transient_retries: 1,
            ignored_paths: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Sets the cache directory.
    pub fn with_cache_dir(mut self, cache_dir: PathBuf) -> Self {
        self.cache_dir = Some(cache_dir);
        self
    }

    /// Sets the debounce window.
    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }

    /// Sets the paths excluded from scanning and watching.
    pub fn with_ignored_paths(mut self, ignored: Vec<PathBuf>) -> Self {
        self.ignored_paths = ignored;
        self
    }
}
