//! Real-time filesystem indexing and search.
//!
//! This crate keeps an in-memory index of one or more directory trees
//! continuously consistent with the disk and answers substring/prefix
//! queries against it in sub-millisecond time:
//! - an initial full scan per root, restartable and cancelable
//! - live OS change notifications, normalized and debounced
//! - a single-writer coordinator reconciling both streams with no
//!   duplicates, no lost updates and no torn reads
//! - snapshot-isolated queries with ranking and typeahead supersession
//! - an optional persisted cache so restarts skip the cold scan
//!
//! ```no_run
//! use findex::{EngineConfig, IndexEngine, SearchOptions};
//!
//! let engine = IndexEngine::open(EngineConfig::default())?;
//! let root = engine.add_root("/home/user/projects")?;
//! let hits = engine.search("readme", &SearchOptions::default())?;
//! # let _ = (root, hits);
//! # Ok::<(), findex::IndexError>(())
//! ```

pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
mod persist;
mod query;
mod scan;
mod store;
mod sync;
pub mod types;
mod watch;

pub use cancel::{CancellationToken, SearchVersionTracker};
pub use config::EngineConfig;
pub use engine::IndexEngine;
pub use error::{IndexError, Result};
pub use types::{
    EntryKind, EntryMeta, EntryRef, KindFilter, RootId, RootState, RootStatus, SearchHit,
    SearchOptions,
};
