//! Public result and status types.
//!
//! These are the types crossing the engine boundary: search hits, root
//! status payloads, and the filter options accepted by `search`.

use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

/// Identifier of a registered watch root.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RootId(pub(crate) u64);

impl RootId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Entry kind enumeration.
///
/// Symlinks are indexed as non-directory entries and never followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
        }
    }
}

/// Filesystem attributes of an indexed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub kind: EntryKind,
    /// Size in bytes; 0 for directories.
    pub size: u64,
    /// Last modification as Unix seconds; 0 when unavailable.
    pub modified_at: u64,
}

impl EntryMeta {
    /// Builds entry attributes from filesystem metadata.
    pub fn from_fs_metadata(metadata: &std::fs::Metadata) -> Self {
        let kind = if metadata.file_type().is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        let size = match kind {
            EntryKind::Directory => 0,
            EntryKind::File => metadata.len(),
        };
        let modified_at = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            kind,
            size,
            modified_at,
        }
    }
}

/// Kind filter for search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KindFilter {
    #[default]
    All,
    File,
    Directory,
}

impl KindFilter {
    pub fn matches(&self, kind: EntryKind) -> bool {
        match self {
            Self::All => true,
            Self::File => kind == EntryKind::File,
            Self::Directory => kind == EntryKind::Directory,
        }
    }
}

/// Options accepted by `search`.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Restrict results to one root.
    pub root: Option<RootId>,
    /// Restrict results to files or directories.
    pub kind: KindFilter,
    /// Maximum number of results; unlimited when `None`.
    pub limit: Option<usize>,
}

/// One search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub root: RootId,
    pub path: String,
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub modified_at: u64,
}

impl SearchHit {
    /// Reference suitable for [`resolve_path`](crate::IndexEngine::resolve_path).
    pub fn entry_ref(&self) -> EntryRef {
        EntryRef {
            root: self.root,
            path: self.path.clone(),
        }
    }
}

/// A stable reference to an indexed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRef {
    pub root: RootId,
    pub path: String,
}

/// Lifecycle state of a watch root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RootState {
    /// Initial scan (or rescan) in progress; existing entries stay queryable.
    Initializing = 0,
    /// Steady state: live events keep the index consistent.
    Active = 1,
    /// Root is being detached; terminal.
    Removing = 2,
}

impl RootState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Active,
            2 => Self::Removing,
            _ => Self::Initializing,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Active => "active",
            Self::Removing => "removing",
        }
    }
}

/// Status snapshot for one watch root.
#[derive(Debug, Clone)]
pub struct RootStatus {
    pub root: std::path::PathBuf,
    pub state: RootState,
    pub entries_indexed: usize,
    pub scanned_files: usize,
    pub scanned_dirs: usize,
    /// Scan generation counter; bumped at the start of every full (re)scan.
    pub generation: u64,
    pub errors: usize,
    pub watcher_enabled: bool,
    pub last_error: Option<String>,
}

/// Display name for a path: its final component, or the whole path for
/// roots like `/`.
pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
