//! The path table: the single source of truth for indexed entries.
//!
//! Entries are keyed by `(RootId, path)` in a `BTreeMap`, so every subtree
//! operation (cascaded removal, atomic rename, per-root iteration) is a key
//! range over the map. The table itself is a plain value; concurrency and
//! snapshot publication live in [`PathStore`](super::PathStore).

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;

use crate::types::{display_name, EntryKind, EntryMeta, RootId};

/// Key of one indexed entry. Ordering is `(root, path)`, which groups each
/// root's entries into one contiguous key range.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryKey {
    pub root: RootId,
    pub path: String,
}

impl EntryKey {
    pub fn new(root: RootId, path: impl Into<String>) -> Self {
        Self {
            root,
            path: path.into(),
        }
    }

    pub fn from_path(root: RootId, path: &Path) -> Self {
        Self {
            root,
            path: path.to_string_lossy().into_owned(),
        }
    }
}

/// One indexed entry.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub name: String,
    pub meta: EntryMeta,
    /// Scan generation that last observed this entry.
    pub generation: u64,
    /// Sequence number of the last mutation applied to this path. Intents
    /// with an older sequence number are stale and must not overwrite this
    /// entry.
    pub last_seq: u64,
}

/// The in-memory entry table with per-root counts.
#[derive(Debug, Clone, Default)]
pub struct PathTable {
    entries: BTreeMap<EntryKey, StoredEntry>,
    counts: BTreeMap<RootId, usize>,
}

impl PathTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries belonging to one root.
    pub fn root_len(&self, root: RootId) -> usize {
        self.counts.get(&root).copied().unwrap_or(0)
    }

    pub fn get(&self, key: &EntryKey) -> Option<&StoredEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &EntryKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts or replaces the entry at `path`.
    pub fn insert(
        &mut self,
        root: RootId,
        path: &Path,
        meta: EntryMeta,
        generation: u64,
        seq: u64,
    ) {
        let key = EntryKey::from_path(root, path);
        let entry = StoredEntry {
            name: display_name(path),
            meta,
            generation,
            last_seq: seq,
        };
        if self.entries.insert(key, entry).is_none() {
            *self.counts.entry(root).or_insert(0) += 1;
        }
    }

    /// Updates attributes of an existing entry. Returns false when the path
    /// is not indexed.
    pub fn update_meta(&mut self, key: &EntryKey, meta: EntryMeta, seq: u64) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.meta = meta;
                entry.last_seq = seq;
                true
            }
            None => false,
        }
    }

    /// Removes the entry at `path` and every descendant. Returns the number
    /// of entries removed (0 when the path was not indexed).
    pub fn remove_subtree(&mut self, root: RootId, path: &str) -> usize {
        let mut keys = self.subtree_keys(root, path);
        if self.entries.contains_key(&EntryKey::new(root, path)) {
            keys.push(EntryKey::new(root, path));
        }
        let removed = keys.len();
        for key in keys {
            self.entries.remove(&key);
        }
        self.adjust_count(root, removed);
        removed
    }

    /// Renames the subtree rooted at `from` to `to`, rewriting the key
    /// prefix of every descendant and stamping all moved entries with `seq`.
    /// Entry attributes and generations are preserved. Returns the number of
    /// entries moved.
    pub fn rename_subtree(&mut self, root: RootId, from: &str, to: &str, seq: u64) -> usize {
        let mut moved = Vec::new();
        if let Some(entry) = self.entries.remove(&EntryKey::new(root, from)) {
            moved.push((EntryKey::new(root, to), entry, true));
        }
        for key in self.subtree_keys(root, from) {
            let entry = self
                .entries
                .remove(&key)
                .expect("subtree key collected from live map");
            let suffix = &key.path[from.len()..];
            moved.push((EntryKey::new(root, format!("{to}{suffix}")), entry, false));
        }

        let count = moved.len();
        for (key, mut entry, is_top) in moved {
            if is_top {
                entry.name = display_name(Path::new(to));
            }
            entry.last_seq = seq;
            self.entries.insert(key, entry);
        }
        count
    }

    /// Removes entries of `root` whose generation predates `generation` and
    /// which no intent sequenced after `since_seq` (the last sequence number
    /// allocated before the scan began) has touched. This is the end-of-scan
    /// reconciliation: it drops entries that vanished from disk while no
    /// watcher was active. Returns the number pruned.
    pub fn prune_generation(&mut self, root: RootId, generation: u64, since_seq: u64) -> usize {
        let stale: Vec<EntryKey> = self
            .iter_root(root)
            .filter(|(_, entry)| entry.generation < generation && entry.last_seq <= since_seq)
            .map(|(key, _)| key.clone())
            .collect();
        let pruned = stale.len();
        for key in stale {
            self.entries.remove(&key);
        }
        self.adjust_count(root, pruned);
        pruned
    }

    /// Removes every entry belonging to `root`. Returns the number removed.
    pub fn remove_root(&mut self, root: RootId) -> usize {
        let keys: Vec<EntryKey> = self.iter_root(root).map(|(key, _)| key.clone()).collect();
        let removed = keys.len();
        for key in keys {
            self.entries.remove(&key);
        }
        self.counts.remove(&root);
        removed
    }

    /// Iterates the entries of one root in path order.
    pub fn iter_root(&self, root: RootId) -> impl Iterator<Item = (&EntryKey, &StoredEntry)> {
        self.entries
            .range((
                Bound::Included(EntryKey::new(root, String::new())),
                Bound::Unbounded,
            ))
            .take_while(move |(key, _)| key.root == root)
    }

    /// Iterates all entries in `(root, path)` order.
    pub fn iter(&self) -> impl Iterator<Item = (&EntryKey, &StoredEntry)> {
        self.entries.iter()
    }

    /// Entries of `root` whose path is `prefix` or lies under it.
    #[allow(dead_code)] // Used by tests
    pub fn lookup_by_prefix(
        &self,
        root: RootId,
        prefix: &str,
    ) -> Vec<(&EntryKey, &StoredEntry)> {
        let mut result = Vec::new();
        let exact = EntryKey::new(root, prefix);
        result.extend(self.entries.range(exact.clone()..=exact));
        let (start, end) = Self::subtree_bounds(root, prefix);
        result.extend(self.entries.range((Bound::Included(start), Bound::Excluded(end))));
        result
    }

    /// Keys strictly under `prefix` (the prefix entry itself excluded).
    fn subtree_keys(&self, root: RootId, prefix: &str) -> Vec<EntryKey> {
        let (start, end) = Self::subtree_bounds(root, prefix);
        self.entries
            .range((Bound::Included(start), Bound::Excluded(end)))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Key range covering exactly the descendants of `prefix`: paths in
    /// `[prefix + SEP, prefix + (SEP+1))`. Excludes sibling paths that merely
    /// share the string prefix (`/a/b` vs `/a/bc`).
    fn subtree_bounds(root: RootId, prefix: &str) -> (EntryKey, EntryKey) {
        let sep = std::path::MAIN_SEPARATOR;
        let start = EntryKey::new(root, format!("{prefix}{sep}"));
        let mut end_path = String::with_capacity(prefix.len() + 1);
        end_path.push_str(prefix);
        end_path.push((sep as u8 + 1) as char);
        (start, EntryKey::new(root, end_path))
    }

    fn adjust_count(&mut self, root: RootId, removed: usize) {
        if removed == 0 {
            return;
        }
        if let Some(count) = self.counts.get_mut(&root) {
            *count = count.saturating_sub(removed);
            if *count == 0 {
                self.counts.remove(&root);
            }
        }
    }
}
