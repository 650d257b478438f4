//! Directory scanning.
//!
//! A scan walks one root, emitting an `Insert` intent per discovered entry
//! onto the coordinator channel — it never touches the store itself. The
//! walk is iterative with a cooperative cancellation checkpoint per
//! directory and per entry, skips unreadable subtrees without aborting, and
//! avoids revisiting directories through a canonicalized visited set.
//! Symlinks are recorded as entries but never followed.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;

use crate::error::IndexError;
use crate::sync::intent::{IntentSource, MutationIntent, MutationOp, Sequencer, SyncMessage};
use crate::sync::root::RootHandle;
use crate::types::EntryMeta;

/// Pause between retries of a transiently failing directory read.
const TRANSIENT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// One full scan of a root. Constructed by the coordinator, run on its own
/// thread.
pub(crate) struct ScanTask {
    handle: Arc<RootHandle>,
    generation: u64,
    cancel: Arc<AtomicBool>,
    tx: Sender<SyncMessage>,
    seq: Arc<Sequencer>,
    retries: u32,
    ignored: Vec<PathBuf>,
}

impl ScanTask {
    pub fn new(
        handle: Arc<RootHandle>,
        generation: u64,
        cancel: Arc<AtomicBool>,
        tx: Sender<SyncMessage>,
        seq: Arc<Sequencer>,
        retries: u32,
        ignored: Vec<PathBuf>,
    ) -> Self {
        Self {
            handle,
            generation,
            cancel,
            tx,
            seq,
            retries,
            ignored,
        }
    }

    pub fn run(self) {
        let root = self.handle.path.clone();
        let since_seq = self.seq.current();
        if self
            .tx
            .send(SyncMessage::ScanStarted {
                root: self.handle.id,
                generation: self.generation,
                since_seq,
            })
            .is_err()
        {
            return;
        }

        if self.is_cancelled() {
            self.finish_aborted(None);
            return;
        }

        let root_meta = match fs::symlink_metadata(&root) {
            Ok(meta) => meta,
            Err(error) => {
                self.handle
                    .record_error(format!("root unreadable: {error}"));
                self.finish_aborted(Some(format!(
                    "unable to read root {}: {error}",
                    root.display()
                )));
                return;
            }
        };

        let mut visited: HashSet<PathBuf> = HashSet::new();
        if let Ok(canonical) = fs::canonicalize(&root) {
            visited.insert(canonical);
        }

        let mut stack: Vec<PathBuf> = Vec::new();
        if !self.emit_insert(&root, EntryMeta::from_fs_metadata(&root_meta)) {
            return;
        }
        if root_meta.file_type().is_dir() {
            self.handle.scanned_dirs.fetch_add(1, Ordering::Relaxed);
            stack.push(root.clone());
        } else {
            self.handle.scanned_files.fetch_add(1, Ordering::Relaxed);
        }

        while let Some(dir) = stack.pop() {
            if self.is_cancelled() {
                self.finish_aborted(None);
                return;
            }

            let Some(children) = self.read_dir_entries(&dir) else {
                continue;
            };

            for (path, meta) in children {
                if self.is_cancelled() {
                    self.finish_aborted(None);
                    return;
                }
                if self.is_ignored(&path) {
                    continue;
                }

                if !self.emit_insert(&path, EntryMeta::from_fs_metadata(&meta)) {
                    return;
                }

                if meta.file_type().is_dir() {
                    self.handle.scanned_dirs.fetch_add(1, Ordering::Relaxed);
                    if self.enters_cycle(&path, &mut visited) {
                        log::warn!(
                            "scan skipping already-visited directory {}",
                            path.display()
                        );
                        continue;
                    }
                    stack.push(path);
                } else {
                    self.handle.scanned_files.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        let _ = self.tx.send(SyncMessage::ScanCompleted {
            root: self.handle.id,
            generation: self.generation,
        });
    }

    /// Reads a directory, retrying transient failures. `None` means the
    /// subtree was skipped; the walk continues with its siblings.
    fn read_dir_entries(&self, dir: &Path) -> Option<Vec<(PathBuf, fs::Metadata)>> {
        let mut attempt = 0;
        let iter = loop {
            match fs::read_dir(dir) {
                Ok(iter) => break iter,
                Err(error) if error.kind() == ErrorKind::PermissionDenied => {
                    let skip = IndexError::PermissionDenied(dir.to_path_buf());
                    self.handle.record_error(skip.to_string());
                    log::warn!("scan skipping unreadable directory {}", dir.display());
                    return None;
                }
                Err(error) => {
                    if attempt < self.retries {
                        attempt += 1;
                        std::thread::sleep(TRANSIENT_RETRY_DELAY);
                        continue;
                    }
                    let skip = IndexError::TransientIo(dir.to_path_buf());
                    self.handle.record_error(skip.to_string());
                    log::warn!(
                        "scan skipping directory {} after {} attempts: {}",
                        dir.display(),
                        attempt + 1,
                        error
                    );
                    return None;
                }
            }
        };

        let mut children: Vec<(PathBuf, fs::Metadata)> = Vec::new();
        for entry in iter.flatten() {
            // DirEntry::metadata does not follow symlinks.
            match entry.metadata() {
                Ok(meta) => children.push((entry.path(), meta)),
                Err(error) => {
                    self.handle.record_error(format!(
                        "metadata failed for {}: {error}",
                        entry.path().display()
                    ));
                }
            }
        }
        children.sort_by(|(a, _), (b, _)| a.cmp(b));
        Some(children)
    }

    fn emit_insert(&self, path: &Path, meta: EntryMeta) -> bool {
        self.tx
            .send(SyncMessage::Intent(MutationIntent {
                seq: self.seq.next(),
                root: self.handle.id,
                source: IntentSource::Scanner,
                op: MutationOp::Insert {
                    path: path.to_path_buf(),
                    meta,
                    generation: self.generation,
                },
            }))
            .is_ok()
    }

    /// True when descending into `path` would revisit a directory already
    /// walked in this traversal.
    fn enters_cycle(&self, path: &Path, visited: &mut HashSet<PathBuf>) -> bool {
        match fs::canonicalize(path) {
            Ok(canonical) => !visited.insert(canonical),
            Err(_) => false,
        }
    }

    fn is_ignored(&self, path: &Path) -> bool {
        self.ignored
            .iter()
            .any(|ignored| path == ignored || path.starts_with(ignored))
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn finish_aborted(&self, error: Option<String>) {
        let _ = self.tx.send(SyncMessage::ScanAborted {
            root: self.handle.id,
            generation: self.generation,
            error,
        });
    }
}
