//! Shared per-root state.
//!
//! One `RootHandle` per registered root, shared between the engine facade
//! (status queries), the coordinator (lifecycle transitions), the scanner
//! (progress counters) and the watcher (generation tag for live inserts).
//! Everything on it is atomics or small mutexes; status reads never block
//! the write path.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::{RootId, RootState};

#[derive(Debug)]
pub struct RootHandle {
    pub id: RootId,
    /// Canonicalized root path.
    pub path: PathBuf,
    /// Current [`RootState`], stored as its `u8` discriminant.
    state: AtomicU8,
    /// Scan generation counter; bumped at the start of every full rescan.
    pub generation: AtomicU64,
    pub scanned_files: AtomicUsize,
    pub scanned_dirs: AtomicUsize,
    pub errors: AtomicUsize,
    /// Set while cache flushes are failing; cleared on the next success.
    pub store_unavailable: AtomicBool,
    last_error: Mutex<Option<String>>,
    /// Cancellation flag of the in-flight scan, if any.
    scan_cancel: Mutex<Option<Arc<AtomicBool>>>,
}

impl RootHandle {
    pub fn new(id: RootId, path: PathBuf) -> Self {
        Self {
            id,
            path,
            state: AtomicU8::new(RootState::Initializing as u8),
            generation: AtomicU64::new(0),
            scanned_files: AtomicUsize::new(0),
            scanned_dirs: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            store_unavailable: AtomicBool::new(false),
            last_error: Mutex::new(None),
            scan_cancel: Mutex::new(None),
        }
    }

    pub fn state(&self) -> RootState {
        RootState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub fn set_state(&self, state: RootState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub fn record_error(&self, message: impl Into<String>) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock() = Some(message.into());
    }

    pub fn clear_last_error(&self) {
        *self.last_error.lock() = None;
    }

    /// Resets progress counters for a new scan.
    pub fn reset_progress(&self) {
        self.scanned_files.store(0, Ordering::Relaxed);
        self.scanned_dirs.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.clear_last_error();
    }

    /// Cancels the in-flight scan (if any) and installs a fresh cancellation
    /// flag for the next one.
    pub fn arm_scan_cancel(&self) -> Arc<AtomicBool> {
        let fresh = Arc::new(AtomicBool::new(false));
        let mut guard = self.scan_cancel.lock();
        if let Some(previous) = guard.take() {
            previous.store(true, Ordering::SeqCst);
        }
        *guard = Some(fresh.clone());
        fresh
    }

    /// Cancels the in-flight scan without arming a new one.
    pub fn cancel_scan(&self) {
        if let Some(flag) = self.scan_cancel.lock().take() {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_scan_cancel_trips_previous_flag() {
        let handle = RootHandle::new(RootId(1), PathBuf::from("/data"));
        let first = handle.arm_scan_cancel();
        assert!(!first.load(Ordering::SeqCst));
        let second = handle.arm_scan_cancel();
        assert!(first.load(Ordering::SeqCst));
        assert!(!second.load(Ordering::SeqCst));
    }

    #[test]
    fn record_error_tracks_count_and_message() {
        let handle = RootHandle::new(RootId(1), PathBuf::from("/data"));
        handle.record_error("read failed");
        assert_eq!(handle.errors.load(Ordering::Relaxed), 1);
        assert_eq!(handle.last_error().as_deref(), Some("read failed"));
        handle.reset_progress();
        assert_eq!(handle.errors.load(Ordering::Relaxed), 0);
        assert!(handle.last_error().is_none());
    }
}
