//! Cancellation tokens for search and scan operations.
//!
//! A `SearchVersionTracker` hands out version numbers; starting a new search
//! bumps the active version, which cancels every in-flight search still
//! holding an older token. Results of a cancelled search are discarded,
//! never merged.
//!
//! ## Sparse Checking
//!
//! For tight loops over large indexes, `is_cancelled_sparse()` only reads
//! the atomic every 65,536 iterations to keep the overhead negligible.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// How often long-running loops should check whether execution was cancelled.
/// Using a power of 2 allows efficient modulo via bitwise AND.
pub const CANCEL_CHECK_INTERVAL: usize = 0x10000; // 65,536

/// Tracks the active search version for cancellation.
///
/// When a new search starts, call `next_version()` to get a new version
/// number. Searches holding tokens for older versions observe cancellation
/// the next time they check.
#[derive(Debug, Default)]
pub struct SearchVersionTracker {
    active_version: Arc<AtomicU64>,
}

impl SearchVersionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the active version and returns the new version number.
    ///
    /// This effectively cancels any in-flight searches using older versions.
    pub fn next_version(&self) -> u64 {
        self.active_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Marks a caller-provided version as active if it is newer than the
    /// currently active version.
    ///
    /// Returns the resulting active version after the update attempt.
    pub fn activate_version(&self, version: u64) -> u64 {
        let mut current = self.active_version.load(Ordering::SeqCst);
        loop {
            if version <= current {
                return current;
            }
            match self.active_version.compare_exchange(
                current,
                version,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return version,
                Err(observed) => current = observed,
            }
        }
    }

    /// Returns the current active version without incrementing.
    pub fn current_version(&self) -> u64 {
        self.active_version.load(Ordering::SeqCst)
    }

    /// Creates a cancellation token bound to the given version.
    ///
    /// The token reports as cancelled once the active version has moved past
    /// the given version.
    pub fn token_for_version(&self, version: u64) -> CancellationToken {
        CancellationToken {
            active_version: self.active_version.clone(),
            version,
        }
    }
}

/// A cancellation token for terminating long-running operations early.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    active_version: Arc<AtomicU64>,
    version: u64,
}

impl CancellationToken {
    /// Creates a token that is never cancelled.
    ///
    /// Useful for tests and operations that should not be interruptible.
    pub fn noop() -> Self {
        Self {
            active_version: Arc::new(AtomicU64::new(0)),
            version: 0,
        }
    }

    /// Checks if this token is still active.
    ///
    /// Returns `Some(())` if still active, `None` if cancelled.
    /// This enables use with the `?` operator for early returns.
    #[inline]
    pub fn is_cancelled(&self) -> Option<()> {
        if self.version != self.active_version.load(Ordering::Relaxed) {
            None
        } else {
            Some(())
        }
    }

    /// Sparse cancellation check - only reads the atomic every
    /// `CANCEL_CHECK_INTERVAL` iterations.
    #[inline]
    pub fn is_cancelled_sparse(&self, counter: usize) -> Option<()> {
        // Bitwise AND works as modulo because the interval is a power of 2
        if counter & (CANCEL_CHECK_INTERVAL - 1) == 0 {
            self.is_cancelled()
        } else {
            Some(())
        }
    }
}

impl Default for CancellationToken {
    /// Default creates a noop token that is never cancelled.
    fn default() -> Self {
        Self::noop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_token_is_never_cancelled() {
        let token = CancellationToken::noop();
        assert!(token.is_cancelled().is_some());
    }

    #[test]
    fn newer_version_cancels_older_token() {
        let tracker = SearchVersionTracker::new();
        let first = tracker.next_version();
        let token = tracker.token_for_version(first);
        assert!(token.is_cancelled().is_some());

        tracker.next_version();
        assert!(token.is_cancelled().is_none());
    }

    #[test]
    fn activate_version_never_moves_backwards() {
        let tracker = SearchVersionTracker::new();
        tracker.activate_version(5);
        assert_eq!(tracker.current_version(), 5);
        tracker.activate_version(3);
        assert_eq!(tracker.current_version(), 5);
    }

    #[test]
    fn sparse_check_skips_between_intervals() {
        let tracker = SearchVersionTracker::new();
        let token = tracker.token_for_version(tracker.next_version());
        tracker.next_version();

        // Off-interval counters do not observe cancellation
        assert!(token.is_cancelled_sparse(1).is_some());
        // Interval boundaries do
        assert!(token.is_cancelled_sparse(0).is_none());
        assert!(token.is_cancelled_sparse(CANCEL_CHECK_INTERVAL).is_none());
    }
}
