//! Filesystem watching.
//!
//! One `notify` subscription per watched root. The raw callback immediately
//! normalizes events ([`normalize`]) and hands them to the per-root debounce
//! worker ([`debounce`]), which flushes net-effect mutation intents onto the
//! coordinator channel. The watcher never touches the store.

pub(crate) mod debounce;
pub(crate) mod normalize;

use std::sync::Arc;

use crossbeam_channel::Sender;
use notify::{recommended_watcher, RecommendedWatcher, RecursiveMode, Watcher};

use crate::config::EngineConfig;
use crate::error::{IndexError, Result};
use crate::sync::intent::{Sequencer, SyncMessage};
use crate::sync::root::RootHandle;
use debounce::Debouncer;

/// A live watch on one root: the OS subscription plus its debounce worker.
///
/// Dropping the handle closes the subscription and flushes the worker.
pub(crate) struct RootWatcher {
    // Dropped before the debouncer so no callback runs against a dead worker.
    _watcher: RecommendedWatcher,
    _debouncer: Debouncer,
}

/// Subscribes to OS notifications for `handle.path`.
///
/// The subscription is established before the initial scan starts, so no
/// event occurring during the scan window is missed.
pub(crate) fn spawn_root_watcher(
    handle: Arc<RootHandle>,
    config: &EngineConfig,
    tx: Sender<SyncMessage>,
    seq: Arc<Sequencer>,
) -> Result<RootWatcher> {
    let debouncer = Debouncer::spawn(
        handle.clone(),
        config.debounce_window,
        config.ignored_paths.clone(),
        tx,
        seq,
    );
    let shared = debouncer.shared();

    let mut watcher = recommended_watcher(move |event_result: notify::Result<notify::Event>| {
        match event_result {
            Ok(event) => shared.ingest(event),
            Err(error) => shared.ingest_error(&error),
        }
    })
    .map_err(|error| {
        IndexError::Internal(format!(
            "failed to create filesystem watcher for {}: {error}",
            handle.path.display()
        ))
    })?;

    watcher
        .watch(&handle.path, RecursiveMode::Recursive)
        .map_err(|error| {
            IndexError::Internal(format!(
                "failed to watch {}: {error}",
                handle.path.display()
            ))
        })?;

    Ok(RootWatcher {
        _watcher: watcher,
        _debouncer: debouncer,
    })
}
