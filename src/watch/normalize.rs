//! Normalization of raw watcher notifications.
//!
//! Raw `notify` events vary in granularity and reliability across backends.
//! They are mapped here, at the watcher boundary, into the closed set of
//! semantic operations everything downstream works with. Rename halves are
//! paired through the backend's tracker cookie; halves that stay unpaired
//! past the debounce window degrade to independent remove/create.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use fnv::FnvHashMap;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind};

/// A semantic filesystem change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathEvent {
    Created(PathBuf),
    Removed(PathBuf),
    Modified(PathBuf),
    Moved { from: PathBuf, to: PathBuf },
    /// The backend lost events (queue overflow or equivalent); the index
    /// must be resynchronized from a full walk.
    RescanNeeded,
}

#[derive(Debug)]
struct PendingRename {
    from: PathBuf,
    at: Instant,
}

/// Stateful normalizer, one per watched root.
#[derive(Debug, Default)]
pub struct EventNormalizer {
    pending_renames: FnvHashMap<usize, PendingRename>,
}

impl EventNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps one raw event into zero or more semantic operations.
    pub fn normalize(&mut self, event: Event, out: &mut Vec<PathEvent>) {
        if event.need_rescan() {
            out.push(PathEvent::RescanNeeded);
            return;
        }

        match event.kind {
            EventKind::Access(_) => {}
            EventKind::Create(_) => {
                out.extend(event.paths.into_iter().map(PathEvent::Created));
            }
            EventKind::Remove(_) => {
                out.extend(event.paths.into_iter().map(PathEvent::Removed));
            }
            EventKind::Modify(ModifyKind::Name(mode)) => self.normalize_rename(mode, event, out),
            EventKind::Modify(_) | EventKind::Any | EventKind::Other => {
                // Unknown granularity: the debouncer reads attributes from
                // disk at flush, so Modified is always a safe mapping.
                out.extend(event.paths.into_iter().map(PathEvent::Modified));
            }
        }
    }

    fn normalize_rename(&mut self, mode: RenameMode, event: Event, out: &mut Vec<PathEvent>) {
        match mode {
            RenameMode::Both if event.paths.len() >= 2 => {
                let mut paths = event.paths.into_iter();
                let from = paths.next().expect("len checked");
                let to = paths.next().expect("len checked");
                out.push(PathEvent::Moved { from, to });
            }
            RenameMode::From => {
                let Some(from) = event.paths.into_iter().next() else {
                    return;
                };
                match event.attrs.tracker() {
                    Some(cookie) => {
                        self.pending_renames.insert(
                            cookie,
                            PendingRename {
                                from,
                                at: Instant::now(),
                            },
                        );
                    }
                    // No correlating identifier: two independent operations.
                    None => out.push(PathEvent::Removed(from)),
                }
            }
            RenameMode::To => {
                let Some(to) = event.paths.into_iter().next() else {
                    return;
                };
                match event.attrs.tracker().and_then(|c| self.pending_renames.remove(&c)) {
                    Some(pending) => out.push(PathEvent::Moved {
                        from: pending.from,
                        to,
                    }),
                    None => out.push(PathEvent::Created(to)),
                }
            }
            _ => {
                // Rename with unknown direction: let the flush-time stat
                // decide whether each path still exists.
                out.extend(event.paths.into_iter().map(PathEvent::Modified));
            }
        }
    }

    /// Flushes rename halves that never found their partner. Called by the
    /// debounce worker once per flush cycle.
    pub fn drain_stale_renames(&mut self, older_than: Duration, out: &mut Vec<PathEvent>) {
        let stale: Vec<usize> = self
            .pending_renames
            .iter()
            .filter(|(_, pending)| pending.at.elapsed() >= older_than)
            .map(|(cookie, _)| *cookie)
            .collect();
        for cookie in stale {
            if let Some(pending) = self.pending_renames.remove(&cookie) {
                out.push(PathEvent::Removed(pending.from));
            }
        }
    }

    /// True when a rename half is waiting for its partner.
    pub fn has_pending_renames(&self) -> bool {
        !self.pending_renames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, Flag, MetadataKind, RemoveKind};

    fn normalize_one(normalizer: &mut EventNormalizer, event: Event) -> Vec<PathEvent> {
        let mut out = Vec::new();
        normalizer.normalize(event, &mut out);
        out
    }

    #[test]
    fn create_and_remove_map_directly() {
        let mut normalizer = EventNormalizer::new();
        let created = normalize_one(
            &mut normalizer,
            Event::new(EventKind::Create(CreateKind::File)).add_path("/data/a".into()),
        );
        assert_eq!(created, vec![PathEvent::Created("/data/a".into())]);

        let removed = normalize_one(
            &mut normalizer,
            Event::new(EventKind::Remove(RemoveKind::Any)).add_path("/data/a".into()),
        );
        assert_eq!(removed, vec![PathEvent::Removed("/data/a".into())]);
    }

    #[test]
    fn access_events_are_dropped() {
        let mut normalizer = EventNormalizer::new();
        let out = normalize_one(
            &mut normalizer,
            Event::new(EventKind::Access(notify::event::AccessKind::Any))
                .add_path("/data/a".into()),
        );
        assert!(out.is_empty());
    }

    #[test]
    fn metadata_modify_maps_to_modified() {
        let mut normalizer = EventNormalizer::new();
        let out = normalize_one(
            &mut normalizer,
            Event::new(EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any)))
                .add_path("/data/a".into()),
        );
        assert_eq!(out, vec![PathEvent::Modified("/data/a".into())]);
    }

    #[test]
    fn rename_both_becomes_move() {
        let mut normalizer = EventNormalizer::new();
        let out = normalize_one(
            &mut normalizer,
            Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
                .add_path("/data/old".into())
                .add_path("/data/new".into()),
        );
        assert_eq!(
            out,
            vec![PathEvent::Moved {
                from: "/data/old".into(),
                to: "/data/new".into(),
            }]
        );
    }

    #[test]
    fn rename_halves_pair_through_tracker_cookie() {
        let mut normalizer = EventNormalizer::new();
        let from_half = normalize_one(
            &mut normalizer,
            Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
                .add_path("/data/old".into())
                .set_tracker(7),
        );
        assert!(from_half.is_empty());
        assert!(normalizer.has_pending_renames());

        let to_half = normalize_one(
            &mut normalizer,
            Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
                .add_path("/data/new".into())
                .set_tracker(7),
        );
        assert_eq!(
            to_half,
            vec![PathEvent::Moved {
                from: "/data/old".into(),
                to: "/data/new".into(),
            }]
        );
        assert!(!normalizer.has_pending_renames());
    }

    #[test]
    fn uncorrelated_halves_stay_independent() {
        let mut normalizer = EventNormalizer::new();
        let from_half = normalize_one(
            &mut normalizer,
            Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
                .add_path("/data/old".into()),
        );
        assert_eq!(from_half, vec![PathEvent::Removed("/data/old".into())]);

        let to_half = normalize_one(
            &mut normalizer,
            Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
                .add_path("/data/new".into())
                .set_tracker(9),
        );
        assert_eq!(to_half, vec![PathEvent::Created("/data/new".into())]);
    }

    #[test]
    fn stale_rename_half_degrades_to_remove() {
        let mut normalizer = EventNormalizer::new();
        normalize_one(
            &mut normalizer,
            Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
                .add_path("/data/old".into())
                .set_tracker(3),
        );

        let mut out = Vec::new();
        normalizer.drain_stale_renames(Duration::ZERO, &mut out);
        assert_eq!(out, vec![PathEvent::Removed("/data/old".into())]);
        assert!(!normalizer.has_pending_renames());
    }

    #[test]
    fn rescan_flag_requests_resync() {
        let mut normalizer = EventNormalizer::new();
        let out = normalize_one(
            &mut normalizer,
            Event::new(EventKind::Other).set_flag(Flag::Rescan),
        );
        assert_eq!(out, vec![PathEvent::RescanNeeded]);
    }
}
