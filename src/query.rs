//! Query evaluation.
//!
//! Purely read-only: a search runs against one store snapshot and never
//! coordinates with the write path. Cancellation is checked sparsely inside
//! the candidate loop so a superseded typeahead query stops quickly; a
//! cancelled search returns `None` and its partial result is discarded.

pub(crate) mod expression;
pub(crate) mod rank;

pub use expression::CompiledQuery;
pub use rank::MatchRank;

use crate::cancel::CancellationToken;
use crate::store::{EntryKey, PathTable, StoredEntry};
use crate::types::{SearchHit, SearchOptions};

/// Evaluates a compiled query against a snapshot.
///
/// Returns `None` when the search was cancelled (superseded by a newer
/// version), `Some(hits)` otherwise — ranked, tie-broken, and truncated to
/// `options.limit`.
pub(crate) fn search_snapshot(
    table: &PathTable,
    query: &CompiledQuery,
    options: &SearchOptions,
    cancel: &CancellationToken,
) -> Option<Vec<SearchHit>> {
    if table.is_empty() {
        cancel.is_cancelled()?;
        return Some(Vec::new());
    }

    let primary = query.primary_name_term();
    let mut ranked: Vec<(MatchRank, usize, SearchHit)> = Vec::new();

    let entries: Box<dyn Iterator<Item = (&EntryKey, &StoredEntry)> + '_> = match options.root {
        Some(root) => Box::new(table.iter_root(root)),
        None => Box::new(table.iter()),
    };

    for (i, (key, entry)) in entries.enumerate() {
        cancel.is_cancelled_sparse(i)?;

        if !options.kind.matches(entry.meta.kind) {
            continue;
        }

        let name_lower = entry.name.to_ascii_lowercase();
        let path_lower = if query.needs_path() {
            key.path.to_ascii_lowercase().replace('\\', "/")
        } else {
            String::new()
        };
        if !query.matches(&name_lower, &path_lower) {
            continue;
        }

        let hit = SearchHit {
            root: key.root,
            path: key.path.clone(),
            name: entry.name.clone(),
            kind: entry.meta.kind,
            size: entry.meta.size,
            modified_at: entry.meta.modified_at,
        };
        ranked.push((rank::rank_name(primary, &name_lower), rank::path_depth(&key.path), hit));
    }

    cancel.is_cancelled()?;

    ranked.sort_by(|(rank_a, depth_a, hit_a), (rank_b, depth_b, hit_b)| {
        rank_a
            .cmp(rank_b)
            .then_with(|| depth_a.cmp(depth_b))
            .then_with(|| hit_a.path.cmp(&hit_b.path))
    });

    let mut hits: Vec<SearchHit> = ranked.into_iter().map(|(_, _, hit)| hit).collect();
    if let Some(limit) = options.limit {
        hits.truncate(limit);
    }
    Some(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::SearchVersionTracker;
    use crate::types::{EntryKind, EntryMeta, KindFilter, RootId};
    use std::path::Path;

    fn meta(kind: EntryKind) -> EntryMeta {
        EntryMeta {
            kind,
            size: 0,
            modified_at: 0,
        }
    }

    fn sample_table() -> PathTable {
        let mut table = PathTable::default();
        let root = RootId(1);
        for (i, (path, kind)) in [
            ("/data", EntryKind::Directory),
            ("/data/a.txt", EntryKind::File),
            ("/data/sub", EntryKind::Directory),
            ("/data/sub/b.txt", EntryKind::File),
            ("/data/sub/backup.tar", EntryKind::File),
            ("/data/sub/deep", EntryKind::Directory),
            ("/data/sub/deep/b.txt", EntryKind::File),
            ("/data/abc.txt", EntryKind::File),
        ]
        .iter()
        .enumerate()
        {
            table.insert(root, Path::new(path), meta(*kind), 1, i as u64 + 1);
        }
        table
    }

    fn search(table: &PathTable, raw: &str, options: SearchOptions) -> Vec<SearchHit> {
        let query = CompiledQuery::compile(raw).unwrap();
        search_snapshot(table, &query, &options, &CancellationToken::noop()).unwrap()
    }

    #[test]
    fn substring_search_finds_matches_case_insensitively() {
        let table = sample_table();
        let hits = search(&table, "B.TXT", SearchOptions::default());
        let paths: Vec<&str> = hits.iter().map(|h| h.path.as_str()).collect();
        assert_eq!(paths, vec!["/data/sub/b.txt", "/data/sub/deep/b.txt"]);
    }

    #[test]
    fn ranking_exact_then_prefix_then_substring() {
        let mut table = PathTable::default();
        let root = RootId(1);
        table.insert(root, Path::new("/d/notes_b"), meta(EntryKind::File), 1, 1);
        table.insert(root, Path::new("/d/b"), meta(EntryKind::File), 1, 2);
        table.insert(root, Path::new("/d/b.txt"), meta(EntryKind::File), 1, 3);

        let hits = search(&table, "b", SearchOptions::default());
        let names: Vec<&str> = hits.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["b", "b.txt", "notes_b"]);
    }

    #[test]
    fn ties_break_by_depth_then_path() {
        let table = sample_table();
        let hits = search(&table, "b.txt", SearchOptions::default());
        // Same rank (exact): shallower path first.
        assert_eq!(hits[0].path, "/data/sub/b.txt");
        assert_eq!(hits[1].path, "/data/sub/deep/b.txt");
    }

    #[test]
    fn kind_filter_restricts_results() {
        let table = sample_table();
        let hits = search(
            &table,
            "sub",
            SearchOptions {
                kind: KindFilter::Directory,
                ..Default::default()
            },
        );
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "/data/sub");
    }

    #[test]
    fn root_filter_restricts_results() {
        let mut table = sample_table();
        table.insert(
            RootId(2),
            Path::new("/other/b.txt"),
            meta(EntryKind::File),
            1,
            99,
        );

        let all = search(&table, "b.txt", SearchOptions::default());
        assert_eq!(all.len(), 3);

        let scoped = search(
            &table,
            "b.txt",
            SearchOptions {
                root: Some(RootId(1)),
                ..Default::default()
            },
        );
        assert_eq!(scoped.len(), 2);
        assert!(scoped.iter().all(|h| h.root == RootId(1)));
    }

    #[test]
    fn limit_truncates_after_ranking() {
        let table = sample_table();
        let hits = search(
            &table,
            "b",
            SearchOptions {
                limit: Some(1),
                ..Default::default()
            },
        );
        assert_eq!(hits.len(), 1);
        // The best-ranked match survives truncation.
        assert_eq!(hits[0].path, "/data/sub/b.txt");
    }

    #[test]
    fn path_query_matches_segments() {
        let table = sample_table();
        let hits = search(&table, "sub/b", SearchOptions::default());
        let paths: Vec<&str> = hits.iter().map(|h| h.path.as_str()).collect();
        assert_eq!(paths, vec!["/data/sub/b.txt", "/data/sub/backup.tar"]);
    }

    #[test]
    fn cancelled_search_returns_none() {
        let table = sample_table();
        let tracker = SearchVersionTracker::new();
        let token = tracker.token_for_version(tracker.next_version());
        tracker.next_version();

        let query = CompiledQuery::compile("b").unwrap();
        assert!(search_snapshot(&table, &query, &SearchOptions::default(), &token).is_none());
    }
}
