//! Index persistence.
//!
//! The on-disk cache is strictly derived state: one postcard-encoded,
//! zstd-compressed snapshot per root plus a small registry of configured
//! roots. A loaded snapshot is never trusted blindly — entries are installed
//! at generation 0 and the validating scan prunes whatever no longer exists
//! on disk. Any decode problem discards the cache and rebuilds from a clean
//! scan.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::thread::available_parallelism;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::types::{EntryKind, EntryMeta};

/// Cache format version - increment when changing the format.
pub const INDEX_CACHE_VERSION: u32 = 1;

/// Persistent snapshot of one root's entry table.
#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    version: u32,
    /// Root path the snapshot belongs to.
    root: PathBuf,
    saved_at: u64,
    entries: Vec<PersistedEntry>,
}

/// One persisted entry. Generation and sequence tags are deliberately not
/// stored; reloaded entries start at generation 0 so the validating scan
/// decides what is still real.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PersistedEntry {
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
    pub modified_at: u64,
}

impl PersistedEntry {
    pub fn meta(&self) -> EntryMeta {
        EntryMeta {
            kind: self.kind,
            size: self.size,
            modified_at: self.modified_at,
        }
    }
}

/// Registry of configured roots, reloaded on engine start.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RootRegistry {
    version: u32,
    roots: Vec<PathBuf>,
}

const REGISTRY_FILE: &str = "roots.bin";

/// Returns the current Unix timestamp in seconds.
pub(crate) fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|value| value.as_secs())
        .unwrap_or(0)
}

/// Cache file path for one root.
pub(crate) fn cache_path_for_root(cache_dir: &Path, root: &Path) -> PathBuf {
    cache_dir.join(format!("index-{}.bin.zst", root_fingerprint(root)))
}

/// Writes a snapshot of one root's entries: postcard encoding, zstd-6
/// multi-threaded compression, atomic temp-file + rename.
pub(crate) fn write_root_snapshot(
    cache_dir: &Path,
    root: &Path,
    entries: Vec<PersistedEntry>,
) -> Result<()> {
    fs::create_dir_all(cache_dir).map_err(|error| {
        IndexError::StoreUnavailable(format!(
            "failed to create cache directory {}: {error}",
            cache_dir.display()
        ))
    })?;

    let snapshot = PersistedIndex {
        version: INDEX_CACHE_VERSION,
        root: root.to_path_buf(),
        saved_at: unix_now_secs(),
        entries,
    };
    let entry_count = snapshot.entries.len();

    let cache_path = cache_path_for_root(cache_dir, root);
    let tmp_path = cache_path.with_extension("tmp");

    {
        let output = File::create(&tmp_path).map_err(|error| {
            IndexError::StoreUnavailable(format!(
                "failed to create cache file {}: {error}",
                tmp_path.display()
            ))
        })?;

        let mut encoder = zstd::Encoder::new(output, 6).map_err(|error| {
            IndexError::Internal(format!("failed to create zstd encoder: {error}"))
        })?;
        let threads = available_parallelism().map(|x| x.get() as u32).unwrap_or(4);
        encoder.multithread(threads).map_err(|error| {
            IndexError::Internal(format!("failed to enable multi-threaded zstd: {error}"))
        })?;

        let mut output = BufWriter::new(encoder.auto_finish());
        let encoded = postcard::to_stdvec(&snapshot).map_err(|error| {
            IndexError::Internal(format!("failed to encode cache with postcard: {error}"))
        })?;
        output.write_all(&encoded).map_err(|error| {
            IndexError::StoreUnavailable(format!(
                "failed to write cache file {}: {error}",
                tmp_path.display()
            ))
        })?;
        output.flush().map_err(|error| {
            IndexError::StoreUnavailable(format!(
                "failed to flush cache file {}: {error}",
                tmp_path.display()
            ))
        })?;
    }

    fs::rename(&tmp_path, &cache_path).map_err(|error| {
        IndexError::StoreUnavailable(format!(
            "failed to finalize cache file {}: {error}",
            cache_path.display()
        ))
    })?;

    log::debug!(
        "wrote index cache to {} ({} entries)",
        cache_path.display(),
        entry_count
    );
    Ok(())
}

/// Loads the persisted snapshot for `root`.
///
/// `Ok(None)` means "no usable cache" (absent, or written for a different
/// root/format version — a cold scan follows). A decode failure is reported
/// as [`IndexError::CorruptIndex`]; the caller discards the cache and
/// rebuilds.
pub(crate) fn load_root_snapshot(
    cache_dir: &Path,
    root: &Path,
) -> Result<Option<Vec<PersistedEntry>>> {
    let cache_path = cache_path_for_root(cache_dir, root);
    let input = match File::open(&cache_path) {
        Ok(file) => file,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(IndexError::StoreUnavailable(format!(
                "failed to open cache file {}: {error}",
                cache_path.display()
            )))
        }
    };

    let decoder = zstd::Decoder::new(input).map_err(|error| {
        IndexError::CorruptIndex(format!(
            "cache decompress failed for {}: {error}",
            cache_path.display()
        ))
    })?;

    let mut encoded = Vec::new();
    BufReader::new(decoder)
        .read_to_end(&mut encoded)
        .map_err(|error| {
            IndexError::CorruptIndex(format!(
                "cache read failed for {}: {error}",
                cache_path.display()
            ))
        })?;

    let snapshot: PersistedIndex = postcard::from_bytes(&encoded).map_err(|error| {
        IndexError::CorruptIndex(format!(
            "cache decode failed for {}: {error}",
            cache_path.display()
        ))
    })?;

    if snapshot.version != INDEX_CACHE_VERSION {
        log::debug!(
            "cache version mismatch for {}: {} != {}",
            cache_path.display(),
            snapshot.version,
            INDEX_CACHE_VERSION
        );
        return Ok(None);
    }
    if snapshot.root != root {
        log::debug!(
            "cache root mismatch for {}: {:?} != {:?}",
            cache_path.display(),
            snapshot.root,
            root
        );
        return Ok(None);
    }

    log::debug!(
        "loaded index cache from {} ({} entries, saved_at={})",
        cache_path.display(),
        snapshot.entries.len(),
        snapshot.saved_at
    );
    Ok(Some(snapshot.entries))
}

/// Deletes the cached snapshot for a detached root.
pub(crate) fn remove_root_snapshot(cache_dir: &Path, root: &Path) {
    let cache_path = cache_path_for_root(cache_dir, root);
    if let Err(error) = fs::remove_file(&cache_path) {
        if error.kind() != ErrorKind::NotFound {
            log::warn!(
                "failed to remove cache file {}: {error}",
                cache_path.display()
            );
        }
    }
}

/// Persists the set of configured roots.
pub(crate) fn write_root_registry(cache_dir: &Path, roots: Vec<PathBuf>) -> Result<()> {
    fs::create_dir_all(cache_dir).map_err(|error| {
        IndexError::StoreUnavailable(format!(
            "failed to create cache directory {}: {error}",
            cache_dir.display()
        ))
    })?;

    let registry = RootRegistry {
        version: INDEX_CACHE_VERSION,
        roots,
    };
    let encoded = postcard::to_stdvec(&registry)
        .map_err(|error| IndexError::Internal(format!("failed to encode root registry: {error}")))?;

    let path = cache_dir.join(REGISTRY_FILE);
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, encoded).map_err(|error| {
        IndexError::StoreUnavailable(format!(
            "failed to write root registry {}: {error}",
            tmp_path.display()
        ))
    })?;
    fs::rename(&tmp_path, &path).map_err(|error| {
        IndexError::StoreUnavailable(format!(
            "failed to finalize root registry {}: {error}",
            path.display()
        ))
    })?;
    Ok(())
}

/// Loads the persisted root set. Any failure yields an empty set — the
/// registry is rebuildable from user configuration.
pub(crate) fn load_root_registry(cache_dir: &Path) -> Vec<PathBuf> {
    let path = cache_dir.join(REGISTRY_FILE);
    let encoded = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(error) => {
            if error.kind() != ErrorKind::NotFound {
                log::warn!("failed to read root registry {}: {error}", path.display());
            }
            return Vec::new();
        }
    };
    match postcard::from_bytes::<RootRegistry>(&encoded) {
        Ok(registry) if registry.version == INDEX_CACHE_VERSION => registry.roots,
        Ok(_) => Vec::new(),
        Err(error) => {
            log::warn!(
                "corrupt root registry {}, starting empty: {error}",
                path.display()
            );
            Vec::new()
        }
    }
}

/// FNV-1a fingerprint of the root path, used in cache file names.
fn root_fingerprint(root: &Path) -> String {
    const FNV_PRIME: u64 = 0x100000001b3;
    let mut hash = 0xcbf29ce484222325u64;
    for byte in root.to_string_lossy().as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    format!("{hash:016x}")
}
