use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid root {path}: {reason}")]
    InvalidRoot { path: PathBuf, reason: String },

    #[error("unknown root id: {0}")]
    RootNotFound(u64),

    #[error("path not found in index: {0}")]
    PathNotFound(PathBuf),

    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("transient IO failure: {0}")]
    TransientIo(PathBuf),

    #[error("index storage unavailable: {0}")]
    StoreUnavailable(String),

    #[error("corrupt index cache: {0}")]
    CorruptIndex(String),

    #[error("query parse error: {0}")]
    QueryParse(String),

    #[error("engine is shut down")]
    EngineClosed,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, IndexError>;

/// Canonicalizes a path, returning the original if canonicalization fails.
pub fn canonicalize_existing_path(path: PathBuf) -> PathBuf {
    std::fs::canonicalize(&path).unwrap_or(path)
}
