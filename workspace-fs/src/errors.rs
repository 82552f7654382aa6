//! Error type shared by path policy, ignore rules, and discovery.

use std::path::PathBuf;
use thiserror::Error;

/// Failures produced while validating or reading workspace paths.
#[derive(Debug, Error)]
pub enum FsPolicyError {
    /// Input path was absolute; only workspace-relative paths are accepted.
    #[error("absolute path not allowed: {0}")]
    AbsolutePath(String),

    /// Input path contained a `..` segment.
    #[error("path traversal not allowed: {0}")]
    Traversal(String),

    /// Resolved path escaped the workspace root.
    #[error("path resolves outside the workspace: {0}")]
    OutsideWorkspace(String),

    /// File exceeds the per-file read limit.
    #[error("file too large: {path} ({size} bytes, limit {limit})")]
    FileTooLarge {
        path: PathBuf,
        size: u64,
        limit: u64,
    },

    /// File does not exist or is not a regular file.
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
