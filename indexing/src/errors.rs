//! Error hierarchy for indexing, watching, and caching.

use thiserror::Error;

/// Root error for the indexing crate.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Engine(#[from] engine_client::EngineError),

    #[error(transparent)]
    Policy(#[from] workspace_fs::FsPolicyError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("watcher error: {0}")]
    Watcher(String),

    /// An index run is already in flight for this workspace.
    #[error("indexing already in progress")]
    Busy,
}

/// One recoverable per-file failure inside a batch operation.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FileError {
    pub path: String,
    pub error: String,
}
