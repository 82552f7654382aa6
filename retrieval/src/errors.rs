//! Retrieval and bundling errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Engine(#[from] engine_client::EngineError),

    #[error(transparent)]
    Policy(#[from] workspace_fs::FsPolicyError),

    #[error("invalid line range {start}..{end} for {path} ({lines} lines)")]
    InvalidRange {
        path: String,
        start: usize,
        end: usize,
        lines: usize,
    },

    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
