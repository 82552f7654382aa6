//! Review pipeline errors.
//!
//! Per-item failures (one bad invariant regex, one analyzer timeout) are
//! collected into warnings, never raised; these variants cover failures that
//! abort a whole run.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("invariant file unreadable: {0}")]
    InvariantFile(String),

    #[error("invalid pattern in {id}: {error}")]
    PatternInvalid { id: String, error: String },

    #[error("git diff failed: {0}")]
    GitDiff(String),

    #[error("analyzer {name} failed to start: {error}")]
    AnalyzerSpawn { name: String, error: String },

    #[error(transparent)]
    Engine(#[from] engine_client::EngineError),

    #[error(transparent)]
    Retrieval(#[from] retrieval::RetrievalError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}
