//! Unified error type for the engine boundary.
//!
//! Maps transport failures onto specific variants (401 → Auth, timeouts →
//! Timeout, 5xx → Unavailable) so upper layers never inspect reqwest types.

use thiserror::Error;

/// Failures talking to the external context engine or its LLM surface.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Authentication rejected (HTTP 401/403). Check `AUGMENT_API_TOKEN`.
    #[error("engine authentication failed")]
    Auth,

    /// Engine not reachable or returned a server error.
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    /// Call exceeded its deadline.
    #[error("engine call timed out after {0} s")]
    Timeout(u64),

    /// Offline-only policy violated by a non-local engine endpoint.
    #[error("offline-only mode forbids remote endpoint: {0}")]
    OfflineRemoteEndpoint(String),

    /// Unexpected response shape.
    #[error("invalid engine response: {0}")]
    InvalidResponse(String),

    /// Bad or missing configuration.
    #[error("engine config error: {0}")]
    Config(String),

    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return EngineError::Timeout(0);
        }
        if let Some(status) = e.status() {
            let code = status.as_u16();
            return match code {
                401 | 403 => EngineError::Auth,
                _ => EngineError::Unavailable(format!("status {code}")),
            };
        }
        EngineError::Unavailable(e.to_string())
    }
}
