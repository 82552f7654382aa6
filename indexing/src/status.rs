//! Index status reporting.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of the index: `idle → indexing → (idle | error)`; an error run
/// is recoverable on the next successful batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    Idle,
    Indexing,
    Error,
}

/// Snapshot returned by `index_status`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexStatus {
    pub workspace: String,
    pub status: IndexState,
    pub last_indexed: Option<DateTime<Utc>>,
    pub file_count: usize,
    pub is_stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Supplemental health bit from the engine probe, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_reachable: Option<bool>,
}

/// Age past which the index is considered stale.
pub const STALE_AFTER_HOURS: i64 = 24;

impl IndexStatus {
    pub fn new(workspace: String) -> Self {
        Self {
            workspace,
            status: IndexState::Idle,
            last_indexed: None,
            file_count: 0,
            is_stale: true,
            last_error: None,
            engine_reachable: None,
        }
    }

    /// Recompute `is_stale` against the clock. Called on every status read so
    /// the flag never goes stale itself.
    pub fn refresh_staleness(&mut self, now: DateTime<Utc>) {
        self.is_stale = match self.last_indexed {
            None => true,
            Some(t) => now - t > Duration::hours(STALE_AFTER_HOURS),
        };
    }
}
