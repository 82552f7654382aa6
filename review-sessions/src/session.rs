//! Session state and wire shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use review_pipeline::Finding;

/// Active states count toward stall detection; terminal states age toward
/// TTL eviction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    Planning,
    Ready,
    Executing,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_active(self) -> bool {
        matches!(self, Self::Planning | Self::Ready | Self::Executing)
    }
}

/// PR metadata supplied by the host agent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PrMetadata {
    pub commit_hash: String,
    pub base_ref: String,
    pub changed_files: Vec<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub additions: Option<usize>,
    #[serde(default)]
    pub deletions: Option<usize>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionProgress {
    pub completed: usize,
    pub total: usize,
    pub percentage: f32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionTelemetry {
    pub elapsed_ms: u64,
    pub tokens_used: u64,
    pub cache_hit_rate: f32,
    pub last_activity_ms: u64,
    pub appears_stalled: bool,
}

/// Status payload for `get_review_status`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub state: SessionState,
    pub progress: SessionProgress,
    pub telemetry: SessionTelemetry,
    pub findings_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-step timing row for `get_review_telemetry`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepTiming {
    pub step_number: u32,
    pub file: String,
    pub duration_ms: u64,
    pub findings: usize,
    pub succeeded: bool,
}

/// Detailed telemetry payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionTelemetryDetail {
    pub session_id: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub telemetry: SessionTelemetry,
    pub steps: Vec<StepTiming>,
}

/// Internal session record.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub pr: PrMetadata,
    pub plan_id: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub findings: Vec<Finding>,
    pub step_timings: Vec<StepTiming>,
    pub tokens_used: u64,
    pub cache_hits: u64,
    pub cache_lookups: u64,
    pub error: Option<String>,
    /// Set once the session reaches a terminal state; drives TTL eviction.
    pub terminal_at: Option<DateTime<Utc>>,
    /// Sticky stall marker maintained by housekeeping.
    pub appears_stalled: bool,
}

impl Session {
    pub fn new(id: String, pr: PrMetadata, plan_id: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            pr,
            plan_id,
            state: SessionState::Pending,
            created_at: now,
            last_activity_at: now,
            findings: Vec::new(),
            step_timings: Vec::new(),
            tokens_used: 0,
            cache_hits: 0,
            cache_lookups: 0,
            error: None,
            terminal_at: None,
            appears_stalled: false,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
        self.appears_stalled = false;
    }

    pub fn cache_hit_rate(&self) -> f32 {
        if self.cache_lookups == 0 {
            0.0
        } else {
            self.cache_hits as f32 / self.cache_lookups as f32
        }
    }
}
