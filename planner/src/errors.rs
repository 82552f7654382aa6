//! Error hierarchy for plans, history, approvals, and execution.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("plan not found: {0}")]
    PlanNotFound(String),

    #[error("plan already exists: {0} (pass overwrite to replace)")]
    DuplicatePlan(String),

    #[error("plan validation failed: {0}")]
    Invalid(String),

    #[error("dependency cycle involving steps {0:?}")]
    Cycle(Vec<u32>),

    #[error("step {0} not found")]
    StepNotFound(u32),

    #[error("step {step} is not ready: {reason}")]
    StepNotReady { step: u32, reason: String },

    #[error("step {step} already {status}; transition rejected")]
    IllegalTransition { step: u32, status: String },

    #[error("version {0} not found in history")]
    VersionNotFound(u32),

    #[error("approval request not found: {0}")]
    ApprovalNotFound(String),

    #[error("approval request {0} already resolved")]
    ApprovalConflict(String),

    #[error("plan-scope approval required before automatic execution")]
    ApprovalRequired,

    #[error("circuit breaker open; retry after cooldown")]
    CircuitBreakerOpen,

    #[error("step {0} timed out after {1} s")]
    StepTimeout(u32, u64),

    #[error("planner response was not a parseable plan: {0}")]
    InvalidPlanResponse(String),

    #[error("change set was not parseable: {0}")]
    InvalidChangeSet(String),

    #[error(transparent)]
    Engine(#[from] engine_client::EngineError),

    #[error(transparent)]
    Retrieval(#[from] retrieval::RetrievalError),

    #[error(transparent)]
    Policy(#[from] workspace_fs::FsPolicyError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}
