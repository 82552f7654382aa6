//! Session errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session {session} is {state}; cannot {operation}")]
    InvalidState {
        session: String,
        state: String,
        operation: &'static str,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Plan(#[from] planner::PlanError),

    #[error(transparent)]
    Review(#[from] review_pipeline::ReviewError),
}
