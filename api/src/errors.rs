//! Wire error envelope: every component error maps onto the daemon's error
//! taxonomy `{ code, message, details? }`. `Internal` is the last resort and
//! carries the stringified cause in `details`.

use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Application-level error carrying a taxonomy code.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct AppError {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl AppError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new("InvalidInput", message)
    }

    pub fn internal(cause: impl std::fmt::Display) -> Self {
        Self {
            code: "Internal",
            message: "internal error".into(),
            details: Some(json!({ "cause": cause.to_string() })),
        }
    }
}

/// Wire shape inside `{ error: … }`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&AppError> for ErrorBody {
    fn from(e: &AppError) -> Self {
        Self {
            code: e.code.to_string(),
            message: e.message.clone(),
            details: e.details.clone(),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl From<workspace_fs::FsPolicyError> for AppError {
    fn from(e: workspace_fs::FsPolicyError) -> Self {
        use workspace_fs::FsPolicyError::*;
        let code = match &e {
            AbsolutePath(_) | Traversal(_) => "PathTraversal",
            OutsideWorkspace(_) => "OutsideWorkspace",
            FileTooLarge { .. } => "FileTooLarge",
            NotFound(_) => "FileNotFound",
            Io(_) => "Internal",
        };
        AppError::new(code, e.to_string())
    }
}

impl From<engine_client::EngineError> for AppError {
    fn from(e: engine_client::EngineError) -> Self {
        use engine_client::EngineError::*;
        let code = match &e {
            Auth => "EngineAuth",
            Unavailable(_) | InvalidResponse(_) => "EngineUnavailable",
            Timeout(_) => "Timeout",
            OfflineRemoteEndpoint(_) => "OfflinePolicy.RemoteEndpoint",
            Config(_) => "ConfigInvalid",
            Serde(_) => "Internal",
        };
        AppError::new(code, e.to_string())
    }
}

impl From<indexing::IndexError> for AppError {
    fn from(e: indexing::IndexError) -> Self {
        use indexing::IndexError::*;
        match e {
            Engine(inner) => inner.into(),
            Policy(inner) => inner.into(),
            Busy => AppError::invalid_input("indexing already in progress"),
            Watcher(msg) => AppError::new("Internal", msg),
            other => AppError::internal(other),
        }
    }
}

impl From<retrieval::RetrievalError> for AppError {
    fn from(e: retrieval::RetrievalError) -> Self {
        use retrieval::RetrievalError::*;
        match e {
            Engine(inner) => inner.into(),
            Policy(inner) => inner.into(),
            InvalidRange { .. } => AppError::invalid_input(e.to_string()),
            other => AppError::internal(other),
        }
    }
}

impl From<planner::PlanError> for AppError {
    fn from(e: planner::PlanError) -> Self {
        use planner::PlanError::*;
        let message = e.to_string();
        match e {
            PlanNotFound(_) | VersionNotFound(_) => AppError::new("PlanNotFound", message),
            DuplicatePlan(_) | Invalid(_) | Cycle(_) | StepNotFound(_)
            | IllegalTransition { .. } | ApprovalNotFound(_) => AppError::invalid_input(message),
            StepNotReady { .. } => AppError::new("StepNotReady", message),
            ApprovalConflict(_) | ApprovalRequired => {
                AppError::new("ApprovalStateConflict", message)
            }
            CircuitBreakerOpen => AppError::new("CircuitBreakerOpen", message),
            StepTimeout(..) => AppError::new("Timeout", message),
            Engine(inner) => inner.into(),
            Retrieval(inner) => inner.into(),
            Policy(inner) => inner.into(),
            InvalidPlanResponse(_) | InvalidChangeSet(_) | Io(_) | Serde(_) => {
                AppError::internal(message)
            }
        }
    }
}

impl From<review_pipeline::ReviewError> for AppError {
    fn from(e: review_pipeline::ReviewError) -> Self {
        use review_pipeline::ReviewError::*;
        match e {
            PatternInvalid { .. } => AppError::new("PatternInvalid", e.to_string()),
            InvariantFile(_) => AppError::new("ConfigInvalid", e.to_string()),
            GitDiff(msg) => AppError::invalid_input(format!("git diff failed: {msg}")),
            Engine(inner) => inner.into(),
            Retrieval(inner) => inner.into(),
            other => AppError::internal(other),
        }
    }
}

impl From<review_sessions::SessionError> for AppError {
    fn from(e: review_sessions::SessionError) -> Self {
        use review_sessions::SessionError::*;
        match e {
            SessionNotFound(_) => AppError::new("SessionNotFound", e.to_string()),
            InvalidState { .. } | InvalidRequest(_) => AppError::invalid_input(e.to_string()),
            Plan(inner) => inner.into(),
            Review(inner) => inner.into(),
        }
    }
}

impl From<memories::MemoryError> for AppError {
    fn from(e: memories::MemoryError) -> Self {
        use memories::MemoryError::*;
        match e {
            ContentTooLong(_) | UnknownCategory(_) => AppError::invalid_input(e.to_string()),
            Io(inner) => AppError::internal(inner),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::invalid_input(format!("invalid arguments: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_errors_map_to_taxonomy() {
        let err: AppError = workspace_fs::FsPolicyError::Traversal("../x".into()).into();
        assert_eq!(err.code, "PathTraversal");

        let err: AppError =
            engine_client::EngineError::OfflineRemoteEndpoint("https://remote".into()).into();
        assert_eq!(err.code, "OfflinePolicy.RemoteEndpoint");

        let err: AppError = planner::PlanError::PlanNotFound("p".into()).into();
        assert_eq!(err.code, "PlanNotFound");

        let err: AppError = planner::PlanError::CircuitBreakerOpen.into();
        assert_eq!(err.code, "CircuitBreakerOpen");
    }

    #[test]
    fn internal_carries_cause() {
        let err = AppError::internal("boom");
        assert_eq!(err.code, "Internal");
        assert_eq!(err.details.unwrap()["cause"], "boom");
    }
}
