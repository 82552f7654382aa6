//! Plan and execution core: versioned plan persistence, approval workflow,
//! DAG-aware execution tracking, and LLM-backed generation.
//!
//! Services are plain structs shared behind `Arc` from the composition root;
//! cross-component access goes through their typed operations only.

pub mod approval;
pub mod errors;
pub mod executor;
pub mod generate;
pub mod graph;
pub mod history;
pub mod model;
pub mod store;
pub mod tracker;

pub use approval::{
    ApprovalAction, ApprovalRequest, ApprovalResponse, ApprovalScope, ApprovalService,
    ApprovalStatus,
};
pub use errors::PlanError;
pub use executor::{
    ChangeOp, ExecuteRequest, ExecutionMode, ExecutionRunReport, ExecutorConfig, FileChange,
    PlanExecutor, StepRunResult, default_worker_count, parse_change_set,
};
pub use generate::PlanGenerator;
pub use graph::DependencyGraph;
pub use history::{ChangeType, FieldChange, HistoryEntry, PlanDiff, PlanHistoryService, StepDiff};
pub use model::{Architecture, Plan, Priority, Scope, Step};
pub use store::{ListFilter, PlanStore, PlanSummary, write_atomic};
pub use tracker::{
    ExecutionTracker, ProgressView, StepState, StepStatus, spawn_sweeper,
};
