//! Plan execution: dependency-aware scheduling over the tracker, LLM-backed
//! step execution, and change-set application under path policy.
//!
//! Modes:
//! - `single_step` runs exactly one named step if ready.
//! - `all_ready` runs every ready step in parallel (pool `cpu_count − 1`),
//!   results reassembled in step-number order.
//! - `full_plan` drains the DAG sequentially, honoring `stop_on_failure` and
//!   the plan-scope approval gate.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use retrieval::RetrievalService;

use crate::approval::ApprovalService;
use crate::errors::PlanError;
use crate::model::{Plan, Step};
use crate::tracker::ExecutionTracker;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    SingleStep,
    AllReady,
    FullPlan,
}

/// Arguments for one `execute_plan` invocation.
#[derive(Clone, Debug, Deserialize)]
pub struct ExecuteRequest {
    pub mode: ExecutionMode,
    #[serde(default)]
    pub step_number: Option<u32>,
    #[serde(default)]
    pub apply_changes: bool,
    #[serde(default)]
    pub max_steps: Option<usize>,
    #[serde(default = "default_true")]
    pub stop_on_failure: bool,
    #[serde(default)]
    pub additional_context: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Create,
    Modify,
    Delete,
}

/// One file effect returned by the planner LLM.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileChange {
    pub file_path: String,
    pub operation: ChangeOp,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct StepRunResult {
    pub step_number: u32,
    pub succeeded: bool,
    pub summary: String,
    pub changes_returned: usize,
    pub changes_applied: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ExecutionRunReport {
    pub plan_id: String,
    pub mode: ExecutionMode,
    pub results: Vec<StepRunResult>,
    pub errors: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    pub max_workers: usize,
    pub step_timeout_secs: u64,
    /// Gate automatic (`full_plan`) execution behind a plan-scope approval.
    pub require_approval: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_workers: default_worker_count(),
            step_timeout_secs: 300,
            require_approval: true,
        }
    }
}

/// `max(1, cpu_count − 1)`.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

/// Drives step execution through `search_and_ask`.
pub struct PlanExecutor {
    tracker: Arc<ExecutionTracker>,
    retrieval: RetrievalService,
    approvals: Arc<ApprovalService>,
    cfg: ExecutorConfig,
}

impl PlanExecutor {
    pub fn new(
        tracker: Arc<ExecutionTracker>,
        retrieval: RetrievalService,
        approvals: Arc<ApprovalService>,
        cfg: ExecutorConfig,
    ) -> Self {
        Self {
            tracker,
            retrieval,
            approvals,
            cfg,
        }
    }

    pub fn tracker(&self) -> &Arc<ExecutionTracker> {
        &self.tracker
    }

    pub async fn execute(
        &self,
        plan: &Plan,
        req: &ExecuteRequest,
    ) -> Result<ExecutionRunReport, PlanError> {
        if !self.tracker.is_tracked(&plan.id) {
            self.tracker.init_plan(plan);
        }

        let mut report = ExecutionRunReport {
            plan_id: plan.id.clone(),
            mode: req.mode,
            results: Vec::new(),
            errors: Vec::new(),
        };

        match req.mode {
            ExecutionMode::SingleStep => {
                let n = req.step_number.ok_or_else(|| {
                    PlanError::Invalid("single_step mode requires step_number".into())
                })?;
                let result = self.run_one(plan, n, req).await;
                report.results.push(result);
            }
            ExecutionMode::AllReady => {
                let mut ready = self.tracker.ready_steps(&plan.id)?;
                ready.sort_unstable();
                if let Some(cap) = req.max_steps {
                    ready.truncate(cap);
                }
                debug!(plan_id = %plan.id, steps = ?ready, "all_ready batch");

                let mut results: Vec<StepRunResult> = stream::iter(ready)
                    .map(|n| self.run_one(plan, n, req))
                    .buffer_unordered(self.cfg.max_workers.max(1))
                    .collect()
                    .await;
                // Completion order is nondeterministic; callers get step order.
                results.sort_by_key(|r| r.step_number);
                report.results = results;
            }
            ExecutionMode::FullPlan => {
                if self.cfg.require_approval && !self.approvals.plan_approved(&plan.id) {
                    return Err(PlanError::ApprovalRequired);
                }
                let cap = req.max_steps.unwrap_or(usize::MAX);
                'drain: loop {
                    let mut ready = self.tracker.ready_steps(&plan.id)?;
                    ready.sort_unstable();
                    if ready.is_empty() || report.results.len() >= cap {
                        break;
                    }
                    for n in ready {
                        if report.results.len() >= cap {
                            break 'drain;
                        }
                        let result = self.run_one(plan, n, req).await;
                        let failed = !result.succeeded;
                        report.results.push(result);
                        if failed {
                            if req.stop_on_failure {
                                break 'drain;
                            }
                            // A failure that left the step ready (breaker
                            // open, tracker refusal) would spin forever.
                            let still_ready = self
                                .tracker
                                .ready_steps(&plan.id)?
                                .contains(&n);
                            if still_ready {
                                break 'drain;
                            }
                        }
                    }
                }
            }
        }

        report.errors = report
            .results
            .iter()
            .filter(|r| !r.succeeded)
            .map(|r| format!("step {}: {}", r.step_number, r.summary))
            .collect();
        Ok(report)
    }

    async fn run_one(&self, plan: &Plan, step_number: u32, req: &ExecuteRequest) -> StepRunResult {
        let t0 = Instant::now();
        let mut result = StepRunResult {
            step_number,
            succeeded: false,
            summary: String::new(),
            changes_returned: 0,
            changes_applied: 0,
            errors: Vec::new(),
            duration_ms: 0,
        };

        if let Err(e) = self.tracker.start_step(&plan.id, step_number) {
            result.summary = e.to_string();
            result.duration_ms = t0.elapsed().as_millis() as u64;
            return result;
        }
        self.tracker
            .register_timeout(&plan.id, step_number, self.cfg.step_timeout_secs);

        let step = match plan.step(step_number) {
            Ok(s) => s,
            Err(e) => {
                let _ = self
                    .tracker
                    .fail_step(&plan.id, step_number, e.to_string(), false);
                result.summary = e.to_string();
                result.duration_ms = t0.elapsed().as_millis() as u64;
                return result;
            }
        };

        let context = build_step_context(plan, step, req.additional_context.as_deref());
        let prompt = build_step_prompt(step);
        let timeout = Duration::from_secs(self.cfg.step_timeout_secs);

        let outcome = tokio::time::timeout(
            timeout,
            self.retrieval.search_and_ask(&context, &prompt),
        )
        .await;

        match outcome {
            Err(_) => {
                let _ = self.tracker.fail_step(
                    &plan.id,
                    step_number,
                    format!("timed out after {} s", self.cfg.step_timeout_secs),
                    false,
                );
                result.summary = format!("timed out after {} s", self.cfg.step_timeout_secs);
            }
            Ok(Err(e)) => {
                let _ = self
                    .tracker
                    .fail_step(&plan.id, step_number, e.to_string(), false);
                result.summary = e.to_string();
            }
            Ok(Ok(text)) => match parse_change_set(&text) {
                Err(e) => {
                    let _ = self
                        .tracker
                        .fail_step(&plan.id, step_number, e.to_string(), false);
                    result.summary = e.to_string();
                }
                Ok(changes) => {
                    result.changes_returned = changes.len();
                    if req.apply_changes {
                        let root = self.retrieval.indexer().workspace_root().to_path_buf();
                        for change in &changes {
                            match apply_change(&root, change) {
                                Ok(()) => result.changes_applied += 1,
                                Err(e) => result
                                    .errors
                                    .push(format!("{}: {e}", change.file_path)),
                            }
                        }
                    }
                    result.succeeded = true;
                    result.summary = format!(
                        "{} change(s) returned, {} applied",
                        result.changes_returned, result.changes_applied
                    );
                    let _ = self.tracker.complete_step(
                        &plan.id,
                        step_number,
                        Some(result.summary.clone()),
                    );
                }
            },
        }

        result.duration_ms = t0.elapsed().as_millis() as u64;
        info!(
            plan_id = %plan.id,
            step = step_number,
            succeeded = result.succeeded,
            duration_ms = result.duration_ms,
            "step execution finished"
        );
        result
    }
}

fn build_step_context(plan: &Plan, step: &Step, additional: Option<&str>) -> String {
    let mut ctx = format!("Goal: {}\n", plan.goal);
    if !plan.scope.constraints.is_empty() {
        ctx.push_str(&format!("Constraints: {}\n", plan.scope.constraints.join("; ")));
    }
    if !step.files_to_modify.is_empty() {
        ctx.push_str(&format!("Files to modify: {}\n", step.files_to_modify.join(", ")));
    }
    if !step.files_to_create.is_empty() {
        ctx.push_str(&format!("Files to create: {}\n", step.files_to_create.join(", ")));
    }
    if let Some(extra) = additional {
        ctx.push_str(extra);
        ctx.push('\n');
    }
    ctx
}

fn build_step_prompt(step: &Step) -> String {
    format!(
        "Execute step {}: {}\n{}\n\nReturn ONLY a JSON array of file changes, \
         each {{\"file_path\": string, \"operation\": \"create\"|\"modify\"|\"delete\", \
         \"content\": string|null}}. Content must be the complete new file body.",
        step.step_number, step.title, step.description
    )
}

/// Parse the LLM's change set. Accepts a bare array, an object with a
/// `changes` array, or either embedded in surrounding prose.
pub fn parse_change_set(text: &str) -> Result<Vec<FileChange>, PlanError> {
    if let Ok(changes) = serde_json::from_str::<Vec<FileChange>>(text) {
        return Ok(changes);
    }
    #[derive(Deserialize)]
    struct Wrapper {
        changes: Vec<FileChange>,
    }
    if let Ok(w) = serde_json::from_str::<Wrapper>(text) {
        return Ok(w.changes);
    }
    if let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) {
        if start < end {
            if let Ok(changes) = serde_json::from_str::<Vec<FileChange>>(&text[start..=end]) {
                return Ok(changes);
            }
        }
    }
    Err(PlanError::InvalidChangeSet(
        text.chars().take(120).collect::<String>(),
    ))
}

/// Apply one change under path policy. Creates parents for new files, writes
/// a timestamped backup before modifying, and only logs deletes.
pub fn apply_change(root: &Path, change: &FileChange) -> Result<(), PlanError> {
    let full = workspace_fs::resolve_workspace_path(root, &change.file_path)?;
    match change.operation {
        ChangeOp::Create => {
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&full, change.content.as_deref().unwrap_or(""))?;
        }
        ChangeOp::Modify => {
            if full.exists() {
                let backup = full.with_file_name(format!(
                    "{}.backup.{}",
                    full.file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    chrono::Utc::now().timestamp()
                ));
                std::fs::copy(&full, &backup)?;
            }
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&full, change.content.as_deref().unwrap_or(""))?;
        }
        ChangeOp::Delete => {
            warn!(file = %change.file_path, "delete requested; leaving file in place");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Priority;
    use engine_client::EngineClient;
    use indexing::{Indexer, IndexingConfig};
    use tempfile::TempDir;

    fn step(n: u32, deps: &[u32]) -> Step {
        Step {
            step_number: n,
            id: String::new(),
            title: format!("step {n}"),
            description: "write code".into(),
            files_to_modify: Vec::new(),
            files_to_create: Vec::new(),
            files_to_delete: Vec::new(),
            depends_on: deps.to_vec(),
            blocks: Vec::new(),
            can_parallel_with: Vec::new(),
            priority: Priority::Medium,
            estimated_effort: String::new(),
            acceptance_criteria: Vec::new(),
        }
    }

    fn diamond() -> Plan {
        let mut plan = Plan::new("p1".into(), "build it".into());
        plan.steps = vec![step(1, &[]), step(2, &[1]), step(3, &[1]), step(4, &[2, 3])];
        plan.validate().unwrap();
        plan
    }

    fn executor_with_engine(
        ws: &TempDir,
        canned: &[&str],
        require_approval: bool,
    ) -> (PlanExecutor, Arc<ApprovalService>) {
        let engine = EngineClient::fixed();
        if let EngineClient::Fixed(f) = &engine {
            for answer in canned {
                f.push_canned_answer(*answer);
            }
        }
        let indexer = Arc::new(Indexer::new(ws.path(), IndexingConfig::default(), engine));
        let retrieval = RetrievalService::new(indexer);
        let approvals = Arc::new(ApprovalService::new());
        let executor = PlanExecutor::new(
            Arc::new(ExecutionTracker::new()),
            retrieval,
            Arc::clone(&approvals),
            ExecutorConfig {
                require_approval,
                ..Default::default()
            },
        );
        (executor, approvals)
    }

    const EMPTY_CHANGES: &str = "[]";

    #[tokio::test]
    async fn single_step_requires_readiness() {
        let ws = TempDir::new().unwrap();
        let (executor, _) = executor_with_engine(&ws, &[EMPTY_CHANGES], false);
        let plan = diamond();

        let req = ExecuteRequest {
            mode: ExecutionMode::SingleStep,
            step_number: Some(4),
            apply_changes: false,
            max_steps: None,
            stop_on_failure: true,
            additional_context: None,
        };
        let report = executor.execute(&plan, &req).await.unwrap();
        assert!(!report.results[0].succeeded);
        assert!(report.results[0].summary.contains("not ready"));
    }

    #[tokio::test]
    async fn all_ready_returns_results_in_step_order() {
        let ws = TempDir::new().unwrap();
        let mut plan = Plan::new("p1".into(), "goal".into());
        plan.steps = vec![step(1, &[]), step(2, &[]), step(3, &[])];
        plan.validate().unwrap();

        let (executor, _) =
            executor_with_engine(&ws, &[EMPTY_CHANGES, EMPTY_CHANGES, EMPTY_CHANGES], false);
        let req = ExecuteRequest {
            mode: ExecutionMode::AllReady,
            step_number: None,
            apply_changes: false,
            max_steps: None,
            stop_on_failure: true,
            additional_context: None,
        };
        let report = executor.execute(&plan, &req).await.unwrap();
        let nums: Vec<u32> = report.results.iter().map(|r| r.step_number).collect();
        assert_eq!(nums, vec![1, 2, 3]);
        assert!(report.results.iter().all(|r| r.succeeded));
    }

    #[tokio::test]
    async fn full_plan_requires_approval() {
        let ws = TempDir::new().unwrap();
        let (executor, approvals) = executor_with_engine(&ws, &[], true);
        let plan = diamond();

        let req = ExecuteRequest {
            mode: ExecutionMode::FullPlan,
            step_number: None,
            apply_changes: false,
            max_steps: None,
            stop_on_failure: true,
            additional_context: None,
        };
        assert!(matches!(
            executor.execute(&plan, &req).await,
            Err(PlanError::ApprovalRequired)
        ));

        let request = approvals.request(&plan, None);
        approvals
            .respond(
                &request.id,
                crate::approval::ApprovalAction::Approve,
                None,
                "lead",
            )
            .unwrap();
        // Enough canned answers for the whole DAG.
        if let EngineClient::Fixed(f) = executor.retrieval.indexer().engine() {
            for _ in 0..4 {
                f.push_canned_answer(EMPTY_CHANGES);
            }
        }
        let report = executor.execute(&plan, &req).await.unwrap();
        assert_eq!(report.results.len(), 4);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn apply_changes_writes_files_with_backup() {
        let ws = TempDir::new().unwrap();
        std::fs::write(ws.path().join("existing.txt"), "old").unwrap();

        let changes = serde_json::json!([
            { "file_path": "new/dir/file.txt", "operation": "create", "content": "hello" },
            { "file_path": "existing.txt", "operation": "modify", "content": "new" }
        ])
        .to_string();

        let mut plan = Plan::new("p1".into(), "goal".into());
        plan.steps = vec![step(1, &[])];
        plan.validate().unwrap();

        let (executor, _) = executor_with_engine(&ws, &[&changes], false);
        let req = ExecuteRequest {
            mode: ExecutionMode::SingleStep,
            step_number: Some(1),
            apply_changes: true,
            max_steps: None,
            stop_on_failure: true,
            additional_context: None,
        };
        let report = executor.execute(&plan, &req).await.unwrap();
        assert!(report.results[0].succeeded);
        assert_eq!(report.results[0].changes_applied, 2);

        assert_eq!(
            std::fs::read_to_string(ws.path().join("new/dir/file.txt")).unwrap(),
            "hello"
        );
        assert_eq!(
            std::fs::read_to_string(ws.path().join("existing.txt")).unwrap(),
            "new"
        );
        let backups: Vec<_> = std::fs::read_dir(ws.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with("existing.txt.backup.")
            })
            .collect();
        assert_eq!(backups.len(), 1);
    }

    #[test]
    fn change_set_parsing_is_lenient() {
        assert_eq!(parse_change_set("[]").unwrap().len(), 0);
        let wrapped = r#"{"changes": [{"file_path": "a", "operation": "create"}]}"#;
        assert_eq!(parse_change_set(wrapped).unwrap().len(), 1);
        let prose = "Here you go:\n[{\"file_path\": \"a\", \"operation\": \"delete\"}]\nDone.";
        assert_eq!(parse_change_set(prose).unwrap().len(), 1);
        assert!(parse_change_set("no json at all").is_err());
    }
}
