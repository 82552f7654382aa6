//! Execution tracker: per-plan step state machine with DAG readiness.
//!
//! State machine:
//!
//! ```text
//! pending ─► ready ─► in_progress ─► completed
//!                     │            ├─► failed ─► (skipped*)
//!                     │            └─► skipped
//! ```
//!
//! A step is `ready` exactly when all of its dependencies are `completed`;
//! readiness is recomputed under the tracker lock on every completion.
//! Terminal transitions never reverse. Bounded by TTL (1 h for terminal
//! plans) and an LRU cap of 100 tracked plans; timeout timers live in a
//! single map keyed `(plan_id, step_number)` and are dropped on terminal
//! transitions.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::PlanError;
use crate::model::Plan;

/// Terminal plans are swept this long after their last update.
pub const PLAN_TTL: Duration = Duration::from_secs(3_600);
/// Maximum tracked plans.
pub const MAX_PLANS: usize = 100;
/// Periodic sweep interval.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

const BREAKER_TRIP_AFTER: u32 = 3;
const BREAKER_RESET: Duration = Duration::from_secs(60);
const BREAKER_CLOSE_AFTER: u32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Ready,
    InProgress,
    Completed,
    Failed,
    Skipped,
    Blocked,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped | StepStatus::Blocked
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepState {
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl StepState {
    fn new(status: StepStatus) -> Self {
        Self {
            status,
            started_at: None,
            finished_at: None,
            attempts: 0,
            error: None,
            summary: None,
        }
    }
}

#[derive(Clone, Debug)]
struct StepEntry {
    state: StepState,
    depends_on: Vec<u32>,
    dependents: Vec<u32>,
}

#[derive(Clone, Debug)]
struct PlanExecution {
    steps: BTreeMap<u32, StepEntry>,
    started_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Progress snapshot for `view_progress`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressView {
    pub plan_id: String,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub in_progress: usize,
    pub ready: usize,
    pub percentage: f32,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub steps: BTreeMap<u32, StepState>,
}

#[derive(Debug, Default)]
struct CircuitBreaker {
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    fn check(&mut self) -> Result<(), PlanError> {
        if let Some(opened) = self.opened_at {
            if opened.elapsed() >= BREAKER_RESET {
                self.opened_at = None;
                self.consecutive_failures = 0;
            } else {
                return Err(PlanError::CircuitBreakerOpen);
            }
        }
        Ok(())
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.consecutive_successes += 1;
        if self.consecutive_successes >= BREAKER_CLOSE_AFTER {
            self.opened_at = None;
        }
    }

    fn record_failure(&mut self) {
        self.consecutive_successes = 0;
        self.consecutive_failures += 1;
        if self.consecutive_failures >= BREAKER_TRIP_AFTER && self.opened_at.is_none() {
            warn!("circuit breaker tripped");
            self.opened_at = Some(Instant::now());
        }
    }
}

/// Per-workspace tracker; share behind an `Arc`.
pub struct ExecutionTracker {
    plans: Mutex<HashMap<String, PlanExecution>>,
    timers: Mutex<HashMap<(String, u32), JoinHandle<()>>>,
    breaker: Mutex<CircuitBreaker>,
}

impl Default for ExecutionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self {
            plans: Mutex::new(HashMap::new()),
            timers: Mutex::new(HashMap::new()),
            breaker: Mutex::new(CircuitBreaker::default()),
        }
    }

    /// Register (or re-register) a plan; initial readiness is computed from
    /// the empty-dependency steps.
    pub fn init_plan(&self, plan: &Plan) {
        let mut steps: BTreeMap<u32, StepEntry> = BTreeMap::new();
        for step in &plan.steps {
            steps.insert(
                step.step_number,
                StepEntry {
                    state: StepState::new(if step.depends_on.is_empty() {
                        StepStatus::Ready
                    } else {
                        StepStatus::Pending
                    }),
                    depends_on: step.depends_on.clone(),
                    dependents: step.blocks.clone(),
                },
            );
        }

        let now = Utc::now();
        let mut plans = self.plans.lock().expect("tracker lock");
        if plans.len() >= MAX_PLANS && !plans.contains_key(&plan.id) {
            if let Some(oldest) = plans
                .iter()
                .min_by_key(|(_, p)| p.updated_at)
                .map(|(k, _)| k.clone())
            {
                plans.remove(&oldest);
                debug!(plan_id = %oldest, "tracker evicted least recently updated plan");
            }
        }
        plans.insert(
            plan.id.clone(),
            PlanExecution {
                steps,
                started_at: now,
                updated_at: now,
            },
        );
        info!(plan_id = %plan.id, steps = plan.steps.len(), "execution tracking initialized");
    }

    pub fn is_tracked(&self, plan_id: &str) -> bool {
        self.plans.lock().expect("tracker lock").contains_key(plan_id)
    }

    /// Step numbers currently in `ready`.
    pub fn ready_steps(&self, plan_id: &str) -> Result<Vec<u32>, PlanError> {
        let plans = self.plans.lock().expect("tracker lock");
        let plan = plans
            .get(plan_id)
            .ok_or_else(|| PlanError::PlanNotFound(plan_id.to_string()))?;
        Ok(plan
            .steps
            .iter()
            .filter_map(|(&n, e)| (e.state.status == StepStatus::Ready).then_some(n))
            .collect())
    }

    /// `ready → in_progress`, gated by the circuit breaker.
    pub fn start_step(&self, plan_id: &str, step: u32) -> Result<(), PlanError> {
        self.breaker.lock().expect("breaker lock").check()?;
        let mut plans = self.plans.lock().expect("tracker lock");
        let plan = plans
            .get_mut(plan_id)
            .ok_or_else(|| PlanError::PlanNotFound(plan_id.to_string()))?;
        let entry = plan
            .steps
            .get_mut(&step)
            .ok_or(PlanError::StepNotFound(step))?;

        match entry.state.status {
            StepStatus::Ready => {
                entry.state.status = StepStatus::InProgress;
                entry.state.started_at = Some(Utc::now());
                entry.state.attempts += 1;
                plan.updated_at = Utc::now();
                Ok(())
            }
            StepStatus::Pending => Err(PlanError::StepNotReady {
                step,
                reason: incomplete_deps(plan, step),
            }),
            status => Err(PlanError::IllegalTransition {
                step,
                status: format!("{status:?}").to_lowercase(),
            }),
        }
    }

    /// `ready | in_progress → completed`; unlocks dependents.
    pub fn complete_step(
        &self,
        plan_id: &str,
        step: u32,
        summary: Option<String>,
    ) -> Result<Vec<u32>, PlanError> {
        let newly_ready = {
            let mut plans = self.plans.lock().expect("tracker lock");
            let plan = plans
                .get_mut(plan_id)
                .ok_or_else(|| PlanError::PlanNotFound(plan_id.to_string()))?;
            let entry = plan
                .steps
                .get_mut(&step)
                .ok_or(PlanError::StepNotFound(step))?;

            match entry.state.status {
                StepStatus::Ready | StepStatus::InProgress => {
                    entry.state.status = StepStatus::Completed;
                    entry.state.finished_at = Some(Utc::now());
                    entry.state.summary = summary;
                }
                StepStatus::Pending => {
                    return Err(PlanError::StepNotReady {
                        step,
                        reason: incomplete_deps(plan, step),
                    });
                }
                status => {
                    return Err(PlanError::IllegalTransition {
                        step,
                        status: format!("{status:?}").to_lowercase(),
                    });
                }
            }
            plan.updated_at = Utc::now();
            recompute_readiness(plan)
        };

        self.cancel_timer(plan_id, step);
        self.breaker.lock().expect("breaker lock").record_success();
        debug!(plan_id, step, ?newly_ready, "step completed");
        Ok(newly_ready)
    }

    /// `ready | in_progress → failed`. With `skip_dependents` the transitive
    /// dependents become `skipped`; otherwise they are marked `blocked`.
    pub fn fail_step(
        &self,
        plan_id: &str,
        step: u32,
        error: impl Into<String>,
        skip_dependents: bool,
    ) -> Result<Vec<u32>, PlanError> {
        let affected = {
            let mut plans = self.plans.lock().expect("tracker lock");
            let plan = plans
                .get_mut(plan_id)
                .ok_or_else(|| PlanError::PlanNotFound(plan_id.to_string()))?;
            let entry = plan
                .steps
                .get_mut(&step)
                .ok_or(PlanError::StepNotFound(step))?;

            match entry.state.status {
                StepStatus::Ready | StepStatus::InProgress | StepStatus::Pending => {
                    entry.state.status = StepStatus::Failed;
                    entry.state.finished_at = Some(Utc::now());
                    entry.state.error = Some(error.into());
                }
                status => {
                    return Err(PlanError::IllegalTransition {
                        step,
                        status: format!("{status:?}").to_lowercase(),
                    });
                }
            }
            plan.updated_at = Utc::now();

            let mark = if skip_dependents {
                StepStatus::Skipped
            } else {
                StepStatus::Blocked
            };
            mark_transitive_dependents(plan, step, mark)
        };

        self.cancel_timer(plan_id, step);
        self.breaker.lock().expect("breaker lock").record_failure();
        info!(plan_id, step, skip_dependents, affected = affected.len(), "step failed");
        Ok(affected)
    }

    /// Arm a timeout that fails the step unless it terminates first.
    pub fn register_timeout(self: &Arc<Self>, plan_id: &str, step: u32, timeout_secs: u64) {
        let tracker = Arc::clone(self);
        let plan_id_owned = plan_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(timeout_secs)).await;
            let result = tracker.fail_step(
                &plan_id_owned,
                step,
                format!("timed out after {timeout_secs} s"),
                false,
            );
            if result.is_ok() {
                warn!(plan_id = %plan_id_owned, step, timeout_secs, "step timed out");
            }
        });
        let mut timers = self.timers.lock().expect("timer lock");
        if let Some(old) = timers.insert((plan_id.to_string(), step), handle) {
            old.abort();
        }
    }

    fn cancel_timer(&self, plan_id: &str, step: u32) {
        let mut timers = self.timers.lock().expect("timer lock");
        if let Some(handle) = timers.remove(&(plan_id.to_string(), step)) {
            handle.abort();
        }
    }

    /// Progress snapshot for a plan.
    pub fn view(&self, plan_id: &str) -> Result<ProgressView, PlanError> {
        let plans = self.plans.lock().expect("tracker lock");
        let plan = plans
            .get(plan_id)
            .ok_or_else(|| PlanError::PlanNotFound(plan_id.to_string()))?;

        let count = |status: StepStatus| {
            plan.steps
                .values()
                .filter(|e| e.state.status == status)
                .count()
        };
        let total = plan.steps.len();
        let completed = count(StepStatus::Completed);
        Ok(ProgressView {
            plan_id: plan_id.to_string(),
            total,
            completed,
            failed: count(StepStatus::Failed),
            skipped: count(StepStatus::Skipped),
            in_progress: count(StepStatus::InProgress),
            ready: count(StepStatus::Ready),
            percentage: if total == 0 {
                100.0
            } else {
                completed as f32 * 100.0 / total as f32
            },
            started_at: plan.started_at,
            updated_at: plan.updated_at,
            steps: plan
                .steps
                .iter()
                .map(|(&n, e)| (n, e.state.clone()))
                .collect(),
        })
    }

    /// Drop terminal plans past the TTL. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::from_std(PLAN_TTL).expect("ttl fits");
        let mut plans = self.plans.lock().expect("tracker lock");
        let before = plans.len();
        plans.retain(|_, p| {
            let terminal = p.steps.values().all(|e| e.state.status.is_terminal());
            !(terminal && p.updated_at < cutoff)
        });
        let removed = before - plans.len();
        if removed > 0 {
            debug!(removed, "tracker sweep removed terminal plans");
        }
        removed
    }
}

/// Periodic sweeper on the runtime; aborted on shutdown.
pub fn spawn_sweeper(tracker: Arc<ExecutionTracker>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            tracker.sweep();
        }
    })
}

fn incomplete_deps(plan: &PlanExecution, step: u32) -> String {
    let Some(entry) = plan.steps.get(&step) else {
        return "unknown step".into();
    };
    let waiting: Vec<u32> = entry
        .depends_on
        .iter()
        .filter(|d| {
            plan.steps
                .get(d)
                .is_none_or(|e| e.state.status != StepStatus::Completed)
        })
        .copied()
        .collect();
    format!("waiting on steps {waiting:?}")
}

fn recompute_readiness(plan: &mut PlanExecution) -> Vec<u32> {
    let completed: Vec<u32> = plan
        .steps
        .iter()
        .filter_map(|(&n, e)| (e.state.status == StepStatus::Completed).then_some(n))
        .collect();
    let mut newly_ready = Vec::new();
    for (&n, entry) in plan.steps.iter_mut() {
        if entry.state.status == StepStatus::Pending
            && entry.depends_on.iter().all(|d| completed.contains(d))
        {
            entry.state.status = StepStatus::Ready;
            newly_ready.push(n);
        }
    }
    newly_ready
}

fn mark_transitive_dependents(plan: &mut PlanExecution, step: u32, mark: StepStatus) -> Vec<u32> {
    let mut affected = Vec::new();
    let mut queue: Vec<u32> = plan
        .steps
        .get(&step)
        .map(|e| e.dependents.clone())
        .unwrap_or_default();
    while let Some(n) = queue.pop() {
        let Some(entry) = plan.steps.get_mut(&n) else {
            continue;
        };
        if entry.state.status.is_terminal() || entry.state.status == StepStatus::InProgress {
            continue;
        }
        entry.state.status = mark;
        entry.state.finished_at = Some(Utc::now());
        affected.push(n);
        queue.extend(entry.dependents.clone());
    }
    affected.sort_unstable();
    affected.dedup();
    affected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Plan, Priority, Step};

    fn step(n: u32, deps: &[u32]) -> Step {
        Step {
            step_number: n,
            id: String::new(),
            title: format!("step {n}"),
            description: String::new(),
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
        let mut plan = Plan::new("p1".into(), "goal".into());
        plan.steps = vec![step(1, &[]), step(2, &[1]), step(3, &[1]), step(4, &[2, 3])];
        plan.validate().unwrap();
        plan
    }

    #[test]
    fn readiness_follows_dag() {
        let tracker = ExecutionTracker::new();
        tracker.init_plan(&diamond());

        assert_eq!(tracker.ready_steps("p1").unwrap(), vec![1]);

        tracker.complete_step("p1", 1, None).unwrap();
        assert_eq!(tracker.ready_steps("p1").unwrap(), vec![2, 3]);

        tracker.complete_step("p1", 2, None).unwrap();
        tracker.complete_step("p1", 3, None).unwrap();
        assert_eq!(tracker.ready_steps("p1").unwrap(), vec![4]);
    }

    #[test]
    fn start_requires_readiness() {
        let tracker = ExecutionTracker::new();
        tracker.init_plan(&diamond());

        assert!(matches!(
            tracker.start_step("p1", 4),
            Err(PlanError::StepNotReady { .. })
        ));
        tracker.start_step("p1", 1).unwrap();
        assert!(matches!(
            tracker.start_step("p1", 1),
            Err(PlanError::IllegalTransition { .. })
        ));
    }

    #[test]
    fn terminal_states_never_reverse() {
        let tracker = ExecutionTracker::new();
        tracker.init_plan(&diamond());
        tracker.complete_step("p1", 1, None).unwrap();

        assert!(matches!(
            tracker.start_step("p1", 1),
            Err(PlanError::IllegalTransition { .. })
        ));
        assert!(matches!(
            tracker.complete_step("p1", 1, None),
            Err(PlanError::IllegalTransition { .. })
        ));
    }

    #[test]
    fn fail_with_skip_marks_exact_transitive_set() {
        let tracker = ExecutionTracker::new();
        tracker.init_plan(&diamond());
        tracker.complete_step("p1", 1, None).unwrap();

        let skipped = tracker.fail_step("p1", 2, "boom", true).unwrap();
        assert_eq!(skipped, vec![4]);

        let view = tracker.view("p1").unwrap();
        assert_eq!(view.steps[&2].status, StepStatus::Failed);
        assert_eq!(view.steps[&4].status, StepStatus::Skipped);
        // Step 3 is independent of 2 and stays ready.
        assert_eq!(view.steps[&3].status, StepStatus::Ready);
    }

    #[test]
    fn breaker_trips_after_three_failures() {
        let tracker = ExecutionTracker::new();
        let mut plan = Plan::new("p1".into(), "goal".into());
        plan.steps = vec![step(1, &[]), step(2, &[]), step(3, &[]), step(4, &[])];
        plan.validate().unwrap();
        tracker.init_plan(&plan);

        for n in 1..=3 {
            tracker.start_step("p1", n).unwrap();
            tracker.fail_step("p1", n, "boom", false).unwrap();
        }
        assert!(matches!(
            tracker.start_step("p1", 4),
            Err(PlanError::CircuitBreakerOpen)
        ));
    }

    #[test]
    fn view_reports_percentage() {
        let tracker = ExecutionTracker::new();
        tracker.init_plan(&diamond());
        tracker.complete_step("p1", 1, None).unwrap();
        let view = tracker.view("p1").unwrap();
        assert_eq!(view.total, 4);
        assert_eq!(view.completed, 1);
        assert!((view.percentage - 25.0).abs() < f32::EPSILON);
    }

    #[test]
    fn sweep_keeps_active_plans() {
        let tracker = ExecutionTracker::new();
        tracker.init_plan(&diamond());
        assert_eq!(tracker.sweep(), 0);
        assert!(tracker.is_tracked("p1"));
    }
}
