//! Session manager: background scheduling with bounded workers,
//! pause/resume between steps, stalled detection, and TTL/LRU housekeeping.
//!
//! A session synthesizes a review plan with one independent step per changed
//! file, registers it with the execution tracker, and returns immediately.
//! Dispatch runs on the runtime; pausing stops new dispatches while in-flight
//! steps complete.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use planner::{ExecutionTracker, Plan, Step, default_worker_count};
use retrieval::estimate_tokens;
use review_pipeline::{ReviewOptions, ReviewRunner, capture_ref_range, parse_unified_diff};

use crate::config::SessionConfig;
use crate::errors::SessionError;
use crate::session::{
    PrMetadata, Session, SessionProgress, SessionState, SessionStatus, SessionTelemetry,
    SessionTelemetryDetail, StepTiming,
};

/// Arguments for `reactive_review_pr`.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct StartReviewRequest {
    #[serde(flatten)]
    pub pr: PrMetadata,
    #[serde(default = "default_true")]
    pub parallel: bool,
    #[serde(default)]
    pub max_workers: Option<usize>,
}

fn default_true() -> bool {
    true
}

pub struct SessionManager {
    sessions: Mutex<HashMap<String, Session>>,
    runner: Arc<ReviewRunner>,
    tracker: Arc<ExecutionTracker>,
    cfg: SessionConfig,
    review_opts: ReviewOptions,
}

impl SessionManager {
    pub fn new(runner: Arc<ReviewRunner>, tracker: Arc<ExecutionTracker>, cfg: SessionConfig) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            runner,
            tracker,
            cfg,
            review_opts: ReviewOptions {
                // Session steps stay deterministic; LLM depth is the
                // synchronous review tools' job.
                llm_enabled: false,
                static_analysis: false,
                ..Default::default()
            },
        }
    }

    /// Create a session and start background execution. Returns immediately
    /// with the session id.
    pub fn start_review(self: &Arc<Self>, req: StartReviewRequest) -> Result<String, SessionError> {
        if req.pr.changed_files.is_empty() {
            return Err(SessionError::InvalidRequest(
                "changed_files must not be empty".into(),
            ));
        }

        let session_id = Uuid::new_v4().to_string();
        let plan_id = format!("review-{}", &session_id[..8]);

        let mut plan = Plan::new(plan_id.clone(), format!(
            "Review {} ({} files)",
            req.pr.title.as_deref().unwrap_or(&req.pr.commit_hash),
            req.pr.changed_files.len()
        ));
        plan.steps = req
            .pr
            .changed_files
            .iter()
            .enumerate()
            .map(|(i, file)| Step {
                step_number: (i + 1) as u32,
                id: String::new(),
                title: file.clone(),
                description: format!("review changes in {file}"),
                files_to_modify: vec![file.clone()],
                files_to_create: Vec::new(),
                files_to_delete: Vec::new(),
                depends_on: Vec::new(),
                blocks: Vec::new(),
                can_parallel_with: Vec::new(),
                priority: Default::default(),
                estimated_effort: String::new(),
                acceptance_criteria: Vec::new(),
            })
            .collect();
        plan.validate()?;
        self.tracker.init_plan(&plan);

        let mut session = Session::new(session_id.clone(), req.pr.clone(), plan_id);
        session.state = SessionState::Planning;
        {
            let mut sessions = self.sessions.lock().expect("session lock");
            if sessions.len() >= self.cfg.max_sessions {
                evict_one(&mut sessions);
            }
            sessions.insert(session_id.clone(), session);
        }

        let workers = if req.parallel {
            req.max_workers.unwrap_or_else(default_worker_count).max(1)
        } else {
            1
        };
        info!(session_id = %session_id, workers, files = req.pr.changed_files.len(), "reactive review started");

        let mgr = Arc::clone(self);
        let sid = session_id.clone();
        tokio::spawn(async move {
            mgr.run_session(sid, plan, workers).await;
        });
        Ok(session_id)
    }

    /// `get_review_status`.
    pub fn status(&self, session_id: &str) -> Result<SessionStatus, SessionError> {
        let sessions = self.sessions.lock().expect("session lock");
        let session = sessions
            .get(session_id)
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;
        Ok(self.status_of(session))
    }

    /// `pause_review`: only between steps; in-flight steps complete.
    pub fn pause(&self, session_id: &str) -> Result<SessionStatus, SessionError> {
        let mut sessions = self.sessions.lock().expect("session lock");
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;
        if session.state != SessionState::Executing {
            return Err(SessionError::InvalidState {
                session: session_id.to_string(),
                state: format!("{:?}", session.state).to_lowercase(),
                operation: "pause",
            });
        }
        session.state = SessionState::Paused;
        session.touch();
        info!(session_id, "session paused");
        Ok(self.status_of(session))
    }

    /// `resume_review`.
    pub fn resume(&self, session_id: &str) -> Result<SessionStatus, SessionError> {
        let mut sessions = self.sessions.lock().expect("session lock");
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;
        if session.state != SessionState::Paused {
            return Err(SessionError::InvalidState {
                session: session_id.to_string(),
                state: format!("{:?}", session.state).to_lowercase(),
                operation: "resume",
            });
        }
        session.state = SessionState::Executing;
        session.touch();
        info!(session_id, "session resumed");
        Ok(self.status_of(session))
    }

    /// `get_review_telemetry`.
    pub fn telemetry(&self, session_id: &str) -> Result<SessionTelemetryDetail, SessionError> {
        let sessions = self.sessions.lock().expect("session lock");
        let session = sessions
            .get(session_id)
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;
        Ok(SessionTelemetryDetail {
            session_id: session.id.clone(),
            state: session.state,
            created_at: session.created_at,
            last_activity_at: session.last_activity_at,
            telemetry: self.telemetry_of(session),
            steps: session.step_timings.clone(),
        })
    }

    /// Merged findings of a session (exposed to the dispatcher for report
    /// rendering).
    pub fn findings(&self, session_id: &str) -> Result<Vec<review_pipeline::Finding>, SessionError> {
        let sessions = self.sessions.lock().expect("session lock");
        let session = sessions
            .get(session_id)
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;
        Ok(session.findings.clone())
    }

    /// One housekeeping pass: mark stalled sessions, evict expired terminal
    /// ones, enforce the LRU cap. Returns evicted count.
    pub fn housekeeping(&self) -> usize {
        let now = Utc::now();
        let stall = chrono::Duration::milliseconds(self.cfg.stall_after_ms as i64);
        let ttl = chrono::Duration::milliseconds(self.cfg.ttl_ms as i64);
        let mut sessions = self.sessions.lock().expect("session lock");

        for session in sessions.values_mut() {
            if session.state.is_active() && now - session.last_activity_at > stall {
                if !session.appears_stalled {
                    warn!(session_id = %session.id, "session appears stalled");
                }
                // Marked, never auto-cancelled.
                session.appears_stalled = true;
            }
        }

        let before = sessions.len();
        sessions.retain(|_, s| match s.terminal_at {
            Some(t) => now - t <= ttl,
            None => true,
        });
        while sessions.len() > self.cfg.max_sessions {
            if !evict_one(&mut sessions) {
                break;
            }
        }
        before - sessions.len()
    }

    // ------------------------------------------------------------------
    // background execution
    // ------------------------------------------------------------------

    async fn run_session(self: &Arc<Self>, session_id: String, plan: Plan, workers: usize) {
        self.set_state(&session_id, SessionState::Ready);
        let chunks = self.build_chunks(&session_id, &plan).await;
        self.set_state(&session_id, SessionState::Executing);

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut join = JoinSet::new();

        for step in &plan.steps {
            if self.cfg.dispatch_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.cfg.dispatch_delay_ms)).await;
            }
            if !self.wait_until_dispatchable(&session_id).await {
                break;
            }
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            if !self.wait_until_dispatchable(&session_id).await {
                break;
            }

            let mgr = Arc::clone(self);
            let sid = session_id.clone();
            let plan_id = plan.id.clone();
            let step_number = step.step_number;
            let file = step.title.clone();
            let chunk = chunks.get(&file).cloned().unwrap_or_default();
            join.spawn(async move {
                let _permit = permit;
                mgr.run_step(&sid, &plan_id, step_number, &file, &chunk).await;
            });
        }
        while join.join_next().await.is_some() {}
        self.finish(&session_id);
    }

    /// Per-file diff chunks: the real ref-range diff when git has it, else a
    /// pseudo-diff of the file's current content.
    async fn build_chunks(&self, session_id: &str, plan: &Plan) -> HashMap<String, String> {
        let root = self.runner.retrieval().indexer().workspace_root().to_path_buf();
        let (base, head, files) = {
            let sessions = self.sessions.lock().expect("session lock");
            let Some(session) = sessions.get(session_id) else {
                return HashMap::new();
            };
            (
                session.pr.base_ref.clone(),
                session.pr.commit_hash.clone(),
                session.pr.changed_files.clone(),
            )
        };

        let mut from_git: HashMap<String, String> = HashMap::new();
        match capture_ref_range(&root, &base, &head).await {
            Ok(diff) if !diff.trim().is_empty() => {
                for file in parse_unified_diff(&diff) {
                    from_git.insert(file.path.clone(), file.render());
                }
            }
            Ok(_) => {}
            Err(e) => debug!(session_id, error = %e, "ref-range diff unavailable, using file contents"),
        }

        let mut chunks = HashMap::new();
        for file in files {
            self.bump_cache_stats(session_id, chunks.contains_key(&file));
            if chunks.contains_key(&file) {
                continue;
            }
            let chunk = match from_git.remove(&file) {
                Some(c) => c,
                None => match self.runner.retrieval().get_file(&file, None).await {
                    Ok(content) => pseudo_diff(&file, &content),
                    Err(e) => {
                        debug!(session_id, file, error = %e, "file unreadable; empty chunk");
                        String::new()
                    }
                },
            };
            chunks.insert(file, chunk);
        }
        let _ = plan;
        chunks
    }

    async fn run_step(&self, session_id: &str, plan_id: &str, step: u32, file: &str, chunk: &str) {
        let t0 = Instant::now();
        if let Err(e) = self.tracker.start_step(plan_id, step) {
            warn!(session_id, step, error = %e, "step not started");
            let _ = self.tracker.fail_step(plan_id, step, e.to_string(), false);
            self.record_step(session_id, step, file, Err(e.to_string()), t0, 0);
            return;
        }

        let outcome = self.runner.review_diff(chunk, &self.review_opts).await;
        match outcome {
            Ok(result) => {
                let _ = self.tracker.complete_step(
                    plan_id,
                    step,
                    Some(format!("{} finding(s)", result.findings.len())),
                );
                let tokens = estimate_tokens(chunk) as u64;
                self.record_step(session_id, step, file, Ok(result.findings), t0, tokens);
            }
            Err(e) => {
                let _ = self.tracker.fail_step(plan_id, step, e.to_string(), false);
                self.record_step(session_id, step, file, Err(e.to_string()), t0, 0);
            }
        }
    }

    fn record_step(
        &self,
        session_id: &str,
        step: u32,
        file: &str,
        outcome: Result<Vec<review_pipeline::Finding>, String>,
        t0: Instant,
        tokens: u64,
    ) {
        let mut sessions = self.sessions.lock().expect("session lock");
        let Some(session) = sessions.get_mut(session_id) else {
            return;
        };
        let duration_ms = t0.elapsed().as_millis() as u64;
        match outcome {
            Ok(findings) => {
                session.step_timings.push(StepTiming {
                    step_number: step,
                    file: file.to_string(),
                    duration_ms,
                    findings: findings.len(),
                    succeeded: true,
                });
                session.findings.extend(findings);
            }
            Err(error) => {
                session.step_timings.push(StepTiming {
                    step_number: step,
                    file: file.to_string(),
                    duration_ms,
                    findings: 0,
                    succeeded: false,
                });
                session.error = Some(error);
            }
        }
        session.tokens_used += tokens;
        session.touch();
    }

    /// False once the session is gone or terminal; waits out pauses.
    async fn wait_until_dispatchable(&self, session_id: &str) -> bool {
        loop {
            let state = {
                let sessions = self.sessions.lock().expect("session lock");
                match sessions.get(session_id) {
                    Some(s) => s.state,
                    None => return false,
                }
            };
            match state {
                SessionState::Paused => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                s if s.is_terminal() => return false,
                _ => return true,
            }
        }
    }

    fn finish(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().expect("session lock");
        let Some(session) = sessions.get_mut(session_id) else {
            return;
        };
        if session.state.is_terminal() {
            return;
        }
        let any_failure = session.step_timings.iter().any(|t| !t.succeeded);
        session.state = if session.step_timings.is_empty() && session.error.is_some() {
            SessionState::Failed
        } else {
            SessionState::Completed
        };
        session.terminal_at = Some(Utc::now());
        session.touch();
        info!(
            session_id,
            state = ?session.state,
            findings = session.findings.len(),
            failures = any_failure,
            "session finished"
        );
    }

    fn set_state(&self, session_id: &str, state: SessionState) {
        let mut sessions = self.sessions.lock().expect("session lock");
        if let Some(session) = sessions.get_mut(session_id) {
            // Pause wins races against the background state ladder.
            if session.state == SessionState::Paused && state == SessionState::Executing {
                return;
            }
            if !session.state.is_terminal() {
                session.state = state;
                session.touch();
            }
        }
    }

    fn bump_cache_stats(&self, session_id: &str, hit: bool) {
        let mut sessions = self.sessions.lock().expect("session lock");
        if let Some(session) = sessions.get_mut(session_id) {
            session.cache_lookups += 1;
            if hit {
                session.cache_hits += 1;
            }
        }
    }

    fn status_of(&self, session: &Session) -> SessionStatus {
        let progress = match self.tracker.view(&session.plan_id) {
            Ok(view) => SessionProgress {
                completed: view.completed,
                total: view.total,
                percentage: view.percentage,
            },
            Err(_) => SessionProgress {
                completed: 0,
                total: session.pr.changed_files.len(),
                percentage: 0.0,
            },
        };
        SessionStatus {
            session_id: session.id.clone(),
            state: session.state,
            progress,
            telemetry: self.telemetry_of(session),
            findings_count: session.findings.len(),
            error: session.error.clone(),
        }
    }

    fn telemetry_of(&self, session: &Session) -> SessionTelemetry {
        let now = Utc::now();
        let last_activity_ms = (now - session.last_activity_at).num_milliseconds().max(0) as u64;
        let appears_stalled = session.appears_stalled
            || (session.state.is_active() && last_activity_ms > self.cfg.stall_after_ms);
        SessionTelemetry {
            elapsed_ms: (now - session.created_at).num_milliseconds().max(0) as u64,
            tokens_used: session.tokens_used,
            cache_hit_rate: session.cache_hit_rate(),
            last_activity_ms,
            appears_stalled,
        }
    }
}

/// Evict the least recently active session; prefers terminal ones.
fn evict_one(sessions: &mut HashMap<String, Session>) -> bool {
    let victim = sessions
        .values()
        .filter(|s| s.state.is_terminal())
        .min_by_key(|s| s.last_activity_at)
        .or_else(|| sessions.values().min_by_key(|s| s.last_activity_at))
        .map(|s| s.id.clone());
    match victim {
        Some(id) => {
            debug!(session_id = %id, "session evicted");
            sessions.remove(&id);
            true
        }
        None => false,
    }
}

/// Periodic housekeeping task (default every 30 s).
pub fn spawn_housekeeper(manager: Arc<SessionManager>) -> JoinHandle<()> {
    let interval_ms = manager.cfg.housekeeping_interval_ms;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1_000)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            manager.housekeeping();
        }
    })
}

/// All-added diff for files git cannot explain.
fn pseudo_diff(path: &str, content: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let mut out = format!("--- /dev/null\n+++ b/{path}\n@@ -0,0 +1,{} @@\n", lines.len());
    for line in lines {
        out.push_str(&format!("+{line}\n"));
    }
    out
}
