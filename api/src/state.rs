//! Composition root: one `AppState` per workspace, passed down explicitly.
//! Tests build their own root against the fixed engine.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{info, warn};

use engine_client::{EngineClient, EngineConfig};
use indexing::{Indexer, IndexingConfig, WatcherConfig};
use memories::MemoryStore;
use planner::{
    ApprovalService, ExecutionTracker, ExecutorConfig, PlanExecutor, PlanGenerator,
    PlanHistoryService, PlanStore,
};
use retrieval::{ContextBundler, RetrievalService};
use review_pipeline::ReviewRunner;
use review_sessions::{SessionConfig, SessionManager};

use crate::errors::{AppError, AppResult};

/// Transport selected on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    Stdio,
    Http,
}

/// Daemon options resolved from CLI flags (flags override env).
#[derive(Clone, Debug)]
pub struct DaemonOptions {
    pub workspace: PathBuf,
    pub index_on_start: bool,
    pub watch: bool,
    pub transport: Transport,
    pub port: u16,
    pub metrics: bool,
    pub metrics_port: u16,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("."),
            index_on_start: false,
            watch: false,
            transport: Transport::Stdio,
            port: 8787,
            metrics: false,
            metrics_port: 9187,
        }
    }
}

/// Plain-text counters for the metrics listener.
#[derive(Debug, Default)]
pub struct Metrics {
    pub requests_total: AtomicU64,
    pub tool_errors_total: AtomicU64,
    pub index_runs_total: AtomicU64,
    pub sessions_started_total: AtomicU64,
}

impl Metrics {
    pub fn render(&self) -> String {
        format!(
            "context_daemon_requests_total {}\n\
             context_daemon_tool_errors_total {}\n\
             context_daemon_index_runs_total {}\n\
             context_daemon_sessions_started_total {}\n",
            self.requests_total.load(Ordering::Relaxed),
            self.tool_errors_total.load(Ordering::Relaxed),
            self.index_runs_total.load(Ordering::Relaxed),
            self.sessions_started_total.load(Ordering::Relaxed),
        )
    }
}

/// Everything the dispatcher needs, owned once per workspace.
pub struct AppState {
    pub root: PathBuf,
    pub opts: DaemonOptions,
    pub indexer: Arc<Indexer>,
    pub retrieval: RetrievalService,
    pub bundler: ContextBundler,
    pub memories: MemoryStore,
    pub plan_store: PlanStore,
    pub history: Arc<PlanHistoryService>,
    pub approvals: Arc<ApprovalService>,
    pub tracker: Arc<ExecutionTracker>,
    pub executor: PlanExecutor,
    pub generator: PlanGenerator,
    pub reviewer: Arc<ReviewRunner>,
    pub sessions: Arc<SessionManager>,
    pub metrics: Metrics,
}

impl AppState {
    /// Build the full composition root for a workspace.
    ///
    /// Fails with `OfflinePolicy.RemoteEndpoint` when offline-only mode is
    /// combined with a remote engine URL.
    pub fn build(opts: DaemonOptions) -> AppResult<Arc<Self>> {
        let root = canonical_workspace(&opts.workspace)?;

        let engine_cfg = EngineConfig::from_env();
        if engine_cfg.api_token.is_none() {
            // Logged once on startup; requests themselves surface EngineAuth.
            warn!(
                "no engine token configured; set AUGMENT_API_TOKEN and AUGMENT_API_URL \
                 if the context engine requires authentication"
            );
        }
        let engine = EngineClient::from_config(engine_cfg)?;
        Self::build_with_engine(opts, root, engine)
    }

    /// Root with a caller-supplied engine (tests use the fixed engine).
    pub fn build_with_engine(
        opts: DaemonOptions,
        root: PathBuf,
        engine: EngineClient,
    ) -> AppResult<Arc<Self>> {
        let indexer = Arc::new(Indexer::new(&root, IndexingConfig::from_env(), engine));
        let retrieval = RetrievalService::new(Arc::clone(&indexer));
        let bundler = ContextBundler::new(retrieval.clone());
        let tracker = Arc::new(ExecutionTracker::new());
        let approvals = Arc::new(ApprovalService::new());
        let reviewer = Arc::new(ReviewRunner::new(retrieval.clone()));
        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&reviewer),
            Arc::clone(&tracker),
            SessionConfig::from_env(),
        ));
        let executor = PlanExecutor::new(
            Arc::clone(&tracker),
            retrieval.clone(),
            Arc::clone(&approvals),
            ExecutorConfig::default(),
        );

        info!(workspace = %root.display(), "composition root ready");
        Ok(Arc::new(Self {
            memories: MemoryStore::new(&root),
            plan_store: PlanStore::new(&root),
            history: Arc::new(PlanHistoryService::new(&root)),
            generator: PlanGenerator::new(bundler.clone()),
            sessions,
            executor,
            approvals,
            tracker,
            reviewer,
            bundler,
            retrieval,
            indexer,
            metrics: Metrics::default(),
            root,
            opts,
        }))
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig::from_env()
    }
}

fn canonical_workspace(path: &std::path::Path) -> AppResult<PathBuf> {
    std::fs::canonicalize(path)
        .map_err(|e| AppError::new("ConfigInvalid", format!("workspace {}: {e}", path.display())))
}
