//! Reactive review sessions: long-running, pausable review runs over the
//! pipeline, with bounded parallel dispatch and persistent telemetry.

pub mod config;
pub mod errors;
pub mod manager;
pub mod session;

pub use config::SessionConfig;
pub use errors::SessionError;
pub use manager::{SessionManager, StartReviewRequest, spawn_housekeeper};
pub use session::{
    PrMetadata, SessionProgress, SessionState, SessionStatus, SessionTelemetry,
    SessionTelemetryDetail, StepTiming,
};

#[cfg(test)]
mod tests {
    use super::*;
    use engine_client::EngineClient;
    use indexing::{Indexer, IndexingConfig};
    use planner::ExecutionTracker;
    use retrieval::RetrievalService;
    use review_pipeline::ReviewRunner;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::time::Duration;

    fn manager_for(ws: &TempDir, cfg: SessionConfig) -> Arc<SessionManager> {
        let indexer = Arc::new(Indexer::new(
            ws.path(),
            IndexingConfig::default(),
            EngineClient::fixed(),
        ));
        let runner = Arc::new(ReviewRunner::new(RetrievalService::new(indexer)));
        Arc::new(SessionManager::new(
            runner,
            Arc::new(ExecutionTracker::new()),
            cfg,
        ))
    }

    fn seed_files(ws: &TempDir, count: usize) -> Vec<String> {
        let mut files = Vec::new();
        for i in 0..count {
            let rel = format!("src/file{i}.ts");
            let path = ws.path().join(&rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, format!("export const v{i} = {i};\n")).unwrap();
            files.push(rel);
        }
        files
    }

    fn request(files: Vec<String>, parallel: bool) -> StartReviewRequest {
        StartReviewRequest {
            pr: PrMetadata {
                commit_hash: "deadbeef".into(),
                base_ref: "main".into(),
                changed_files: files,
                title: Some("test pr".into()),
                author: None,
                additions: None,
                deletions: None,
            },
            parallel,
            max_workers: Some(2),
        }
    }

    async fn wait_for_state(
        manager: &Arc<SessionManager>,
        id: &str,
        state: SessionState,
        timeout_ms: u64,
    ) -> SessionStatus {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            let status = manager.status(id).unwrap();
            if status.state == state {
                return status;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {state:?}; last = {:?}",
                status.state
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn session_runs_to_completion() {
        let ws = TempDir::new().unwrap();
        let files = seed_files(&ws, 3);
        let manager = manager_for(&ws, SessionConfig::default());

        let id = manager.start_review(request(files, true)).unwrap();
        let status = wait_for_state(&manager, &id, SessionState::Completed, 5_000).await;
        assert_eq!(status.progress.completed, 3);
        assert!((status.progress.percentage - 100.0).abs() < f32::EPSILON);

        let telemetry = manager.telemetry(&id).unwrap();
        assert_eq!(telemetry.steps.len(), 3);
        assert!(telemetry.steps.iter().all(|s| s.succeeded));

        let findings = manager.findings(&id).unwrap();
        assert_eq!(findings.len(), status.findings_count);
    }

    #[tokio::test]
    async fn pause_stops_dispatch_and_resume_continues() {
        let ws = TempDir::new().unwrap();
        let files = seed_files(&ws, 6);
        let cfg = SessionConfig {
            dispatch_delay_ms: 100,
            ..SessionConfig::default()
        };
        let manager = manager_for(&ws, cfg);

        let id = manager
            .start_review(StartReviewRequest {
                max_workers: Some(1),
                ..request(files, false)
            })
            .unwrap();

        wait_for_state(&manager, &id, SessionState::Executing, 2_000).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        let paused = manager.pause(&id).unwrap();
        assert_eq!(paused.state, SessionState::Paused);

        // In-flight work settles; no new dispatches while paused.
        tokio::time::sleep(Duration::from_millis(250)).await;
        let settled = manager.status(&id).unwrap().progress.completed;
        tokio::time::sleep(Duration::from_millis(250)).await;
        let still = manager.status(&id).unwrap();
        assert_eq!(still.state, SessionState::Paused);
        assert!(still.progress.completed <= settled + 1);
        assert!(still.progress.completed < 6);

        manager.resume(&id).unwrap();
        let done = wait_for_state(&manager, &id, SessionState::Completed, 10_000).await;
        assert_eq!(done.progress.completed, 6);
        assert!((done.progress.percentage - 100.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn pause_requires_executing_state() {
        let ws = TempDir::new().unwrap();
        let files = seed_files(&ws, 1);
        let manager = manager_for(&ws, SessionConfig::default());
        let id = manager.start_review(request(files, true)).unwrap();
        wait_for_state(&manager, &id, SessionState::Completed, 5_000).await;

        assert!(matches!(
            manager.pause(&id),
            Err(SessionError::InvalidState { .. })
        ));
        assert!(matches!(
            manager.resume(&id),
            Err(SessionError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn ttl_eviction_removes_terminal_sessions() {
        let ws = TempDir::new().unwrap();
        let files = seed_files(&ws, 1);
        let cfg = SessionConfig {
            ttl_ms: 0,
            ..SessionConfig::default()
        };
        let manager = manager_for(&ws, cfg);
        let id = manager.start_review(request(files, true)).unwrap();
        wait_for_state(&manager, &id, SessionState::Completed, 5_000).await;

        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.housekeeping();
        assert!(matches!(
            manager.status(&id),
            Err(SessionError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn empty_file_list_is_rejected() {
        let ws = TempDir::new().unwrap();
        let manager = manager_for(&ws, SessionConfig::default());
        assert!(matches!(
            manager.start_review(request(Vec::new(), true)),
            Err(SessionError::InvalidRequest(_))
        ));
    }
}
