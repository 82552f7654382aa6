//! Daemon surface: composition root, tool dispatcher, and transports.
//!
//! `start` wires the whole workspace stack — indexer, watcher, caches, plan
//! services, review pipeline, reactive sessions — then serves the tool
//! protocol on stdio or HTTP until SIGINT/SIGTERM. Shutdown stops the
//! watcher, flushes persisted caches, and aborts housekeeping tasks.

pub mod dispatcher;
pub mod errors;
pub mod http;
pub mod render;
pub mod rpc;
pub mod scrub;
pub mod state;

use std::sync::Arc;

use tracing::{info, warn};

pub use dispatcher::{ToolSpec, call_tool, manifest};
pub use errors::{AppError, AppResult, ErrorBody};
pub use state::{AppState, DaemonOptions, Transport};

/// Run the daemon until shutdown. Returns an error only for startup
/// failures; the caller maps `OfflinePolicy.RemoteEndpoint` to exit code 2.
pub async fn start(opts: DaemonOptions) -> AppResult<()> {
    let state = AppState::build(opts.clone())?;

    let reachable = state.indexer.probe_engine().await;
    if !reachable {
        warn!("context engine not reachable at startup; requests will retry lazily");
    }

    if opts.index_on_start {
        if state.indexer.config().use_worker {
            let mut rx = state.indexer.index_workspace_background();
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    if let indexing::IndexEvent::Failed(e) = event {
                        warn!(error = %e, "startup index failed");
                    }
                }
            });
        } else if let Err(e) = state.indexer.index_workspace().await {
            // A failed startup index never poisons the daemon; status
            // carries the error and tools re-check lazily.
            warn!(error = %e, "startup index failed");
        }
    }

    let watcher = if opts.watch {
        match indexing::spawn_watcher(Arc::clone(&state.indexer), state.watcher_config()) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "watcher failed to start");
                None
            }
        }
    } else {
        None
    };

    let sweeper = planner::spawn_sweeper(Arc::clone(&state.tracker));
    let housekeeper = review_sessions::spawn_housekeeper(Arc::clone(&state.sessions));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    spawn_signal_listener(shutdown_tx.clone());

    let metrics_task = if opts.metrics {
        Some(tokio::spawn(http::serve_metrics(
            Arc::clone(&state),
            opts.metrics_port,
            shutdown_rx.clone(),
        )))
    } else {
        None
    };

    info!(
        workspace = %state.root.display(),
        transport = ?opts.transport,
        watch = opts.watch,
        "context daemon up"
    );

    let served = match opts.transport {
        Transport::Stdio => rpc::serve_stdio(Arc::clone(&state), shutdown_rx.clone()).await,
        Transport::Http => http::serve_http(Arc::clone(&state), opts.port, shutdown_rx).await,
    };
    if let Err(e) = served {
        warn!(error = %e, "transport ended with error");
    }

    // Graceful shutdown: stop intake, flush state, drop periodic tasks.
    let _ = shutdown_tx.send(true);
    if let Some(handle) = watcher {
        handle.stop();
    }
    if let Err(e) = state.indexer.caches.flush_to_disk() {
        warn!(error = %e, "cache flush on shutdown failed");
    }
    sweeper.abort();
    housekeeper.abort();
    if let Some(task) = metrics_task {
        task.abort();
    }
    info!("context daemon stopped");
    Ok(())
}

fn spawn_signal_listener(shutdown: tokio::sync::watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("install SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("shutdown signal received");
        let _ = shutdown.send(true);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_client::EngineClient;
    use serde_json::json;
    use tempfile::TempDir;

    fn touch(ws: &TempDir, rel: &str, content: &str) {
        let path = ws.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    async fn state_for(ws: &TempDir) -> Arc<AppState> {
        AppState::build_with_engine(
            DaemonOptions::default(),
            ws.path().to_path_buf(),
            EngineClient::fixed(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn index_then_search_round_trip() {
        let ws = TempDir::new().unwrap();
        touch(&ws, "src/auth/login.ts", "const WHALE_CONST_42 = 1;\n");
        let state = state_for(&ws).await;

        call_tool(&state, "index_workspace", json!({})).await.unwrap();
        let text = call_tool(
            &state,
            "semantic_search",
            json!({ "query": "WHALE_CONST_42", "top_k": 5 }),
        )
        .await
        .unwrap();
        assert!(text.contains("src/auth/login.ts"));
    }

    #[tokio::test]
    async fn dag_execution_scenario() {
        let ws = TempDir::new().unwrap();
        let state = state_for(&ws).await;

        // depends_on: 1→{}, 2→{1}, 3→{1}, 4→{2,3}
        let plan = json!({
            "id": "dag-plan", "version": 1,
            "created_at": chrono::Utc::now(), "updated_at": chrono::Utc::now(),
            "goal": "diamond", "steps": [
                { "step_number": 1, "title": "one", "depends_on": [] },
                { "step_number": 2, "title": "two", "depends_on": [1] },
                { "step_number": 3, "title": "three", "depends_on": [1] },
                { "step_number": 4, "title": "four", "depends_on": [2, 3] },
            ]
        });
        call_tool(&state, "save_plan", json!({ "plan": plan })).await.unwrap();

        let loaded: serde_json::Value = serde_json::from_str(
            &call_tool(&state, "load_plan", json!({ "id": "dag-plan" })).await.unwrap(),
        )
        .unwrap();
        let critical: Vec<u64> = loaded["dependency_graph"]["critical_path"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_u64().unwrap())
            .collect();
        assert_eq!(critical.len(), 3);
        assert_eq!(critical[0], 1);
        assert_eq!(critical[2], 4);

        let done: serde_json::Value = serde_json::from_str(
            &call_tool(
                &state,
                "complete_step",
                json!({ "plan_id": "dag-plan", "step_number": 1 }),
            )
            .await
            .unwrap(),
        )
        .unwrap();
        assert_eq!(done["newly_ready"], json!([2, 3]));

        for n in [2, 3] {
            call_tool(
                &state,
                "complete_step",
                json!({ "plan_id": "dag-plan", "step_number": n }),
            )
            .await
            .unwrap();
        }
        let progress: serde_json::Value = serde_json::from_str(
            &call_tool(&state, "view_progress", json!({ "plan_id": "dag-plan" })).await.unwrap(),
        )
        .unwrap();
        assert_eq!(progress["steps"]["4"]["status"], "ready");
    }

    #[tokio::test]
    async fn review_verdict_gate_scenario() {
        let ws = TempDir::new().unwrap();
        std::fs::write(
            ws.path().join(".review-invariants.yml"),
            "security:\n  - id: SEC\n    severity: HIGH\n    action: deny\n    pattern: \"secret\\\\s*=\\\\s*[\\\"'][^\\\"']+[\\\"']\"\n",
        )
        .unwrap();
        let state = state_for(&ws).await;

        let diff = "--- a/src/api/auth.ts\n+++ b/src/api/auth.ts\n@@ -1,1 +1,2 @@\n import x;\n+const secret = \"my-super-secret-key-12345\";\n";
        let text = call_tool(
            &state,
            "review_diff",
            json!({
                "diff": diff,
                "options": { "fail_on_severity": "HIGH", "static_analysis": false }
            }),
        )
        .await
        .unwrap();
        let result: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(result["should_fail"], true);
        assert!(!result["fail_reasons"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_round_trip_via_tools() {
        let ws = TempDir::new().unwrap();
        let state = state_for(&ws).await;
        call_tool(
            &state,
            "add_memory",
            json!({ "category": "preferences", "title": "Style", "content": "tabs over spaces" }),
        )
        .await
        .unwrap();
        let listed = call_tool(&state, "list_memories", json!({})).await.unwrap();
        assert!(listed.contains("tabs over spaces"));
    }

    #[tokio::test]
    async fn scrub_and_validate_tools() {
        let ws = TempDir::new().unwrap();
        let state = state_for(&ws).await;
        let scrubbed = call_tool(
            &state,
            "scrub_secrets",
            json!({ "content": "token = \"abc123456\"" }),
        )
        .await
        .unwrap();
        assert!(scrubbed.contains("[REDACTED]"));

        let validated = call_tool(
            &state,
            "validate_content",
            json!({ "content": "hello" }),
        )
        .await
        .unwrap();
        assert!(validated.contains("\"valid\": true"));
    }
}
