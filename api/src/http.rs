//! Optional HTTP binding: `POST /mcp` mirrors the stdio request/response
//! shape. The metrics listener runs on its own port.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use tracing::info;

use crate::rpc::{RpcRequest, handle_request};
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/mcp", post(mcp_route))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

async fn mcp_route(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RpcRequest>,
) -> Json<crate::rpc::RpcResponse> {
    Json(handle_request(&state, request).await)
}

/// Serve the tool protocol over HTTP until shutdown flips.
pub async fn serve_http(
    state: Arc<AppState>,
    port: u16,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    info!(port, "http transport ready");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
}

/// Plain-text metrics listener.
pub async fn serve_metrics(
    state: Arc<AppState>,
    port: u16,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> std::io::Result<()> {
    async fn metrics_route(State(state): State<Arc<AppState>>) -> String {
        state.metrics.render()
    }
    let app = Router::new()
        .route("/metrics", get(metrics_route))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    info!(port, "metrics listener ready");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
}
