//! Line-delimited JSON-RPC 2.0 over stdio.
//!
//! stdout carries nothing but responses; logging goes to stderr. Methods:
//! `initialize` and `tools/list` return the catalog, `tools/call` invokes a
//! tool, and a bare tool name as the method is accepted as a convenience.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::dispatcher::{call_tool, manifest};
use crate::errors::{AppError, ErrorBody};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl RpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Value, code: i64, app_error: &AppError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(json!({
                "code": code,
                "message": app_error.message,
                "data": ErrorBody::from(app_error),
            })),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Handle one parsed request.
pub async fn handle_request(state: &Arc<AppState>, request: RpcRequest) -> RpcResponse {
    let id = request.id.unwrap_or(Value::Null);
    match request.method.as_str() {
        "initialize" => RpcResponse::ok(
            id,
            json!({
                "server": "context-daemon",
                "version": env!("CARGO_PKG_VERSION"),
                "workspace": state.root.display().to_string(),
                "tools": manifest(),
            }),
        ),
        "tools/list" => RpcResponse::ok(id, json!({ "tools": manifest() })),
        "shutdown" => RpcResponse::ok(id, json!({ "ok": true })),
        "tools/call" => {
            let params: ToolCallParams = match serde_json::from_value(
                request.params.unwrap_or_else(|| json!({})),
            ) {
                Ok(p) => p,
                Err(e) => {
                    let err = AppError::invalid_input(format!("bad tools/call params: {e}"));
                    return RpcResponse::err(id, -32602, &err);
                }
            };
            tool_response(state, id, &params.name, params.arguments).await
        }
        // Convenience binding: the tool name as the JSON-RPC method.
        name => {
            let arguments = request.params.unwrap_or_else(|| json!({}));
            tool_response(state, id, name, arguments).await
        }
    }
}

async fn tool_response(
    state: &Arc<AppState>,
    id: Value,
    name: &str,
    arguments: Value,
) -> RpcResponse {
    match call_tool(state, name, arguments).await {
        Ok(text) => RpcResponse::ok(
            id,
            json!({ "content": [{ "type": "text", "text": text }] }),
        ),
        Err(e) => {
            debug!(tool = name, code = e.code, "tool error");
            RpcResponse::err(id, -32000, &e)
        }
    }
}

/// Serve requests line by line from stdin until EOF or shutdown.
pub async fn serve_stdio(
    state: Arc<AppState>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> std::io::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();
    info!("stdio transport ready");

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            maybe_line = lines.next_line() => {
                let Some(line) = maybe_line? else {
                    info!("stdin closed; stopping transport");
                    break;
                };
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                let response = match serde_json::from_str::<RpcRequest>(&line) {
                    Ok(request) => handle_request(&state, request).await,
                    Err(e) => {
                        warn!(error = %e, "unparseable request line");
                        let err = AppError::invalid_input(format!("parse error: {e}"));
                        RpcResponse::err(Value::Null, -32700, &err)
                    }
                };
                let mut out = serde_json::to_vec(&response)?;
                out.push(b'\n');
                stdout.write_all(&out).await?;
                stdout.flush().await?;
            }
        }
    }
    Ok(())
}
