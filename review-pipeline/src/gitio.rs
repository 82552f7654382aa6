//! Local git diff capture for `review_git_diff` and `review_auto`.
//!
//! Shells out to the workspace's own `git` with a bounded timeout; the
//! daemon never links a VCS library for a read-only diff.

use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::errors::ReviewError;

const GIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Unified diff of the working tree against `base_ref` (default `HEAD`).
pub async fn capture_git_diff(
    workspace_root: &Path,
    base_ref: Option<&str>,
) -> Result<String, ReviewError> {
    let mut args = vec!["diff", "--no-color", "--unified=3"];
    if let Some(base) = base_ref {
        args.push(base);
    }
    run_git(workspace_root, &args).await
}

/// Unified diff between two refs (PR-style `base...head`).
pub async fn capture_ref_range(
    workspace_root: &Path,
    base: &str,
    head: &str,
) -> Result<String, ReviewError> {
    let range = format!("{base}...{head}");
    run_git(workspace_root, &["diff", "--no-color", "--unified=3", &range]).await
}

async fn run_git(root: &Path, args: &[&str]) -> Result<String, ReviewError> {
    let mut cmd = tokio::process::Command::new("git");
    cmd.args(args)
        .current_dir(root)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    let output = tokio::time::timeout(GIT_TIMEOUT, cmd.output())
        .await
        .map_err(|_| ReviewError::GitDiff("git diff timed out".into()))?
        .map_err(|e| ReviewError::GitDiff(e.to_string()))?;

    if !output.status.success() {
        return Err(ReviewError::GitDiff(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    let diff = String::from_utf8_lossy(&output.stdout).into_owned();
    debug!(bytes = diff.len(), ?args, "git diff captured");
    Ok(diff)
}
