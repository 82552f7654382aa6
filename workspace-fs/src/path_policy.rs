//! Path policy: validate an input string against a workspace root.
//!
//! Rules, evaluated in order:
//! 1. Reject absolute inputs.
//! 2. Reject any `..` segment.
//! 3. Normalize (drop `.` segments) and join onto the canonical root.
//! 4. Require the result to start with the canonical root.
//!
//! The oversize check is a separate helper layered on top for read paths.

use std::path::{Component, Path, PathBuf};

use crate::errors::FsPolicyError;

/// Per-file byte limit applied to indexing and `get_file` reads.
pub const MAX_FILE_SIZE: u64 = 1024 * 1024;

/// Resolve `input` against `workspace_root` and return the absolute path.
///
/// The target does not have to exist; only the root is canonicalized, so the
/// policy also covers paths about to be created.
pub fn resolve_workspace_path(
    workspace_root: &Path,
    input: &str,
) -> Result<PathBuf, FsPolicyError> {
    let candidate = Path::new(input);
    if candidate.is_absolute() || input.starts_with('/') || input.starts_with('\\') {
        return Err(FsPolicyError::AbsolutePath(input.to_string()));
    }

    let mut normalized = PathBuf::new();
    for comp in candidate.components() {
        match comp {
            Component::ParentDir => {
                return Err(FsPolicyError::Traversal(input.to_string()));
            }
            Component::CurDir => {}
            Component::Normal(seg) => normalized.push(seg),
            // Prefix/RootDir cannot appear once absolute inputs are rejected,
            // but treat them as traversal rather than silently dropping them.
            Component::Prefix(_) | Component::RootDir => {
                return Err(FsPolicyError::AbsolutePath(input.to_string()));
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(FsPolicyError::OutsideWorkspace(input.to_string()));
    }

    let root = dunce::canonicalize(workspace_root)?;
    let full = root.join(&normalized);
    if !full.starts_with(&root) {
        return Err(FsPolicyError::OutsideWorkspace(input.to_string()));
    }
    Ok(full)
}

/// Stat-check a resolved path for existence and the read size limit.
///
/// Returns the file size on success so callers can reuse the stat.
pub fn check_readable_size(full: &Path) -> Result<u64, FsPolicyError> {
    let meta = std::fs::metadata(full).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            FsPolicyError::NotFound(full.to_path_buf())
        } else {
            FsPolicyError::Io(e)
        }
    })?;
    if !meta.is_file() {
        return Err(FsPolicyError::NotFound(full.to_path_buf()));
    }
    if meta.len() > MAX_FILE_SIZE {
        return Err(FsPolicyError::FileTooLarge {
            path: full.to_path_buf(),
            size: meta.len(),
            limit: MAX_FILE_SIZE,
        });
    }
    Ok(meta.len())
}

/// Workspace-relative form of `full` with forward slashes.
///
/// Falls back to the full path display when `full` is not under `root`;
/// callers that went through [`resolve_workspace_path`] never hit that case.
pub fn to_rel_display(root: &Path, full: &Path) -> String {
    full.strip_prefix(root)
        .unwrap_or(full)
        .to_string_lossy()
        .replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn rejects_absolute() {
        let ws = TempDir::new().unwrap();
        let err = resolve_workspace_path(ws.path(), "/etc/passwd").unwrap_err();
        assert!(matches!(err, FsPolicyError::AbsolutePath(_)));
    }

    #[test]
    fn rejects_traversal_anywhere() {
        let ws = TempDir::new().unwrap();
        for bad in ["../x", "a/../../b", "a/b/..", ".."] {
            let err = resolve_workspace_path(ws.path(), bad).unwrap_err();
            assert!(
                matches!(err, FsPolicyError::Traversal(_)),
                "expected traversal for {bad}"
            );
        }
    }

    #[test]
    fn resolves_under_root() {
        let ws = TempDir::new().unwrap();
        let full = resolve_workspace_path(ws.path(), "src/./main.rs").unwrap();
        let root = dunce::canonicalize(ws.path()).unwrap();
        assert!(full.starts_with(&root));
        assert!(full.ends_with("src/main.rs"));
    }

    #[test]
    fn size_check_flags_oversize() {
        let ws = TempDir::new().unwrap();
        let path = ws.path().join("big.txt");
        std::fs::write(&path, vec![b'x'; (MAX_FILE_SIZE + 1) as usize]).unwrap();
        let err = check_readable_size(&path).unwrap_err();
        assert!(matches!(err, FsPolicyError::FileTooLarge { .. }));
    }

    #[test]
    fn size_check_reports_missing() {
        let ws = TempDir::new().unwrap();
        let err = check_readable_size(&ws.path().join("nope.txt")).unwrap_err();
        assert!(matches!(err, FsPolicyError::NotFound(_)));
    }
}
