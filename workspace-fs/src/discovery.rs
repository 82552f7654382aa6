//! Recursive workspace walk producing the indexable file set.
//!
//! Single `stat` per candidate: entries are rejected by name, extension, and
//! ignore rules before their metadata is consulted.

use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

use crate::ignore_rules::{DIR_BLOCKLIST, IgnoreSet};
use crate::path_policy::{MAX_FILE_SIZE, to_rel_display};

/// Basenames indexed even when hidden or extensionless.
pub const FILENAME_ALLOWLIST: &[&str] = &[
    "Makefile",
    "Dockerfile",
    "Jenkinsfile",
    "CMakeLists.txt",
    ".gitignore",
    ".contextignore",
    ".dockerignore",
    ".env.example",
    "tsconfig.json",
    "package.json",
    "pyproject.toml",
    "Cargo.toml",
    "go.mod",
    "Gemfile",
];

/// Extensions considered source or configuration text.
pub const INDEXABLE_EXTENSIONS: &[&str] = &[
    "rs", "ts", "tsx", "js", "jsx", "mjs", "cjs", "py", "go", "java", "kt", "kts", "swift", "rb",
    "php", "c", "h", "cc", "cpp", "hpp", "cs", "scala", "clj", "ex", "exs", "erl", "hs", "ml",
    "lua", "sh", "bash", "zsh", "fish", "ps1", "sql", "html", "css", "scss", "less", "vue",
    "svelte", "md", "mdx", "rst", "txt", "json", "yaml", "yml", "toml", "xml", "ini", "cfg",
    "conf", "properties", "gradle", "proto", "graphql", "tf", "dart",
];

/// One file that passed discovery filters. Content is read later by the
/// indexing layer so a stale entry never carries stale bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Workspace-relative path with forward slashes.
    pub rel_path: String,
    pub size: u64,
}

/// Walk `workspace_root` and return every indexable file.
///
/// Order is the walker's directory order; callers needing determinism sort
/// by `rel_path`.
pub fn discover_files(workspace_root: &Path, ignore: &IgnoreSet) -> Vec<DiscoveredFile> {
    let root = workspace_root.to_path_buf();
    let mut out = Vec::new();

    let walker = WalkDir::new(&root).follow_links(false).into_iter();
    let mut it = walker.filter_entry(|entry| {
        if entry.depth() == 0 {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        if entry.file_type().is_dir() {
            if DIR_BLOCKLIST.contains(&name.as_ref()) {
                return false;
            }
            // Hidden directories are never descended into.
            return !name.starts_with('.');
        }
        true
    });

    while let Some(entry) = it.next() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!(error = %e, "discovery: unreadable entry skipped");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if !is_indexable_name(&name) {
            continue;
        }

        let rel = to_rel_display(&root, entry.path());
        if ignore.should_ignore(&rel, false) {
            continue;
        }

        let size = match entry.metadata() {
            Ok(m) => m.len(),
            Err(_) => continue,
        };
        if size > MAX_FILE_SIZE {
            continue;
        }

        out.push(DiscoveredFile {
            rel_path: rel,
            size,
        });
    }

    debug!(files = out.len(), "discovery complete");
    out
}

/// Whether a basename is an indexing candidate: allow-listed outright, or a
/// non-hidden file with an indexable extension. Shared with the watcher so
/// live events and full walks classify identically.
pub fn is_indexable_name(name: &str) -> bool {
    if FILENAME_ALLOWLIST.contains(&name) {
        return true;
    }
    if name.starts_with('.') {
        return false;
    }
    match name.rsplit_once('.') {
        Some((_, ext)) => INDEXABLE_EXTENSIONS.contains(&ext),
        None => false,
    }
}

/// Binary heuristic: any NUL byte, or at least 10% non-printable bytes.
pub fn looks_binary(bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return false;
    }
    let mut non_printable = 0usize;
    for &b in bytes {
        if b == 0 {
            return true;
        }
        if b < 0x09 || (b > 0x0d && b < 0x20) || b == 0x7f {
            non_printable += 1;
        }
    }
    non_printable * 10 >= bytes.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(ws: &TempDir, rel: &str, content: &str) {
        let path = ws.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn finds_source_skips_blocked_and_hidden() {
        let ws = TempDir::new().unwrap();
        touch(&ws, "src/main.rs", "fn main() {}");
        touch(&ws, "node_modules/x/index.js", "x");
        touch(&ws, ".hidden/secret.rs", "x");
        touch(&ws, "notes.xyz", "not indexable");
        touch(&ws, "Makefile", "all:");

        let ignore = IgnoreSet::load(ws.path());
        let mut rels: Vec<String> = discover_files(ws.path(), &ignore)
            .into_iter()
            .map(|f| f.rel_path)
            .collect();
        rels.sort();
        assert_eq!(rels, vec!["Makefile", "src/main.rs"]);
    }

    #[test]
    fn respects_gitignore() {
        let ws = TempDir::new().unwrap();
        touch(&ws, ".gitignore", "generated/\n");
        touch(&ws, "generated/out.ts", "x");
        touch(&ws, "src/ok.ts", "x");

        let ignore = IgnoreSet::load(ws.path());
        let rels: Vec<String> = discover_files(ws.path(), &ignore)
            .into_iter()
            .map(|f| f.rel_path)
            .collect();
        assert!(rels.contains(&"src/ok.ts".to_string()));
        assert!(!rels.iter().any(|r| r.starts_with("generated/")));
    }

    #[test]
    fn oversize_files_skipped() {
        let ws = TempDir::new().unwrap();
        let big = "x".repeat((MAX_FILE_SIZE + 1) as usize);
        touch(&ws, "big.md", &big);
        touch(&ws, "small.md", "ok");

        let ignore = IgnoreSet::builtin();
        let rels: Vec<String> = discover_files(ws.path(), &ignore)
            .into_iter()
            .map(|f| f.rel_path)
            .collect();
        assert_eq!(rels, vec!["small.md"]);
    }

    #[test]
    fn binary_heuristic() {
        assert!(looks_binary(b"abc\0def"));
        assert!(looks_binary(&[0x01; 32]));
        assert!(!looks_binary(b"plain text\nwith lines\n"));
        assert!(!looks_binary(b""));
    }
}
