//! Merged ignore rule set with gitignore matching semantics.
//!
//! Sources, all additive and applied in order:
//! 1. Built-in directory block-list (dependency/build/VCS output).
//! 2. Built-in file glob block-list (minified/lock/log artifacts).
//! 3. `/.gitignore`
//! 4. First existing file of the `.contextignore` preference list.
//!
//! Matching mirrors the de-facto convention: leading `/` anchors to the
//! workspace root, trailing `/` requires a directory, slashless patterns
//! match basenames, `**` crosses separators. Negations (`!`) are parsed and
//! kept but match nothing.

use std::path::Path;

use globset::{Glob, GlobBuilder, GlobMatcher};
use tracing::{debug, warn};

/// Directory names never descended into, regardless of user rules.
pub const DIR_BLOCKLIST: &[&str] = &[
    "node_modules",
    ".git",
    ".hg",
    ".svn",
    "target",
    "dist",
    "build",
    "out",
    ".next",
    ".nuxt",
    ".venv",
    "venv",
    "__pycache__",
    ".mypy_cache",
    ".pytest_cache",
    ".idea",
    ".vscode",
    ".cache",
    "coverage",
    "vendor",
    ".terraform",
    ".gradle",
];

/// File globs excluded regardless of user rules.
pub const FILE_GLOB_BLOCKLIST: &[&str] = &[
    "*.min.js",
    "*.min.css",
    "*.map",
    "*.lock",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "*.log",
    "*.tmp",
    "*.swp",
    "*.pyc",
    "*.class",
    "*.o",
    "*.so",
    "*.dylib",
    "*.dll",
];

/// Ignore-file names probed at the workspace root, in preference order.
/// Only the first existing file is loaded (in addition to `.gitignore`).
const CONTEXT_IGNORE_CANDIDATES: &[&str] = &[".contextignore", ".augment-ignore"];

#[derive(Debug)]
struct IgnorePattern {
    raw: String,
    negated: bool,
    dir_only: bool,
    basename: bool,
    matcher: GlobMatcher,
}

/// Compiled, merged rule set for one workspace. Load once, query many times.
#[derive(Debug)]
pub struct IgnoreSet {
    patterns: Vec<IgnorePattern>,
}

impl IgnoreSet {
    /// Load built-in rules plus the workspace's ignore files.
    pub fn load(workspace_root: &Path) -> Self {
        let mut patterns = Vec::new();

        for dir in DIR_BLOCKLIST {
            push_pattern(&mut patterns, &format!("{dir}/"));
        }
        for glob in FILE_GLOB_BLOCKLIST {
            push_pattern(&mut patterns, glob);
        }

        let gitignore = workspace_root.join(".gitignore");
        if let Ok(text) = std::fs::read_to_string(&gitignore) {
            let before = patterns.len();
            parse_ignore_file(&mut patterns, &text);
            debug!(
                rules = patterns.len() - before,
                "loaded .gitignore patterns"
            );
        }

        for name in CONTEXT_IGNORE_CANDIDATES {
            let path = workspace_root.join(name);
            if let Ok(text) = std::fs::read_to_string(&path) {
                let before = patterns.len();
                parse_ignore_file(&mut patterns, &text);
                debug!(file = *name, rules = patterns.len() - before, "loaded context ignore patterns");
                break;
            }
        }

        Self { patterns }
    }

    /// Rule set with built-ins only (used by tests and the watcher seed).
    pub fn builtin() -> Self {
        let mut patterns = Vec::new();
        for dir in DIR_BLOCKLIST {
            push_pattern(&mut patterns, &format!("{dir}/"));
        }
        for glob in FILE_GLOB_BLOCKLIST {
            push_pattern(&mut patterns, glob);
        }
        Self { patterns }
    }

    /// Whether a workspace-relative path should be excluded.
    ///
    /// `is_dir` applies the trailing-`/` rule to the path itself; ancestor
    /// directories are always eligible for dir-only patterns, so contents of
    /// an ignored directory are ignored too.
    pub fn should_ignore(&self, rel_path: &str, is_dir: bool) -> bool {
        let rel = rel_path.trim_start_matches("./").replace('\\', "/");
        if rel.is_empty() {
            return false;
        }

        for pat in &self.patterns {
            // Negations are recorded but deliberately inert.
            if pat.negated {
                continue;
            }
            if pattern_hits(pat, &rel, is_dir) {
                return true;
            }
        }
        false
    }
}

fn pattern_hits(pat: &IgnorePattern, rel: &str, is_dir: bool) -> bool {
    // The path itself.
    if (!pat.dir_only || is_dir) && matches_target(pat, rel) {
        return true;
    }
    // Ancestor directories: matching any one of them covers the contents.
    let mut idx = 0;
    while let Some(pos) = rel[idx..].find('/') {
        let ancestor = &rel[..idx + pos];
        if matches_target(pat, ancestor) {
            return true;
        }
        idx += pos + 1;
    }
    false
}

fn matches_target(pat: &IgnorePattern, target: &str) -> bool {
    if pat.basename {
        let base = target.rsplit('/').next().unwrap_or(target);
        pat.matcher.is_match(base)
    } else {
        pat.matcher.is_match(target)
    }
}

fn parse_ignore_file(out: &mut Vec<IgnorePattern>, text: &str) {
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        push_pattern(out, line);
    }
}

fn push_pattern(out: &mut Vec<IgnorePattern>, raw: &str) {
    let mut body = raw;
    let negated = body.starts_with('!');
    if negated {
        body = &body[1..];
    }
    let dir_only = body.ends_with('/');
    if dir_only {
        body = &body[..body.len() - 1];
    }
    let anchored = body.starts_with('/');
    if anchored {
        body = &body[1..];
    }
    if body.is_empty() {
        return;
    }

    let basename = !anchored && !body.contains('/');
    let glob_src = if basename || anchored {
        body.to_string()
    } else {
        // Unanchored path patterns may match at any depth.
        format!("**/{body}")
    };

    let compiled = GlobBuilder::new(&glob_src)
        .literal_separator(!basename)
        .build()
        .or_else(|_| Glob::new(&glob_src));
    match compiled {
        Ok(glob) => out.push(IgnorePattern {
            raw: raw.to_string(),
            negated,
            dir_only,
            basename,
            matcher: glob.compile_matcher(),
        }),
        Err(e) => warn!(pattern = raw, error = %e, "skipping unparseable ignore pattern"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn set_with(lines: &str) -> IgnoreSet {
        let ws = TempDir::new().unwrap();
        std::fs::write(ws.path().join(".gitignore"), lines).unwrap();
        IgnoreSet::load(ws.path())
    }

    #[test]
    fn builtin_dirs_and_contents_ignored() {
        let set = IgnoreSet::builtin();
        assert!(set.should_ignore("node_modules", true));
        assert!(set.should_ignore("node_modules/react/index.js", false));
        assert!(set.should_ignore("src/vendor/lib.js", false));
        assert!(!set.should_ignore("src/main.rs", false));
    }

    #[test]
    fn trailing_slash_requires_directory() {
        let set = set_with("logs/\n");
        assert!(set.should_ignore("logs", true));
        assert!(set.should_ignore("logs/a.txt", false));
        assert!(!set.should_ignore("logs", false));
    }

    #[test]
    fn leading_slash_anchors_to_root() {
        let set = set_with("/generated\n");
        assert!(set.should_ignore("generated", true));
        assert!(!set.should_ignore("src/generated", true));
    }

    #[test]
    fn slashless_matches_basename_anywhere() {
        let set = set_with("secrets.txt\n");
        assert!(set.should_ignore("secrets.txt", false));
        assert!(set.should_ignore("deep/nested/secrets.txt", false));
    }

    #[test]
    fn double_star_crosses_separators() {
        let set = set_with("docs/**/*.pdf\n");
        assert!(set.should_ignore("docs/a/b/c.pdf", false));
        assert!(!set.should_ignore("docs/a/b/c.md", false));
    }

    #[test]
    fn negations_match_nothing() {
        let set = set_with("*.log\n!keep.log\n");
        assert!(set.should_ignore("keep.log", false));
    }

    #[test]
    fn comments_and_blanks_skipped() {
        let set = set_with("# comment\n\n*.bak\n");
        assert!(set.should_ignore("a.bak", false));
        assert!(!set.should_ignore("#", false));
    }

    #[test]
    fn contextignore_is_additive() {
        let ws = TempDir::new().unwrap();
        std::fs::write(ws.path().join(".gitignore"), "*.log\n").unwrap();
        std::fs::write(ws.path().join(".contextignore"), "*.generated.ts\n").unwrap();
        let set = IgnoreSet::load(ws.path());
        assert!(set.should_ignore("a.log", false));
        assert!(set.should_ignore("src/x.generated.ts", false));
    }
}
