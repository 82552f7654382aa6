//! Extended unified-diff parser.
//!
//! Features:
//! - Works even when `diff --git` / `---` / `+++` headers are missing
//!   (hunks-only input lands in one unnamed file).
//! - Ignores `\ No newline at end of file` marker lines.
//! - Flags binary patches (`GIT binary patch`, `Binary files ... differ`).
//!
//! `old_line` is initialized from the hunk's `old_start` and `new_line` from
//! `new_start`, advancing per line kind.

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiffLine {
    Added { new_line: usize, content: String },
    Removed { old_line: usize, content: String },
    Context {
        old_line: usize,
        new_line: usize,
        content: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffHunk {
    pub old_start: usize,
    pub old_lines: usize,
    pub new_start: usize,
    pub new_lines: usize,
    pub lines: Vec<DiffLine>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileDiff {
    /// New-side path when present, else the old side.
    pub path: String,
    pub old_path: Option<String>,
    pub hunks: Vec<DiffHunk>,
    pub is_binary: bool,
    pub is_new: bool,
    pub is_deleted: bool,
}

impl FileDiff {
    fn empty(path: String) -> Self {
        Self {
            path,
            old_path: None,
            hunks: Vec::new(),
            is_binary: false,
            is_new: false,
            is_deleted: false,
        }
    }

    /// Added lines with their new-side line numbers.
    pub fn added_lines(&self) -> impl Iterator<Item = (usize, &str)> {
        self.hunks.iter().flat_map(|h| {
            h.lines.iter().filter_map(|l| match l {
                DiffLine::Added { new_line, content } => Some((*new_line, content.as_str())),
                _ => None,
            })
        })
    }

    /// All hunk lines (added, removed, context) with a representative
    /// new-side line number.
    pub fn hunk_lines(&self) -> impl Iterator<Item = (usize, &str)> {
        self.hunks.iter().flat_map(|h| {
            h.lines.iter().map(|l| match l {
                DiffLine::Added { new_line, content } => (*new_line, content.as_str()),
                DiffLine::Removed { old_line, content } => (*old_line, content.as_str()),
                DiffLine::Context {
                    new_line, content, ..
                } => (*new_line, content.as_str()),
            })
        })
    }

    pub fn added_count(&self) -> usize {
        self.hunks
            .iter()
            .flat_map(|h| &h.lines)
            .filter(|l| matches!(l, DiffLine::Added { .. }))
            .count()
    }

    pub fn removed_count(&self) -> usize {
        self.hunks
            .iter()
            .flat_map(|h| &h.lines)
            .filter(|l| matches!(l, DiffLine::Removed { .. }))
            .count()
    }

    /// Re-render this file's diff as unified-diff text.
    pub fn render(&self) -> String {
        let old = self.old_path.as_deref().unwrap_or(&self.path);
        let mut out = format!("--- a/{old}\n+++ b/{}\n", self.path);
        for hunk in &self.hunks {
            out.push_str(&format!(
                "@@ -{},{} +{},{} @@\n",
                hunk.old_start, hunk.old_lines, hunk.new_start, hunk.new_lines
            ));
            for line in &hunk.lines {
                match line {
                    DiffLine::Added { content, .. } => out.push_str(&format!("+{content}\n")),
                    DiffLine::Removed { content, .. } => out.push_str(&format!("-{content}\n")),
                    DiffLine::Context { content, .. } => out.push_str(&format!(" {content}\n")),
                }
            }
        }
        out
    }
}

/// Parse a unified diff into per-file hunks.
pub fn parse_unified_diff(input: &str) -> Vec<FileDiff> {
    let mut files: Vec<FileDiff> = Vec::new();
    let mut current: Option<FileDiff> = None;
    let mut hunk: Option<DiffHunk> = None;
    let mut old_line = 0usize;
    let mut new_line = 0usize;

    let flush_hunk = |current: &mut Option<FileDiff>, hunk: &mut Option<DiffHunk>| {
        if let (Some(file), Some(h)) = (current.as_mut(), hunk.take()) {
            if !h.lines.is_empty() {
                file.hunks.push(h);
            }
        }
    };
    let flush_file = |files: &mut Vec<FileDiff>, current: &mut Option<FileDiff>| {
        if let Some(file) = current.take() {
            if !file.hunks.is_empty() || file.is_binary || file.is_new || file.is_deleted {
                files.push(file);
            }
        }
    };

    for line in input.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            flush_hunk(&mut current, &mut hunk);
            flush_file(&mut files, &mut current);
            current = Some(FileDiff::empty(git_header_path(rest)));
            continue;
        }
        if let Some(rest) = line.strip_prefix("--- ") {
            flush_hunk(&mut current, &mut hunk);
            let file = current.get_or_insert_with(|| FileDiff::empty(String::new()));
            if rest.trim() == "/dev/null" {
                file.is_new = true;
            } else {
                file.old_path = Some(strip_prefix_marker(rest));
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("+++ ") {
            let file = current.get_or_insert_with(|| FileDiff::empty(String::new()));
            if rest.trim() == "/dev/null" {
                file.is_deleted = true;
                if file.path.is_empty() {
                    file.path = file.old_path.clone().unwrap_or_default();
                }
            } else {
                file.path = strip_prefix_marker(rest);
            }
            continue;
        }
        if line.starts_with("Binary files ") || line.contains("GIT binary patch") {
            let file = current.get_or_insert_with(|| FileDiff::empty(String::new()));
            file.is_binary = true;
            continue;
        }
        if line.starts_with("@@") {
            flush_hunk(&mut current, &mut hunk);
            let Some((o_start, o_len, n_start, n_len)) = parse_hunk_header(line) else {
                continue;
            };
            current.get_or_insert_with(|| FileDiff::empty("unknown".into()));
            old_line = o_start;
            new_line = n_start;
            hunk = Some(DiffHunk {
                old_start: o_start,
                old_lines: o_len,
                new_start: n_start,
                new_lines: n_len,
                lines: Vec::new(),
            });
            continue;
        }
        // Marker lines are not diff content.
        if line.starts_with('\\') {
            continue;
        }
        let Some(h) = hunk.as_mut() else {
            continue;
        };
        if let Some(rest) = line.strip_prefix('+') {
            h.lines.push(DiffLine::Added {
                new_line,
                content: rest.to_string(),
            });
            new_line += 1;
        } else if let Some(rest) = line.strip_prefix('-') {
            h.lines.push(DiffLine::Removed {
                old_line,
                content: rest.to_string(),
            });
            old_line += 1;
        } else {
            let content = line.strip_prefix(' ').unwrap_or(line);
            h.lines.push(DiffLine::Context {
                old_line,
                new_line,
                content: content.to_string(),
            });
            old_line += 1;
            new_line += 1;
        }
    }
    flush_hunk(&mut current, &mut hunk);
    flush_file(&mut files, &mut current);
    files
}

/// `a/x b/x` → `x` (new side).
fn git_header_path(rest: &str) -> String {
    rest.split_whitespace()
        .last()
        .map(strip_prefix_marker)
        .unwrap_or_default()
}

fn strip_prefix_marker(path: &str) -> String {
    let p = path.trim();
    p.strip_prefix("a/")
        .or_else(|| p.strip_prefix("b/"))
        .unwrap_or(p)
        .to_string()
}

/// `@@ -a,b +c,d @@ …` → `(a, b, c, d)`; omitted counts default to 1.
fn parse_hunk_header(line: &str) -> Option<(usize, usize, usize, usize)> {
    let inner = line.trim_start_matches('@').trim_end();
    let inner = match inner.find("@@") {
        Some(i) => &inner[..i],
        None => inner,
    };
    let mut old = None;
    let mut new = None;
    for token in inner.split_whitespace() {
        if let Some(nums) = token.strip_prefix('-') {
            old = Some(split_nums(nums));
        } else if let Some(nums) = token.strip_prefix('+') {
            new = Some(split_nums(nums));
        }
    }
    let (o_start, o_len) = old?;
    let (n_start, n_len) = new?;
    Some((o_start, o_len, n_start, n_len))
}

/// `"12,7"` → `(12, 7)`, `"12"` → `(12, 1)`.
fn split_nums(s: &str) -> (usize, usize) {
    match s.split_once(',') {
        Some((a, b)) => (a.parse().unwrap_or(0), b.parse().unwrap_or(0)),
        None => (s.parse().unwrap_or(0), 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = "\
diff --git a/src/lib.rs b/src/lib.rs
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -10,3 +10,4 @@ fn context() {
 unchanged
-removed line
+added line
+another added
";

    #[test]
    fn parses_file_and_hunk_numbers() {
        let files = parse_unified_diff(SIMPLE);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "src/lib.rs");

        let hunk = &files[0].hunks[0];
        assert_eq!((hunk.old_start, hunk.new_start), (10, 10));

        let added: Vec<(usize, &str)> = files[0].added_lines().collect();
        assert_eq!(added, vec![(11, "added line"), (12, "another added")]);
        assert_eq!(files[0].removed_count(), 1);
    }

    #[test]
    fn handles_hunks_only_input() {
        let input = "@@ -1,2 +1,2 @@\n-old\n+new\n context\n";
        let files = parse_unified_diff(input);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "unknown");
        assert_eq!(files[0].added_count(), 1);
    }

    #[test]
    fn multiple_files_split_correctly() {
        let input = format!("{SIMPLE}diff --git a/b.rs b/b.rs\n--- a/b.rs\n+++ b/b.rs\n@@ -1 +1 @@\n-x\n+y\n");
        let files = parse_unified_diff(&input);
        assert_eq!(files.len(), 2);
        assert_eq!(files[1].path, "b.rs");
        // Omitted count defaults to 1.
        assert_eq!(files[1].hunks[0].old_lines, 1);
    }

    #[test]
    fn new_and_deleted_files_flagged() {
        let new_file = "--- /dev/null\n+++ b/new.rs\n@@ -0,0 +1 @@\n+hello\n";
        let files = parse_unified_diff(new_file);
        assert!(files[0].is_new);
        assert_eq!(files[0].path, "new.rs");

        let deleted = "--- a/gone.rs\n+++ /dev/null\n@@ -1 +0,0 @@\n-bye\n";
        let files = parse_unified_diff(deleted);
        assert!(files[0].is_deleted);
        assert_eq!(files[0].path, "gone.rs");
    }

    #[test]
    fn no_newline_marker_ignored() {
        let input = "--- a/a.rs\n+++ b/a.rs\n@@ -1 +1 @@\n-x\n+y\n\\ No newline at end of file\n";
        let files = parse_unified_diff(input);
        assert_eq!(files[0].hunks[0].lines.len(), 2);
    }

    #[test]
    fn binary_patch_flagged() {
        let input = "diff --git a/img.png b/img.png\nBinary files a/img.png and b/img.png differ\n";
        let files = parse_unified_diff(input);
        assert!(files[0].is_binary);
        assert!(files[0].hunks.is_empty());
    }
}
