//! Permissive parser for the engine's formatted search output.
//!
//! Two observed shapes are handled:
//! 1. `Path: <p>` header, optional `Lines: a-b` and `Score: s`, then content
//!    until the next `Path:` header.
//! 2. Markdown `## <p>` headings with fenced code blocks.
//!
//! Decorative line-number prefixes (`  12 | code`, `12: code`) are stripped
//! while their numeric extents are preserved as the line range.

use chrono::Utc;
use regex::Regex;
use std::sync::OnceLock;

use crate::types::{MatchType, SearchResult};

fn line_number_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d+)\s*[|:]\s?").expect("valid regex"))
}

/// Parse raw engine output into structured results.
///
/// `top_k` drives the relevance fallback `1 − i/top_k` for blocks without an
/// explicit score; the fallback is monotone and never negative.
pub fn parse_engine_output(raw: &str, top_k: usize) -> Vec<SearchResult> {
    let blocks = if raw.lines().any(|l| l.trim_start().starts_with("Path: ")) {
        split_path_blocks(raw)
    } else {
        split_markdown_blocks(raw)
    };

    let now = Utc::now();
    let top_k = top_k.max(1);
    let mut out = Vec::with_capacity(blocks.len());

    for (i, block) in blocks.into_iter().enumerate() {
        let (content, extents) = strip_line_prefixes(&block.content);
        if content.trim().is_empty() {
            continue;
        }
        let relevance = block
            .score
            .unwrap_or(1.0 - i as f32 / top_k as f32)
            .clamp(0.0, 1.0);
        out.push(SearchResult {
            path: block.path,
            content,
            line_range: block.lines.or(extents),
            relevance,
            match_type: MatchType::Semantic,
            retrieved_at: now,
        });
    }
    out
}

struct RawBlock {
    path: String,
    lines: Option<(usize, usize)>,
    score: Option<f32>,
    content: String,
}

fn split_path_blocks(raw: &str) -> Vec<RawBlock> {
    let mut blocks: Vec<RawBlock> = Vec::new();
    let mut current: Option<RawBlock> = None;

    for line in raw.lines() {
        let trimmed = line.trim_start();
        if let Some(path) = trimmed.strip_prefix("Path: ") {
            if let Some(b) = current.take() {
                blocks.push(b);
            }
            current = Some(RawBlock {
                path: path.trim().to_string(),
                lines: None,
                score: None,
                content: String::new(),
            });
            continue;
        }
        let Some(block) = current.as_mut() else {
            continue;
        };
        if let Some(rest) = trimmed.strip_prefix("Lines: ") {
            block.lines = parse_extent(rest);
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("Score: ") {
            block.score = rest.trim().parse::<f32>().ok();
            continue;
        }
        block.content.push_str(line);
        block.content.push('\n');
    }
    if let Some(b) = current.take() {
        blocks.push(b);
    }
    blocks
}

fn split_markdown_blocks(raw: &str) -> Vec<RawBlock> {
    let mut blocks: Vec<RawBlock> = Vec::new();
    let mut current: Option<RawBlock> = None;
    let mut in_fence = false;

    for line in raw.lines() {
        let trimmed = line.trim_start();
        if !in_fence {
            if let Some(path) = trimmed.strip_prefix("## ") {
                if let Some(b) = current.take() {
                    blocks.push(b);
                }
                current = Some(RawBlock {
                    path: path.trim().to_string(),
                    lines: None,
                    score: None,
                    content: String::new(),
                });
                continue;
            }
        }
        if trimmed.starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            if let Some(block) = current.as_mut() {
                block.content.push_str(line);
                block.content.push('\n');
            }
        }
    }
    if let Some(b) = current.take() {
        blocks.push(b);
    }
    blocks
}

fn parse_extent(s: &str) -> Option<(usize, usize)> {
    let (a, b) = s.trim().split_once('-')?;
    let start = a.trim().parse().ok()?;
    let end = b.trim().parse().ok()?;
    if start == 0 || end < start {
        return None;
    }
    Some((start, end))
}

/// Strip per-line number prefixes, returning the clean text plus the numeric
/// extent they spanned. Only strips when every non-empty line carries one, so
/// code that legitimately starts with digits survives.
fn strip_line_prefixes(content: &str) -> (String, Option<(usize, usize)>) {
    let re = line_number_prefix_re();
    let lines: Vec<&str> = content.lines().collect();
    let numbered: Vec<Option<usize>> = lines
        .iter()
        .map(|l| {
            re.captures(l)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse().ok())
        })
        .collect();

    let nonempty = lines.iter().filter(|l| !l.trim().is_empty()).count();
    let prefixed = numbered.iter().filter(|n| n.is_some()).count();
    if nonempty == 0 || prefixed < nonempty {
        return (content.to_string(), None);
    }

    let first = numbered.iter().flatten().min().copied();
    let last = numbered.iter().flatten().max().copied();
    let cleaned = lines
        .iter()
        .map(|l| re.replace(l, "").into_owned())
        .collect::<Vec<_>>()
        .join("\n");
    let extent = match (first, last) {
        (Some(a), Some(b)) => Some((a, b)),
        _ => None,
    };
    (cleaned, extent)
}
