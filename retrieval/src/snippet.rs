//! Smart snippet extraction under a token budget.
//!
//! When raw content fits, it is kept verbatim. Otherwise lines are ranked by
//! structural priority (declarations, imports, doc comments, other), selected
//! until the budget is exhausted, restored to original order, and omitted
//! gaps are marked.

use crate::types::{CodeType, estimate_tokens};

/// Marker inserted at each boundary where lines were omitted.
pub const OMISSION_MARKER: &str = "// … (lines omitted) …";

/// Extract up to `budget_tokens` worth of `content`.
///
/// Returns the text and whether anything was omitted.
pub fn smart_extract(content: &str, budget_tokens: usize) -> (String, bool) {
    if estimate_tokens(content) <= budget_tokens {
        return (content.to_string(), false);
    }

    let lines: Vec<&str> = content.lines().collect();
    let mut ranked: Vec<(u8, usize)> = lines
        .iter()
        .enumerate()
        .map(|(i, l)| (line_priority(l), i))
        .collect();
    ranked.sort();

    let mut selected: Vec<usize> = Vec::new();
    let mut used = 0usize;
    for (_, idx) in ranked {
        let cost = estimate_tokens(lines[idx]).max(1);
        if used + cost > budget_tokens {
            continue;
        }
        used += cost;
        selected.push(idx);
    }
    selected.sort_unstable();

    let mut out = String::new();
    let mut prev: Option<usize> = None;
    for idx in &selected {
        match prev {
            Some(p) if idx - p > 1 => {
                out.push_str(OMISSION_MARKER);
                out.push('\n');
            }
            None if *idx > 0 => {
                out.push_str(OMISSION_MARKER);
                out.push('\n');
            }
            _ => {}
        }
        out.push_str(lines[*idx]);
        out.push('\n');
        prev = Some(*idx);
    }
    if selected.last().is_some_and(|&l| l + 1 < lines.len()) {
        out.push_str(OMISSION_MARKER);
        out.push('\n');
    }
    (out, true)
}

/// Priority classes: declarations first, then imports, doc comments, other
/// text, blank lines last.
fn line_priority(line: &str) -> u8 {
    let t = line.trim_start();
    if t.is_empty() {
        return 4;
    }
    const DECL: &[&str] = &[
        "pub fn ", "fn ", "function ", "async fn ", "async function ", "class ", "interface ",
        "type ", "export ", "def ", "impl ", "struct ", "enum ", "trait ", "pub struct ",
        "pub enum ", "pub trait ",
    ];
    if DECL.iter().any(|p| t.starts_with(p)) {
        return 0;
    }
    const IMPORT: &[&str] = &["import ", "use ", "require(", "from ", "#include", "const "];
    if IMPORT.iter().any(|p| t.starts_with(p)) {
        return 1;
    }
    if t.starts_with("///")
        || t.starts_with("//!")
        || t.starts_with("/**")
        || t.starts_with("* ")
        || t.starts_with("//")
        || t.starts_with('#')
    {
        return 2;
    }
    3
}

/// Coarse shape detection from the dominant declaration in a snippet.
pub fn detect_code_type(text: &str) -> CodeType {
    for line in text.lines() {
        let t = line.trim_start();
        if t.starts_with("class ") || t.starts_with("export class ") || t.starts_with("pub struct ")
            || t.starts_with("struct ")
        {
            return CodeType::Class;
        }
        if t.starts_with("interface ") || t.starts_with("export interface ")
            || t.starts_with("trait ") || t.starts_with("pub trait ")
        {
            return CodeType::Interface;
        }
        if t.starts_with("type ") || t.starts_with("export type ") || t.starts_with("enum ")
            || t.starts_with("pub enum ")
        {
            return CodeType::TypeDef;
        }
        if t.starts_with("fn ") || t.starts_with("pub fn ") || t.starts_with("function ")
            || t.starts_with("export function ") || t.starts_with("def ")
            || t.starts_with("async fn ") || t.starts_with("async function ")
        {
            return CodeType::Function;
        }
    }
    let first = text.trim_start();
    if first.starts_with("import ") || first.starts_with("use ") {
        return CodeType::Import;
    }
    if first.starts_with("///") || first.starts_with("/**") || first.starts_with("//!") {
        return CodeType::Doc;
    }
    CodeType::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbatim_when_it_fits() {
        let content = "fn short() {}\n";
        let (text, cut) = smart_extract(content, 100);
        assert_eq!(text, content);
        assert!(!cut);
    }

    #[test]
    fn keeps_declarations_when_cutting() {
        let mut content = String::from("fn keep_me() {\n");
        for i in 0..200 {
            content.push_str(&format!("    let filler_{i} = {i};\n"));
        }
        content.push_str("}\n");

        let (text, cut) = smart_extract(&content, 30);
        assert!(cut);
        assert!(text.contains("fn keep_me()"));
        assert!(text.contains(OMISSION_MARKER));
        assert!(estimate_tokens(&text) <= 30 + estimate_tokens(OMISSION_MARKER) * 4);
    }

    #[test]
    fn restores_original_order() {
        let content = "use std::fmt;\nfn a() {}\nlet x = 1;\nfn b() {}\n";
        let (text, _) = smart_extract(content, 8);
        let a_pos = text.find("fn a").unwrap_or(usize::MAX);
        let b_pos = text.find("fn b").unwrap_or(usize::MAX);
        assert!(a_pos < b_pos);
    }

    #[test]
    fn detects_code_types() {
        assert_eq!(detect_code_type("class Foo {\n}"), CodeType::Class);
        assert_eq!(detect_code_type("interface Foo {}"), CodeType::Interface);
        assert_eq!(detect_code_type("pub fn run() {}"), CodeType::Function);
        assert_eq!(detect_code_type("type Alias = u32;"), CodeType::TypeDef);
        assert_eq!(detect_code_type("import x from 'y';"), CodeType::Import);
        assert_eq!(detect_code_type("some plain text"), CodeType::Other);
    }
}
