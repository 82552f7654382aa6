//! Invariants engine: YAML-declared patterns evaluated against changed text.
//!
//! `/.review-invariants.yml` groups rules by category; each rule carries
//! `{id, paths, severity, action}` with actions:
//! - `deny { pattern }` — any match in changed text is a finding.
//! - `when_require { when, require }` — `when` matched without `require` is
//!   a finding.
//! - `warn { pattern }` — match emits an advisory (non-blocking) finding.
//!
//! A rule with an unparseable regex is collected as a warning, never raised;
//! the rest of the file still runs.

use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::ReviewError;
use crate::parser::FileDiff;
use crate::types::{Finding, FindingSource, Severity};

pub const INVARIANTS_FILE: &str = ".review-invariants.yml";

#[derive(Debug, Deserialize)]
struct RawRule {
    id: String,
    #[serde(default)]
    paths: Vec<String>,
    #[serde(default)]
    severity: Option<String>,
    action: String,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    when: Option<String>,
    #[serde(default)]
    require: Option<String>,
}

enum CompiledAction {
    Deny(Regex),
    WhenRequire { when: Regex, require: Regex },
    Warn(Regex),
}

struct CompiledRule {
    id: String,
    category: String,
    severity: Severity,
    globs: GlobSet,
    action: CompiledAction,
}

/// Outcome of one invariants evaluation.
pub struct InvariantsReport {
    pub findings: Vec<Finding>,
    /// Per-rule recoverable problems (bad regex, bad glob).
    pub warnings: Vec<String>,
    /// Rules actually evaluated.
    pub executed: usize,
}

/// Loaded rule set for one workspace.
pub struct InvariantsEngine {
    rules: Vec<CompiledRule>,
    warnings: Vec<String>,
}

impl InvariantsEngine {
    /// Load `/.review-invariants.yml`; a missing file yields an empty engine.
    pub fn load(workspace_root: &Path) -> Result<Self, ReviewError> {
        let path = workspace_root.join(INVARIANTS_FILE);
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self {
                    rules: Vec::new(),
                    warnings: Vec::new(),
                });
            }
            Err(e) => return Err(ReviewError::InvariantFile(e.to_string())),
        };
        Self::parse(&text)
    }

    /// Parse YAML grouped by category.
    pub fn parse(text: &str) -> Result<Self, ReviewError> {
        let grouped: std::collections::BTreeMap<String, Vec<RawRule>> =
            serde_yml::from_str(text).map_err(|e| ReviewError::InvariantFile(e.to_string()))?;

        let mut rules = Vec::new();
        let mut warnings = Vec::new();
        for (category, raw_rules) in grouped {
            for raw in raw_rules {
                match compile_rule(&category, raw) {
                    Ok(rule) => rules.push(rule),
                    Err(e) => {
                        warn!(error = %e, "skipping invalid invariant");
                        warnings.push(e.to_string());
                    }
                }
            }
        }
        debug!(rules = rules.len(), warnings = warnings.len(), "invariants loaded");
        Ok(Self { rules, warnings })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Evaluate all rules against the parsed diff.
    ///
    /// With `changed_lines_only` (the default) only added lines are in
    /// scope; otherwise all hunk lines are.
    pub fn evaluate(&self, files: &[FileDiff], changed_lines_only: bool) -> InvariantsReport {
        let mut findings = Vec::new();

        for rule in &self.rules {
            for file in files {
                if !rule.globs.is_empty() && !rule.globs.is_match(&file.path) {
                    continue;
                }
                let lines: Vec<(usize, &str)> = if changed_lines_only {
                    file.added_lines().collect()
                } else {
                    file.hunk_lines().collect()
                };
                if lines.is_empty() {
                    continue;
                }

                match &rule.action {
                    CompiledAction::Deny(pattern) => {
                        for (line, content) in &lines {
                            if pattern.is_match(content) {
                                findings.push(rule_finding(rule, file, *line, content, false));
                            }
                        }
                    }
                    CompiledAction::Warn(pattern) => {
                        for (line, content) in &lines {
                            if pattern.is_match(content) {
                                findings.push(rule_finding(rule, file, *line, content, true));
                            }
                        }
                    }
                    CompiledAction::WhenRequire { when, require } => {
                        let scope: String = lines
                            .iter()
                            .map(|(_, c)| *c)
                            .collect::<Vec<_>>()
                            .join("\n");
                        if when.is_match(&scope) && !require.is_match(&scope) {
                            let (line, content) = lines
                                .iter()
                                .find(|(_, c)| when.is_match(c))
                                .copied()
                                .unwrap_or(lines[0]);
                            findings.push(rule_finding(rule, file, line, content, false));
                        }
                    }
                }
            }
        }

        InvariantsReport {
            findings,
            warnings: self.warnings.clone(),
            executed: self.rules.len(),
        }
    }
}

fn rule_finding(
    rule: &CompiledRule,
    file: &FileDiff,
    line: usize,
    content: &str,
    advisory: bool,
) -> Finding {
    let mut f = Finding::new(
        rule.id.clone(),
        rule.category.clone(),
        rule.severity,
        0.9,
        file.path.clone(),
        line,
        line,
        format!("invariant {} violated", rule.id),
        match &rule.action {
            CompiledAction::WhenRequire { .. } => {
                format!("`when` pattern matched without the required counterpart ({})", rule.id)
            }
            _ => format!("changed text matches denied pattern ({})", rule.id),
        },
        FindingSource::Invariant,
    );
    f.code_snippet = Some(content.trim().to_string());
    f.advisory = advisory;
    f
}

fn compile_rule(category: &str, raw: RawRule) -> Result<CompiledRule, ReviewError> {
    let compile = |pattern: &Option<String>, what: &str| -> Result<Regex, ReviewError> {
        let pat = pattern.as_deref().ok_or_else(|| ReviewError::PatternInvalid {
            id: raw.id.clone(),
            error: format!("missing {what}"),
        })?;
        Regex::new(pat).map_err(|e| ReviewError::PatternInvalid {
            id: raw.id.clone(),
            error: e.to_string(),
        })
    };

    let action = match raw.action.as_str() {
        "deny" => CompiledAction::Deny(compile(&raw.pattern, "pattern")?),
        "warn" => CompiledAction::Warn(compile(&raw.pattern, "pattern")?),
        "when_require" => CompiledAction::WhenRequire {
            when: compile(&raw.when, "when")?,
            require: compile(&raw.require, "require")?,
        },
        other => {
            return Err(ReviewError::PatternInvalid {
                id: raw.id.clone(),
                error: format!("unknown action `{other}`"),
            });
        }
    };

    let mut builder = GlobSetBuilder::new();
    for g in &raw.paths {
        let glob = Glob::new(g).map_err(|e| ReviewError::PatternInvalid {
            id: raw.id.clone(),
            error: e.to_string(),
        })?;
        builder.add(glob);
    }
    let globs = builder
        .build()
        .map_err(|e| ReviewError::PatternInvalid {
            id: raw.id.clone(),
            error: e.to_string(),
        })?;

    let severity = raw
        .severity
        .as_deref()
        .and_then(Severity::parse)
        .unwrap_or(Severity::Medium);

    Ok(CompiledRule {
        id: raw.id,
        category: category.to_string(),
        severity,
        globs,
        action,
    })
}
