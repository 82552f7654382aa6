//! Human-readable memory store: one markdown file per category under
//! `.memories/`, records separated by `---` with H2 titles. Append-only.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Maximum characters per memory record.
pub const MAX_CONTENT_CHARS: usize = 5_000;

pub const MEMORIES_DIR: &str = ".memories";

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("memory content exceeds {MAX_CONTENT_CHARS} characters ({0})")]
    ContentTooLong(usize),

    #[error("unknown memory category: {0}")]
    UnknownCategory(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryCategory {
    Preferences,
    Decisions,
    Facts,
}

impl MemoryCategory {
    pub const ALL: [MemoryCategory; 3] = [
        MemoryCategory::Preferences,
        MemoryCategory::Decisions,
        MemoryCategory::Facts,
    ];

    pub fn parse(s: &str) -> Result<Self, MemoryError> {
        match s.to_ascii_lowercase().as_str() {
            "preferences" => Ok(Self::Preferences),
            "decisions" => Ok(Self::Decisions),
            "facts" => Ok(Self::Facts),
            other => Err(MemoryError::UnknownCategory(other.to_string())),
        }
    }

    fn file_name(self) -> &'static str {
        match self {
            Self::Preferences => "preferences.md",
            Self::Decisions => "decisions.md",
            Self::Facts => "facts.md",
        }
    }
}

impl fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Preferences => "preferences",
            Self::Decisions => "decisions",
            Self::Facts => "facts",
        };
        f.write_str(s)
    }
}

/// One parsed memory record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub category: MemoryCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Store rooted at `<workspace>/.memories/`.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    dir: PathBuf,
}

impl MemoryStore {
    pub fn new(workspace_root: &Path) -> Self {
        Self {
            dir: workspace_root.join(MEMORIES_DIR),
        }
    }

    /// Append one record to its category file.
    pub fn add(
        &self,
        category: MemoryCategory,
        title: Option<&str>,
        content: &str,
    ) -> Result<MemoryRecord, MemoryError> {
        let chars = content.chars().count();
        if chars > MAX_CONTENT_CHARS {
            return Err(MemoryError::ContentTooLong(chars));
        }
        std::fs::create_dir_all(&self.dir)?;

        let record = MemoryRecord {
            category,
            title: title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()),
            content: content.trim().to_string(),
            timestamp: Utc::now(),
        };

        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.dir.join(category.file_name()))?;
        let heading = record.title.as_deref().unwrap_or("Untitled");
        write!(
            file,
            "## {heading}\n\n_{}_\n\n{}\n\n---\n\n",
            record.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            record.content
        )?;
        file.flush()?;
        debug!(category = %category, "memory appended");
        Ok(record)
    }

    /// All records, youngest first. `category` narrows to one file.
    pub fn list(&self, category: Option<MemoryCategory>) -> Result<Vec<MemoryRecord>, MemoryError> {
        let categories: Vec<MemoryCategory> = match category {
            Some(c) => vec![c],
            None => MemoryCategory::ALL.to_vec(),
        };

        let mut out = Vec::new();
        for cat in categories {
            let path = self.dir.join(cat.file_name());
            let Ok(text) = std::fs::read_to_string(&path) else {
                continue;
            };
            out.extend(parse_records(cat, &text));
        }
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(out)
    }

    /// Hint lines for records whose title or content mentions the query.
    /// Surfaced by the context bundler next to code hints.
    pub fn matching_hints(&self, query: &str) -> Vec<String> {
        let needle = query.to_lowercase();
        let Ok(records) = self.list(None) else {
            return Vec::new();
        };
        records
            .into_iter()
            .filter(|r| {
                r.content.to_lowercase().contains(&needle)
                    || r.title
                        .as_deref()
                        .is_some_and(|t| t.to_lowercase().contains(&needle))
            })
            .take(3)
            .map(|r| {
                let label = r.title.unwrap_or_else(|| preview(&r.content));
                format!("memory ({}): {label}", r.category)
            })
            .collect()
    }
}

fn preview(content: &str) -> String {
    let first = content.lines().next().unwrap_or("");
    if first.chars().count() <= 60 {
        first.to_string()
    } else {
        first.chars().take(60).collect::<String>() + "…"
    }
}

fn parse_records(category: MemoryCategory, text: &str) -> Vec<MemoryRecord> {
    let mut out = Vec::new();
    for chunk in text.split("\n---\n") {
        let chunk = chunk.trim();
        if chunk.is_empty() {
            continue;
        }
        let mut title = None;
        let mut timestamp = None;
        let mut body = Vec::new();
        for line in chunk.lines() {
            let trimmed = line.trim();
            if title.is_none() && body.is_empty() {
                if let Some(t) = trimmed.strip_prefix("## ") {
                    title = Some(t.to_string()).filter(|t| t != "Untitled");
                    continue;
                }
            }
            if timestamp.is_none()
                && trimmed.starts_with('_')
                && trimmed.ends_with('_')
                && trimmed.len() > 2
            {
                if let Ok(ts) = DateTime::parse_from_rfc3339(&trimmed[1..trimmed.len() - 1]) {
                    timestamp = Some(ts.with_timezone(&Utc));
                    continue;
                }
            }
            body.push(line);
        }
        let content = body.join("\n").trim().to_string();
        if content.is_empty() && title.is_none() {
            continue;
        }
        out.push(MemoryRecord {
            category,
            title,
            content,
            timestamp: timestamp.unwrap_or_else(Utc::now),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn add_and_list_round_trip() {
        let ws = TempDir::new().unwrap();
        let store = MemoryStore::new(ws.path());
        store
            .add(MemoryCategory::Preferences, Some("Indent"), "Use 4 spaces.")
            .unwrap();
        store
            .add(MemoryCategory::Facts, None, "The API lives in src/api.")
            .unwrap();

        let all = store.list(None).unwrap();
        assert_eq!(all.len(), 2);
        // Youngest first.
        assert_eq!(all[0].category, MemoryCategory::Facts);

        let prefs = store.list(Some(MemoryCategory::Preferences)).unwrap();
        assert_eq!(prefs.len(), 1);
        assert_eq!(prefs[0].title.as_deref(), Some("Indent"));
        assert_eq!(prefs[0].content, "Use 4 spaces.");
    }

    #[test]
    fn content_cap_enforced() {
        let ws = TempDir::new().unwrap();
        let store = MemoryStore::new(ws.path());
        let long = "x".repeat(MAX_CONTENT_CHARS + 1);
        assert!(matches!(
            store.add(MemoryCategory::Facts, None, &long),
            Err(MemoryError::ContentTooLong(_))
        ));
    }

    #[test]
    fn matching_hints_filter_by_query() {
        let ws = TempDir::new().unwrap();
        let store = MemoryStore::new(ws.path());
        store
            .add(MemoryCategory::Decisions, Some("Auth"), "JWT lives in auth.ts")
            .unwrap();
        store
            .add(MemoryCategory::Facts, None, "Unrelated note")
            .unwrap();

        let hints = store.matching_hints("auth");
        assert_eq!(hints.len(), 1);
        assert!(hints[0].contains("decisions"));
    }

    #[test]
    fn category_parse() {
        assert!(MemoryCategory::parse("Preferences").is_ok());
        assert!(MemoryCategory::parse("nope").is_err());
    }
}
