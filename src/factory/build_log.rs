use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One timestamped line of the build log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogLine {
    pub at: DateTime<Utc>,
    pub text: String,
}

/// Append-only log of everything the build cycle did.
///
/// Grows without bound; only [`BuildLog::tail`] is ever sent to the AI.
/// Cleared only by an explicit user action.
#[derive(Debug, Clone, Default)]
pub struct BuildLog {
    lines: Vec<LogLine>,
}

impl BuildLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append text; embedded newlines become separate lines.
    pub fn push(&mut self, text: impl AsRef<str>) -> Vec<LogLine> {
        let at = Utc::now();
        let added: Vec<LogLine> = text
            .as_ref()
            .lines()
            .map(|line| LogLine {
                at,
                text: line.to_string(),
            })
            .collect();
        self.lines.extend(added.iter().cloned());
        added
    }

    pub fn lines(&self) -> &[LogLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Full text, one line per entry.
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The last `max_chars` characters of [`BuildLog::text`].
    pub fn tail(&self, max_chars: usize) -> String {
        tail_chars(&self.text(), max_chars)
    }
}

/// Last `max_chars` characters of `text`, cut on a char boundary.
pub fn tail_chars(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}
