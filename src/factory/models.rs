use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Source language of a generated file, used by the viewer for highlighting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Java,
    Kotlin,
    Groovy,
    Yaml,
    Json,
    Properties,
    Xml,
    Markdown,
    #[default]
    #[serde(other)]
    Text,
}

impl Language {
    /// Guess the language from a file extension.
    pub fn from_path(path: &str) -> Self {
        let ext = path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
        match ext.as_deref() {
            Some("java") => Self::Java,
            Some("kt") | Some("kts") => Self::Kotlin,
            Some("gradle") | Some("groovy") => Self::Groovy,
            Some("yml") | Some("yaml") => Self::Yaml,
            Some("json") => Self::Json,
            Some("properties") => Self::Properties,
            Some("xml") => Self::Xml,
            Some("md") => Self::Markdown,
            _ => Self::Text,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectFile {
    /// Forward-slash relative path; the identity of the file within a project.
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub language: Language,
}

impl ProjectFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        let path = path.into();
        let language = Language::from_path(&path);
        Self {
            path,
            content: content.into(),
            language,
        }
    }
}

/// Check that a path is a forward-slash relative path without traversal.
pub fn validate_path(path: &str) -> Result<(), String> {
    if path.trim().is_empty() {
        return Err("path is empty".to_string());
    }
    if path.contains('\\') {
        return Err("path must use forward slashes".to_string());
    }
    if path.starts_with('/') {
        return Err("path must be relative".to_string());
    }
    if path.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return Err("path contains an empty, '.' or '..' segment".to_string());
    }
    Ok(())
}

/// A generated plugin: an explanation plus an ordered set of files keyed by path.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub files: Vec<ProjectFile>,
}

impl Project {
    /// Build a project, collapsing duplicate paths (last write wins, first position kept).
    pub fn new(explanation: impl Into<String>, files: Vec<ProjectFile>) -> Self {
        let mut project = Self {
            explanation: explanation.into(),
            files: Vec::with_capacity(files.len()),
        };
        for file in files {
            project.upsert_file(file);
        }
        project
    }

    /// Insert a file, or replace the existing file at the same path in place.
    pub fn upsert_file(&mut self, file: ProjectFile) {
        match self.files.iter_mut().find(|f| f.path == file.path) {
            Some(existing) => *existing = file,
            None => self.files.push(file),
        }
    }

    pub fn remove_file(&mut self, path: &str) -> Option<ProjectFile> {
        let idx = self.files.iter().position(|f| f.path == path)?;
        Some(self.files.remove(idx))
    }

    pub fn file(&self, path: &str) -> Option<&ProjectFile> {
        self.files.iter().find(|f| f.path == path)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// User-adjustable settings the build core reads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildSettings {
    /// Human-readable name, used for artifact file names.
    pub project_name: String,
    /// Target server runtime version, e.g. "1.21.1".
    pub minecraft_version: String,
}

impl BuildSettings {
    /// `<project-name>-<minecraft-version>.zip`, with unsafe characters replaced.
    pub fn artifact_file_name(&self) -> String {
        let name = file_name_part(&self.project_name, false);
        let version = file_name_part(&self.minecraft_version, true);
        format!("{}-{}.zip", name, version)
    }
}

/// Replace anything outside `[A-Za-z0-9_-]` (plus `.` when allowed) with `-`.
fn file_name_part(raw: &str, keep_dots: bool) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || (keep_dots && c == '.') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Raw run status as reported by CI.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    Completed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" | "requested" | "waiting" | "pending" => Ok(Self::Queued),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("Invalid run status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunConclusion {
    Success,
    Failure,
}

impl RunConclusion {
    /// Anything other than an explicit success counts as a failed build.
    pub fn from_raw(raw: &str) -> Self {
        if raw == "success" {
            Self::Success
        } else {
            Self::Failure
        }
    }
}

/// Read-only projection of one CI run, refreshed each poll tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildRun {
    pub id: u64,
    pub status: RunStatus,
    pub conclusion: Option<RunConclusion>,
    /// Cosmetic estimate, 0..=100. Never branch on it.
    pub progress_percent: u8,
    pub html_url: Option<String>,
}

impl BuildRun {
    pub fn is_terminal(&self) -> bool {
        self.status == RunStatus::Completed && self.conclusion.is_some()
    }
}

/// Poller state lattice: `Idle -> Queued -> InProgress -> {Success, Failure}`,
/// plus the synthetic `Timeout`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BuildPhase {
    Idle,
    Queued,
    InProgress,
    Success,
    Failure,
    Timeout,
}

impl BuildPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Timeout)
    }

    /// Classify a raw run. Unknown statuses yield `None` (treated as "no run yet").
    pub fn from_run(status: &str, conclusion: Option<&str>) -> Option<Self> {
        match status.parse::<RunStatus>().ok()? {
            RunStatus::Queued => Some(Self::Queued),
            RunStatus::InProgress => Some(Self::InProgress),
            RunStatus::Completed => match conclusion.map(RunConclusion::from_raw) {
                Some(RunConclusion::Success) => Some(Self::Success),
                Some(RunConclusion::Failure) => Some(Self::Failure),
                // Completed without a verdict yet; keep waiting.
                None => Some(Self::InProgress),
            },
        }
    }
}

/// Pointer to a downloadable build output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactRef {
    pub id: u64,
    pub name: String,
    pub size_in_bytes: u64,
    pub download_url: String,
    pub run_id: u64,
    /// Name to save the download under.
    pub file_name: String,
}

/// On/off state of the eternal fix loop.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoopState {
    pub active: bool,
    pub attempt_count: u32,
}

/// Why a loop (or a single build cycle) ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "reason", content = "detail")]
pub enum StopReason {
    UserRequested,
    BuildSucceeded,
    BuildFailed,
    Timeout,
    Cancelled,
    PublishFailed(String),
    FixFailed(String),
    AttemptCapReached(u32),
}

impl StopReason {
    pub fn describe(&self) -> String {
        match self {
            Self::UserRequested => "stopped by user".to_string(),
            Self::BuildSucceeded => "build succeeded".to_string(),
            Self::BuildFailed => "build failed".to_string(),
            Self::Timeout => "build timed out".to_string(),
            Self::Cancelled => "build cancelled".to_string(),
            Self::PublishFailed(msg) => format!("publish failed: {}", msg),
            Self::FixFailed(msg) => format!("fix failed: {}", msg),
            Self::AttemptCapReached(n) => format!("gave up after {} fix attempts", n),
        }
    }
}
