//! Typed error hierarchy for the plugin factory.
//!
//! One enum per stage of the build cycle:
//! - `PublishError`: pushing the project to the source-control host
//! - `PollError`: watching CI and fetching artifacts
//! - `FixError`: asking the AI collaborator to repair a failed build
//!
//! `HostError` and `GenerationError` are the errors of the two external
//! seams; the stage errors wrap them. Every error maps onto an [`ErrorKind`]
//! so callers can decide whether a failure is retryable.

use serde::Serialize;
use thiserror::Error;

/// Coarse classification shared by every error in the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Remote not linked, credentials rejected, invalid input. Never retried.
    Configuration,
    /// Network or HTTP failure. Retried while polling, fatal while publishing.
    Transport,
    /// Version mismatch on a write. Surfaced, not retried.
    RemoteConflict,
    /// CI reported a failed conclusion.
    BuildFailure,
    /// The AI collaborator failed.
    Generation,
}

/// Errors from the source-control host seam.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    #[error("Credentials rejected: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Version conflict: {0}")]
    Conflict(String),

    #[error("Rate limited by host")]
    RateLimited,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl HostError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HostError::Auth(_) | HostError::NotFound(_) => ErrorKind::Configuration,
            HostError::Conflict(_) => ErrorKind::RemoteConflict,
            HostError::RateLimited | HostError::Transport(_) | HostError::Malformed(_) => {
                ErrorKind::Transport
            }
        }
    }
}

/// Errors from publishing a project.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Repository is not configured: {0}")]
    NotConfigured(String),

    #[error("Project has no files to publish")]
    EmptyProject,

    #[error("Invalid file path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Publish cancelled after {written} of {total} files")]
    Cancelled { written: usize, total: usize },

    #[error("Failed to write {path} ({written} of {total} files written): {source}")]
    Write {
        path: String,
        written: usize,
        total: usize,
        #[source]
        source: HostError,
    },
}

impl PublishError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PublishError::NotConfigured(_)
            | PublishError::EmptyProject
            | PublishError::InvalidPath { .. }
            | PublishError::Cancelled { .. } => ErrorKind::Configuration,
            PublishError::Write { source, .. } => source.kind(),
        }
    }
}

/// Errors from the polling stage.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("A build is already in flight")]
    AlreadyRunning,

    #[error("No artifact is available yet")]
    NoArtifact,

    #[error("Failed to fetch artifact: {0}")]
    Artifact(#[source] HostError),
}

impl PollError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PollError::AlreadyRunning | PollError::NoArtifact => ErrorKind::Configuration,
            PollError::Artifact(e) => e.kind(),
        }
    }
}

/// Errors from the AI collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("No API key configured (set {env_var})")]
    MissingApiKey { env_var: String },

    #[error("AI endpoint rejected the credentials: {0}")]
    InvalidCredentials(String),

    #[error("AI quota exhausted or rate limited: {0}")]
    Quota(String),

    #[error("AI endpoint returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("AI request failed: {0}")]
    Transport(String),

    #[error("Malformed AI response: {0}")]
    Malformed(String),
}

impl GenerationError {
    /// Human-readable reason, as surfaced to the UI.
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

/// Errors from a repair attempt.
#[derive(Debug, Error)]
pub enum FixError {
    #[error("No build log to act on; refusing to ask for a fix without evidence")]
    EmptyLog,

    #[error("Repair failed: {0}")]
    Generation(#[from] GenerationError),
}

impl FixError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FixError::EmptyLog => ErrorKind::Configuration,
            FixError::Generation(_) => ErrorKind::Generation,
        }
    }
}

/// Anything a build request can be rejected with, as surfaced to the UI.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Poll(#[from] PollError),

    #[error(transparent)]
    Fix(#[from] FixError),
}

impl BuildError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BuildError::Publish(e) => e.kind(),
            BuildError::Poll(e) => e.kind(),
            BuildError::Fix(e) => e.kind(),
        }
    }
}
