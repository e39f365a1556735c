use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::HostError;

/// Revision marker of a file on the host (a blob sha on GitHub).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionToken(pub String);

/// Result of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    /// Revision of the file after the write.
    pub version: VersionToken,
    /// Commit the write created, if the host reports one.
    pub commit_sha: Option<String>,
}

/// Most recent CI run, as the host reports it (raw strings, not yet classified).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: u64,
    pub status: String,
    pub conclusion: Option<String>,
    pub head_sha: Option<String>,
    pub html_url: Option<String>,
}

/// Raw artifact listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteArtifact {
    pub id: u64,
    pub name: String,
    pub size_in_bytes: u64,
    pub archive_download_url: String,
}

/// Log of one failed CI job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLog {
    pub job_name: String,
    pub failed_steps: Vec<String>,
    pub text: String,
}

/// Source-control host + CI system, as the build core sees it.
/// Real implementation: `GitHubHost`. Test double: `ScriptedHost`.
#[async_trait]
pub trait SourceHost: Send + Sync {
    /// Human-readable destination, or `None` when no remote is linked.
    fn destination(&self) -> Option<String>;

    /// Current revision of `path`, or `None` when the file doesn't exist yet.
    async fn get_file_version(&self, path: &str) -> Result<Option<VersionToken>, HostError>;

    /// Write `content` at `path`. `expected` must match the current revision
    /// (or be `None` for a new file), otherwise the host rejects the write.
    async fn write_file(
        &self,
        path: &str,
        content: &str,
        message: &str,
        expected: Option<&VersionToken>,
    ) -> Result<WriteReceipt, HostError>;

    /// The most recent CI run, or `None` when the host has none.
    async fn get_latest_run(&self) -> Result<Option<RunSummary>, HostError>;

    /// First artifact produced by `run_id`, if any.
    async fn get_run_artifact(&self, run_id: u64) -> Result<Option<RemoteArtifact>, HostError>;

    async fn download_artifact(&self, url: &str) -> Result<Vec<u8>, HostError>;

    /// Logs of the failed jobs of `run_id`. Hosts without log access return nothing.
    async fn get_failure_logs(&self, _run_id: u64) -> Result<Vec<JobLog>, HostError> {
        Ok(Vec::new())
    }
}
