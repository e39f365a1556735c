//! Scripted doubles for the host and AI seams, shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::ai::{Attachment, CodeGenerator};
use super::host::{JobLog, RemoteArtifact, RunSummary, SourceHost, VersionToken, WriteReceipt};
use super::models::{BuildSettings, Project, ProjectFile};
use crate::errors::{GenerationError, HostError};

pub fn settings() -> BuildSettings {
    BuildSettings {
        project_name: "SuperHeal".into(),
        minecraft_version: "1.21.1".into(),
    }
}

pub fn three_file_project() -> Project {
    Project::new(
        "heals players",
        vec![
            ProjectFile::new("build.gradle", "plugins { id 'java' }"),
            ProjectFile::new("src/main/java/dev/heal/Heal.java", "class Heal {"),
            ProjectFile::new("src/main/resources/plugin.yml", "name: SuperHeal"),
        ],
    )
}

pub fn run(id: u64, status: &str, conclusion: Option<&str>) -> RunSummary {
    RunSummary {
        id,
        status: status.to_string(),
        conclusion: conclusion.map(str::to_string),
        head_sha: None,
        html_url: None,
    }
}

#[derive(Default)]
struct HostState {
    files: HashMap<String, (String, u64)>,
    next_version: u64,
    next_commit: u64,
    writes: Vec<String>,
    write_errors: HashMap<String, HostError>,
    runs: VecDeque<Result<Option<RunSummary>, HostError>>,
    last_run: Option<RunSummary>,
    run_queries: u32,
    artifact: Option<RemoteArtifact>,
    failure_logs: Vec<JobLog>,
    writes_in_flight: u32,
    max_writes_in_flight: u32,
}

/// In-memory source host with compare-and-swap file writes and a scripted
/// sequence of run statuses. Once the script runs out, the last run repeats.
pub struct ScriptedHost {
    destination: Option<String>,
    write_delay: Option<Duration>,
    state: Mutex<HostState>,
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self {
            destination: Some("steve/superheal@main".into()),
            write_delay: None,
            state: Mutex::new(HostState::default()),
        }
    }

    pub fn unlinked() -> Self {
        Self {
            destination: None,
            write_delay: None,
            state: Mutex::new(HostState::default()),
        }
    }

    pub fn with_runs(self, runs: Vec<RunSummary>) -> Self {
        self.state.lock().unwrap().runs = runs.into_iter().map(|r| Ok(Some(r))).collect();
        self
    }

    /// Make every write take `delay` before it lands.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    pub fn push_run_result(&self, result: Result<Option<RunSummary>, HostError>) {
        self.state.lock().unwrap().runs.push_back(result);
    }

    pub fn fail_write(&self, path: &str, err: HostError) {
        self.state
            .lock()
            .unwrap()
            .write_errors
            .insert(path.to_string(), err);
    }

    pub fn set_artifact(&self, artifact: RemoteArtifact) {
        self.state.lock().unwrap().artifact = Some(artifact);
    }

    pub fn set_failure_logs(&self, logs: Vec<JobLog>) {
        self.state.lock().unwrap().failure_logs = logs;
    }

    pub fn writes(&self) -> Vec<String> {
        self.state.lock().unwrap().writes.clone()
    }

    /// Highest number of writes that were in progress at the same time.
    pub fn max_concurrent_writes(&self) -> u32 {
        self.state.lock().unwrap().max_writes_in_flight
    }

    pub fn run_queries(&self) -> u32 {
        self.state.lock().unwrap().run_queries
    }

    pub fn content(&self, path: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .files
            .get(path)
            .map(|(content, _)| content.clone())
    }
}

#[async_trait]
impl SourceHost for ScriptedHost {
    fn destination(&self) -> Option<String> {
        self.destination.clone()
    }

    async fn get_file_version(&self, path: &str) -> Result<Option<VersionToken>, HostError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .files
            .get(path)
            .map(|(_, v)| VersionToken(v.to_string())))
    }

    async fn write_file(
        &self,
        path: &str,
        content: &str,
        _message: &str,
        expected: Option<&VersionToken>,
    ) -> Result<WriteReceipt, HostError> {
        if let Some(delay) = self.write_delay {
            {
                let mut state = self.state.lock().unwrap();
                state.writes_in_flight += 1;
                state.max_writes_in_flight =
                    state.max_writes_in_flight.max(state.writes_in_flight);
            }
            tokio::time::sleep(delay).await;
            self.state.lock().unwrap().writes_in_flight -= 1;
        }
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.write_errors.get(path) {
            return Err(err.clone());
        }
        let current = state.files.get(path).map(|(_, v)| VersionToken(v.to_string()));
        if current.as_ref() != expected {
            return Err(HostError::Conflict(format!("{} does not match", path)));
        }
        state.next_version += 1;
        state.next_commit += 1;
        let version = state.next_version;
        state
            .files
            .insert(path.to_string(), (content.to_string(), version));
        state.writes.push(path.to_string());
        Ok(WriteReceipt {
            version: VersionToken(version.to_string()),
            commit_sha: Some(format!("commit-{}", state.next_commit)),
        })
    }

    async fn get_latest_run(&self) -> Result<Option<RunSummary>, HostError> {
        let mut state = self.state.lock().unwrap();
        state.run_queries += 1;
        match state.runs.pop_front() {
            Some(Ok(run)) => {
                state.last_run = run.clone();
                Ok(run)
            }
            Some(Err(e)) => Err(e),
            None => Ok(state.last_run.clone()),
        }
    }

    async fn get_run_artifact(&self, _run_id: u64) -> Result<Option<RemoteArtifact>, HostError> {
        Ok(self.state.lock().unwrap().artifact.clone())
    }

    async fn download_artifact(&self, url: &str) -> Result<Vec<u8>, HostError> {
        match &self.state.lock().unwrap().artifact {
            Some(a) if a.archive_download_url == url => Ok(b"PK\x03\x04jar".to_vec()),
            _ => Err(HostError::NotFound(url.to_string())),
        }
    }

    async fn get_failure_logs(&self, _run_id: u64) -> Result<Vec<JobLog>, HostError> {
        Ok(self.state.lock().unwrap().failure_logs.clone())
    }
}

/// AI double that replays scripted results and records every call.
pub struct ScriptedGenerator {
    delay: Option<Duration>,
    results: Mutex<VecDeque<Result<Project, GenerationError>>>,
    repairs: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(results: Vec<Result<Project, GenerationError>>) -> Self {
        Self {
            delay: None,
            results: Mutex::new(results.into()),
            repairs: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Make every call take `delay` before it answers.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// Log tails passed to `repair`, in call order.
    pub fn repairs(&self) -> Vec<String> {
        self.repairs.lock().unwrap().clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn next(&self) -> Result<Project, GenerationError> {
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GenerationError::Quota("script exhausted".into())))
    }
}

#[async_trait]
impl CodeGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        prompt: &str,
        _settings: &BuildSettings,
        _prior: Option<&Project>,
        _attachments: &[Attachment],
    ) -> Result<Project, GenerationError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.pause().await;
        self.next()
    }

    async fn repair(
        &self,
        _project: &Project,
        log_tail: &str,
        _settings: &BuildSettings,
    ) -> Result<Project, GenerationError> {
        self.repairs.lock().unwrap().push(log_tail.to_string());
        self.pause().await;
        self.next()
    }
}
