use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};

use super::ai::{Attachment, CodeGenerator};
use super::github::GitHubHost;
use super::models::{BuildSettings, LoopState, Project, ProjectFile, validate_path};
use super::orchestrator::BuildOrchestrator;
use super::session::BuildSession;
use crate::errors::{BuildError, ErrorKind, GenerationError, PollError};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub session: Arc<BuildSession>,
    pub orchestrator: Arc<BuildOrchestrator>,
    pub generator: Arc<dyn CodeGenerator>,
    pub github: GitHubStatus,
}

pub type SharedState = Arc<AppState>;

// ── Request / response payload types ──────────────────────────────────

#[derive(Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Deserialize)]
pub struct BuildQuery {
    pub message: Option<String>,
}

#[derive(Deserialize)]
pub struct FileQuery {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GitHubStatus {
    pub linked: bool,
    pub repository: Option<String>,
    pub branch: String,
    pub token_configured: bool,
}

impl GitHubStatus {
    pub fn from_host(host: &GitHubHost) -> Self {
        Self {
            linked: host.repository().is_some() && host.has_token(),
            repository: host.repository().map(str::to_string),
            branch: host.branch().to_string(),
            token_configured: host.has_token(),
        }
    }
}

#[derive(Serialize)]
pub struct LoopStatus {
    pub state: LoopState,
    pub building: bool,
    pub max_attempts: Option<u32>,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    /// The host or the AI endpoint failed.
    Upstream(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<BuildError> for ApiError {
    fn from(e: BuildError) -> Self {
        let message = e.to_string();
        if matches!(e, BuildError::Poll(PollError::AlreadyRunning)) {
            return ApiError::Conflict(message);
        }
        match e.kind() {
            ErrorKind::Configuration => ApiError::BadRequest(message),
            ErrorKind::RemoteConflict => ApiError::Conflict(message),
            ErrorKind::Transport | ErrorKind::BuildFailure | ErrorKind::Generation => {
                ApiError::Upstream(message)
            }
        }
    }
}

impl From<GenerationError> for ApiError {
    fn from(e: GenerationError) -> Self {
        match e {
            GenerationError::MissingApiKey { .. } => ApiError::BadRequest(e.reason()),
            other => ApiError::Upstream(other.reason()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/generate", post(generate))
        .route("/api/project", get(get_project).put(put_project))
        .route("/api/project/files", put(put_file).delete(delete_file))
        .route("/api/settings", get(get_settings).put(put_settings))
        .route("/api/build", post(start_build))
        .route("/api/build/cancel", post(cancel_build))
        .route("/api/loop", get(loop_status))
        .route("/api/loop/start", post(start_loop))
        .route("/api/loop/stop", post(stop_loop))
        .route("/api/logs", get(get_logs).delete(clear_logs))
        .route("/api/artifact", get(download_artifact))
        .route("/api/github/status", get(github_status))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

/// The project has one writer at a time: edits wait for the build to end.
fn ensure_idle(state: &AppState, action: &str) -> Result<(), ApiError> {
    if state.orchestrator.is_building() {
        return Err(ApiError::Conflict(format!(
            "A build is in flight; cancel it or wait before {}",
            action
        )));
    }
    Ok(())
}

async fn generate(
    State(state): State<SharedState>,
    Json(req): Json<GenerateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let prompt = req.prompt.trim();
    if prompt.is_empty() {
        return Err(ApiError::BadRequest("Prompt must not be empty".into()));
    }
    ensure_idle(&state, "generating")?;

    let settings = state.session.settings();
    let current = state.session.project();
    let prior = (!current.is_empty()).then(|| current.as_ref());
    state.session.log(format!(
        "Generating {} for Minecraft {}{}",
        settings.project_name,
        settings.minecraft_version,
        if prior.is_some() { " (revising current project)" } else { "" }
    ));

    let project = match state
        .generator
        .generate(prompt, &settings, prior, &req.attachments)
        .await
    {
        Ok(project) => project,
        Err(e) => {
            state.session.log(format!("Generation failed: {}", e));
            return Err(e.into());
        }
    };
    if state.orchestrator.is_building() {
        state
            .session
            .log("A build started while generating; the generated project was discarded");
        return Err(ApiError::Conflict(
            "A build started while generating; the generated project was discarded".into(),
        ));
    }
    state
        .session
        .log(format!("AI returned {} files", project.files.len()));
    let project = state.session.replace_project(project);
    Ok(Json(project.as_ref().clone()))
}

async fn get_project(State(state): State<SharedState>) -> Json<Project> {
    Json(state.session.project().as_ref().clone())
}

fn check_paths(project: &Project) -> Result<(), ApiError> {
    for file in &project.files {
        validate_path(&file.path)
            .map_err(|reason| ApiError::BadRequest(format!("{}: {}", file.path, reason)))?;
    }
    Ok(())
}

async fn put_project(
    State(state): State<SharedState>,
    Json(project): Json<Project>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_idle(&state, "editing the project")?;
    check_paths(&project)?;
    // Repeated paths collapse to the last entry.
    let project = Project::new(project.explanation, project.files);
    let project = state.session.replace_project(project);
    Ok(Json(project.as_ref().clone()))
}

async fn put_file(
    State(state): State<SharedState>,
    Json(file): Json<ProjectFile>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_idle(&state, "editing the project")?;
    validate_path(&file.path)
        .map_err(|reason| ApiError::BadRequest(format!("{}: {}", file.path, reason)))?;
    let project = state.session.edit_project(|p| p.upsert_file(file));
    Ok(Json(project.as_ref().clone()))
}

async fn delete_file(
    State(state): State<SharedState>,
    Query(query): Query<FileQuery>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_idle(&state, "editing the project")?;
    if state.session.project().file(&query.path).is_none() {
        return Err(ApiError::NotFound(format!("File {} not found", query.path)));
    }
    let project = state.session.edit_project(|p| {
        p.remove_file(&query.path);
    });
    Ok(Json(project.as_ref().clone()))
}

async fn get_settings(State(state): State<SharedState>) -> Json<BuildSettings> {
    Json(state.session.settings())
}

async fn put_settings(
    State(state): State<SharedState>,
    Json(settings): Json<BuildSettings>,
) -> Result<impl IntoResponse, ApiError> {
    if settings.project_name.trim().is_empty() {
        return Err(ApiError::BadRequest("Project name must not be empty".into()));
    }
    if settings.minecraft_version.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Minecraft version must not be empty".into(),
        ));
    }
    state.session.update_settings(settings.clone());
    Ok(Json(settings))
}

async fn start_build(
    State(state): State<SharedState>,
    Query(query): Query<BuildQuery>,
) -> Result<impl IntoResponse, ApiError> {
    state.orchestrator.build(query.message)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({"started": true})),
    ))
}

async fn cancel_build(State(state): State<SharedState>) -> impl IntoResponse {
    let cancelled = state.orchestrator.cancel_build();
    Json(serde_json::json!({"cancelled": cancelled}))
}

async fn loop_status(State(state): State<SharedState>) -> Json<LoopStatus> {
    Json(LoopStatus {
        state: state.orchestrator.loop_state(),
        building: state.orchestrator.is_building(),
        max_attempts: state.orchestrator.max_fix_attempts(),
    })
}

async fn start_loop(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let started = state.orchestrator.start_loop()?;
    Ok(Json(serde_json::json!({
        "started": started,
        "state": state.orchestrator.loop_state(),
    })))
}

async fn stop_loop(State(state): State<SharedState>) -> impl IntoResponse {
    let stopped = state.orchestrator.stop_loop();
    Json(serde_json::json!({
        "stopped": stopped,
        "state": state.orchestrator.loop_state(),
    }))
}

async fn get_logs(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.session.log_lines())
}

async fn clear_logs(State(state): State<SharedState>) -> StatusCode {
    state.session.clear_log();
    StatusCode::NO_CONTENT
}

async fn download_artifact(State(state): State<SharedState>) -> Result<Response, ApiError> {
    let (artifact, bytes) = state
        .orchestrator
        .download_artifact()
        .await
        .map_err(|e| match e {
            PollError::NoArtifact => ApiError::NotFound(e.to_string()),
            other => BuildError::from(other).into(),
        })?;
    let disposition = format!("attachment; filename=\"{}\"", artifact.file_name);
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

async fn github_status(State(state): State<SharedState>) -> Json<GitHubStatus> {
    Json(state.github.clone())
}

// ── Tests ─────────────────────────────────────────────────────────────
