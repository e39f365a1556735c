use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::broadcast;
use tracing::debug;

use super::build_log::{BuildLog, LogLine};
use super::models::{ArtifactRef, BuildSettings, Project};
use super::ws::{WsMessage, broadcast_message};

/// State shared between the build core and the UI.
///
/// One cycle writes at a time; readers may look at any moment. Every write
/// replaces a whole value, so a reader never sees a half-applied project.
pub struct BuildSession {
    project: RwLock<Arc<Project>>,
    log: Mutex<BuildLog>,
    settings: RwLock<BuildSettings>,
    artifact: Mutex<Option<ArtifactRef>>,
    tx: broadcast::Sender<String>,
}

impl BuildSession {
    pub fn new(settings: BuildSettings, tx: broadcast::Sender<String>) -> Self {
        Self {
            project: RwLock::new(Arc::new(Project::default())),
            log: Mutex::new(BuildLog::new()),
            settings: RwLock::new(settings),
            artifact: Mutex::new(None),
            tx,
        }
    }

    pub fn sender(&self) -> &broadcast::Sender<String> {
        &self.tx
    }

    pub fn emit(&self, msg: &WsMessage) {
        broadcast_message(&self.tx, msg);
    }

    // ── Project ──────────────────────────────────────────────────────

    pub fn project(&self) -> Arc<Project> {
        Arc::clone(&self.project.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn replace_project(&self, project: Project) -> Arc<Project> {
        let project = Arc::new(project);
        *self.project.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&project);
        self.emit(&WsMessage::ProjectUpdated {
            project: (*project).clone(),
        });
        project
    }

    /// Copy-on-write edit of the current project.
    pub fn edit_project(&self, f: impl FnOnce(&mut Project)) -> Arc<Project> {
        let mut next = (*self.project()).clone();
        f(&mut next);
        self.replace_project(next)
    }

    // ── Build log ────────────────────────────────────────────────────

    /// Append a line to the build log and fan it out to listeners.
    pub fn log(&self, text: impl AsRef<str>) {
        let text = text.as_ref();
        debug!(target: "plugin_forge::build_log", "{}", text);
        let added = self.log.lock().unwrap_or_else(PoisonError::into_inner).push(text);
        for line in added {
            self.emit(&WsMessage::LogLine { line });
        }
    }

    pub fn log_tail(&self, max_chars: usize) -> String {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tail(max_chars)
    }

    pub fn log_snapshot(&self) -> BuildLog {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn log_lines(&self) -> Vec<LogLine> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .lines()
            .to_vec()
    }

    /// Explicit user action; the build cycle never clears the log.
    pub fn clear_log(&self) {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.emit(&WsMessage::LogCleared);
    }

    // ── Settings ─────────────────────────────────────────────────────

    pub fn settings(&self) -> BuildSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update_settings(&self, settings: BuildSettings) {
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings.clone();
        self.emit(&WsMessage::SettingsUpdated { settings });
    }

    // ── Artifact ─────────────────────────────────────────────────────

    pub fn artifact(&self) -> Option<ArtifactRef> {
        self.artifact
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_artifact(&self, artifact: Option<ArtifactRef>) {
        *self.artifact.lock().unwrap_or_else(PoisonError::into_inner) = artifact;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::models::ProjectFile;

    fn session() -> (BuildSession, broadcast::Receiver<String>) {
        let (tx, rx) = broadcast::channel(64);
        let settings = BuildSettings {
            project_name: "SuperHeal".into(),
            minecraft_version: "1.21.1".into(),
        };
        (BuildSession::new(settings, tx), rx)
    }

    #[test]
    fn test_replace_project_is_whole_value() {
        let (session, _rx) = session();
        let before = session.project();
        session.replace_project(Project::new("v2", vec![ProjectFile::new("a.java", "x")]));
        assert!(before.is_empty());
        assert_eq!(session.project().explanation, "v2");
    }

    #[test]
    fn test_edit_project_copies_on_write() {
        let (session, _rx) = session();
        session.replace_project(Project::new("v1", vec![ProjectFile::new("a.java", "x")]));
        let held = session.project();
        session.edit_project(|p| p.upsert_file(ProjectFile::new("b.java", "y")));
        assert_eq!(held.files.len(), 1);
        assert_eq!(session.project().files.len(), 2);
    }

    #[test]
    fn test_log_broadcasts_each_line() {
        let (session, mut rx) = session();
        session.log("one\ntwo");
        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert!(first.contains("\"type\":\"LogLine\""));
        assert!(first.contains("one"));
        assert!(second.contains("two"));
        assert_eq!(session.log_lines().len(), 2);
    }

    #[test]
    fn test_clear_log() {
        let (session, _rx) = session();
        session.log("x");
        session.clear_log();
        assert!(session.log_snapshot().is_empty());
        assert!(session.log_tail(10).is_empty());
    }

    #[test]
    fn test_update_settings() {
        let (session, _rx) = session();
        session.update_settings(BuildSettings {
            project_name: "Other".into(),
            minecraft_version: "1.20.4".into(),
        });
        assert_eq!(session.settings().minecraft_version, "1.20.4");
    }
}
