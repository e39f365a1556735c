use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::ci_config::apply_workflow;
use super::host::SourceHost;
use super::models::{BuildSettings, Project, validate_path};
use crate::errors::PublishError;

/// What a successful publish pushed.
#[derive(Debug, Clone)]
pub struct PublishReport {
    /// The project as pushed, CI workflow included.
    pub project: Project,
    /// Paths written, in order.
    pub written: Vec<String>,
    /// Commit created by the last write, used to match the CI run.
    pub head_sha: Option<String>,
}

/// Pushes a project to the source-control host, one file at a time.
///
/// Each write carries the revision read just before it, so the host rejects
/// the write if someone else changed the file in between. Writes are not
/// atomic: a failure part-way leaves the earlier files pushed, and the error
/// says how far it got.
pub struct RepositoryPublisher {
    host: Arc<dyn SourceHost>,
    workflow_path: String,
    artifact_glob: String,
}

impl RepositoryPublisher {
    pub fn new(host: Arc<dyn SourceHost>, workflow_path: &str, artifact_glob: &str) -> Self {
        Self {
            host,
            workflow_path: workflow_path.to_string(),
            artifact_glob: artifact_glob.to_string(),
        }
    }

    pub fn destination(&self) -> Option<String> {
        self.host.destination()
    }

    /// The project with the CI workflow synthesized from `settings`. Files
    /// sharing a path collapse to the last one.
    pub fn prepare(&self, project: &Project, settings: &BuildSettings) -> Project {
        let mut prepared = Project::new(project.explanation.clone(), project.files.clone());
        apply_workflow(
            &mut prepared,
            settings,
            &self.workflow_path,
            &self.artifact_glob,
        );
        prepared
    }

    pub async fn publish(
        &self,
        project: &Project,
        settings: &BuildSettings,
        commit_message: &str,
        cancel: &CancellationToken,
    ) -> Result<PublishReport, PublishError> {
        let destination = self.host.destination().ok_or_else(|| {
            PublishError::NotConfigured("no repository or credentials linked".to_string())
        })?;
        if project.is_empty() {
            return Err(PublishError::EmptyProject);
        }

        let prepared = self.prepare(project, settings);
        for file in &prepared.files {
            validate_path(&file.path).map_err(|reason| PublishError::InvalidPath {
                path: file.path.clone(),
                reason,
            })?;
        }

        let total = prepared.files.len();
        info!(%destination, files = total, "publishing project");

        let mut written = Vec::with_capacity(total);
        let mut head_sha = None;
        for file in &prepared.files {
            if cancel.is_cancelled() {
                info!(written = written.len(), total, "publish cancelled");
                return Err(PublishError::Cancelled {
                    written: written.len(),
                    total,
                });
            }
            let write_error = |source| PublishError::Write {
                path: file.path.clone(),
                written: written.len(),
                total,
                source,
            };
            let expected = self
                .host
                .get_file_version(&file.path)
                .await
                .map_err(write_error)?;
            let message = format!("{} ({})", commit_message, file.path);
            let receipt = self
                .host
                .write_file(&file.path, &file.content, &message, expected.as_ref())
                .await
                .map_err(write_error)?;
            debug!(path = %file.path, new_file = expected.is_none(), "wrote file");
            if receipt.commit_sha.is_some() {
                head_sha = receipt.commit_sha;
            }
            written.push(file.path.clone());
        }

        info!(files = written.len(), head_sha = ?head_sha, "publish complete");
        Ok(PublishReport {
            project: prepared,
            written,
            head_sha,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ErrorKind, HostError};
    use crate::factory::models::ProjectFile;
    use crate::factory::testing::{ScriptedHost, settings, three_file_project};
    use std::time::Duration;

    const WORKFLOW: &str = ".github/workflows/build.yml";

    fn live() -> CancellationToken {
        CancellationToken::new()
    }

    fn publisher(host: Arc<ScriptedHost>) -> RepositoryPublisher {
        RepositoryPublisher::new(host, WORKFLOW, "build/libs/*.jar")
    }

    #[tokio::test]
    async fn test_publish_writes_every_file_plus_workflow() {
        let host = Arc::new(ScriptedHost::new());
        let report = publisher(host.clone())
            .publish(&three_file_project(), &settings(), "Update plugin", &live())
            .await
            .unwrap();

        assert_eq!(report.written.len(), 4);
        assert_eq!(report.written.last().map(String::as_str), Some(WORKFLOW));
        assert_eq!(host.writes(), report.written);
        assert_eq!(report.head_sha.as_deref(), Some("commit-4"));
        assert!(report.project.file(WORKFLOW).is_some());
        assert!(host.content(WORKFLOW).unwrap().contains("java-version: '21'"));
    }

    #[tokio::test]
    async fn test_republish_identical_content_does_not_conflict() {
        let host = Arc::new(ScriptedHost::new());
        let publisher = publisher(host.clone());
        let project = three_file_project();

        publisher
            .publish(&project, &settings(), "first", &live())
            .await
            .unwrap();
        let second = publisher
            .publish(&project, &settings(), "again", &live())
            .await;

        assert!(second.is_ok());
        assert_eq!(host.writes().len(), 8);
    }

    #[tokio::test]
    async fn test_publish_replaces_ai_workflow_without_duplicating() {
        let host = Arc::new(ScriptedHost::new());
        let mut project = three_file_project();
        project.upsert_file(ProjectFile::new(WORKFLOW, "name: from the model"));

        let report = publisher(host.clone())
            .publish(&project, &settings(), "msg", &live())
            .await
            .unwrap();

        let workflows = report.project.files.iter().filter(|f| f.path == WORKFLOW).count();
        assert_eq!(workflows, 1);
        assert!(!host.content(WORKFLOW).unwrap().contains("from the model"));
    }

    #[tokio::test]
    async fn test_unlinked_host_is_configuration_error() {
        let host = Arc::new(ScriptedHost::unlinked());
        let err = publisher(host.clone())
            .publish(&three_file_project(), &settings(), "msg", &live())
            .await
            .unwrap_err();

        assert!(matches!(err, PublishError::NotConfigured(_)));
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(host.writes().is_empty());
    }

    #[tokio::test]
    async fn test_empty_project_is_rejected() {
        let host = Arc::new(ScriptedHost::new());
        let err = publisher(host.clone())
            .publish(&Project::default(), &settings(), "msg", &live())
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::EmptyProject));
        assert!(host.writes().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_path_writes_nothing() {
        let host = Arc::new(ScriptedHost::new());
        let mut project = three_file_project();
        project.upsert_file(ProjectFile::new("../escape.txt", "x"));

        let err = publisher(host.clone())
            .publish(&project, &settings(), "msg", &live())
            .await
            .unwrap_err();

        assert!(matches!(err, PublishError::InvalidPath { ref path, .. } if path == "../escape.txt"));
        assert!(host.writes().is_empty());
    }

    #[tokio::test]
    async fn test_mid_sequence_failure_reports_progress() {
        let host = Arc::new(ScriptedHost::new());
        host.fail_write(
            "src/main/java/dev/heal/Heal.java",
            HostError::Auth("Bad credentials".into()),
        );

        let err = publisher(host.clone())
            .publish(&three_file_project(), &settings(), "msg", &live())
            .await
            .unwrap_err();

        match &err {
            PublishError::Write {
                path,
                written,
                total,
                ..
            } => {
                assert_eq!(path, "src/main/java/dev/heal/Heal.java");
                assert_eq!(*written, 1);
                assert_eq!(*total, 4);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(host.writes(), vec!["build.gradle".to_string()]);
    }

    #[tokio::test]
    async fn test_conflict_is_surfaced_as_remote_conflict() {
        let host = Arc::new(ScriptedHost::new());
        host.fail_write("build.gradle", HostError::Conflict("sha mismatch".into()));

        let err = publisher(host)
            .publish(&three_file_project(), &settings(), "msg", &live())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RemoteConflict);
    }

    #[tokio::test]
    async fn test_duplicate_paths_collapse_to_last() {
        let host = Arc::new(ScriptedHost::new());
        let project: Project = serde_json::from_value(serde_json::json!({
            "explanation": "hand-edited",
            "files": [
                { "path": "A.java", "content": "class A { int v = 1; }", "language": "java" },
                { "path": "A.java", "content": "class A { int v = 2; }", "language": "java" }
            ]
        }))
        .unwrap();

        let report = publisher(host.clone())
            .publish(&project, &settings(), "msg", &live())
            .await
            .unwrap();

        let copies = report.project.files.iter().filter(|f| f.path == "A.java").count();
        assert_eq!(copies, 1);
        assert_eq!(host.writes(), vec!["A.java".to_string(), WORKFLOW.to_string()]);
        assert_eq!(host.content("A.java").as_deref(), Some("class A { int v = 2; }"));
    }

    #[tokio::test]
    async fn test_cancelled_publish_writes_nothing_more() {
        let host = Arc::new(ScriptedHost::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = publisher(host.clone())
            .publish(&three_file_project(), &settings(), "msg", &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, PublishError::Cancelled { written: 0, total: 4 }));
        assert!(host.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_between_writes_stops_publish() {
        let host = Arc::new(ScriptedHost::new().with_write_delay(Duration::from_secs(1)));
        let cancel = CancellationToken::new();
        let publisher = publisher(host.clone());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            trigger.cancel();
        });
        let err = publisher
            .publish(&three_file_project(), &settings(), "msg", &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, PublishError::Cancelled { written: 2, total: 4 }));
        assert_eq!(host.writes().len(), 2);
    }
}
