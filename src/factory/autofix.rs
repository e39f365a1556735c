use std::sync::Arc;

use tracing::info;

use super::ai::CodeGenerator;
use super::build_log::{BuildLog, tail_chars};
use super::models::{BuildSettings, Project};
use crate::errors::FixError;

/// Asks the AI collaborator to repair a project from its failed build log.
///
/// The reply replaces the project wholesale. Only the last
/// `log_tail_chars` characters of the log are sent.
pub struct AutoFixOrchestrator {
    generator: Arc<dyn CodeGenerator>,
    log_tail_chars: usize,
}

impl AutoFixOrchestrator {
    pub fn new(generator: Arc<dyn CodeGenerator>, log_tail_chars: usize) -> Self {
        Self {
            generator,
            log_tail_chars,
        }
    }

    pub async fn fix(
        &self,
        project: &Project,
        log: &BuildLog,
        settings: &BuildSettings,
    ) -> Result<Project, FixError> {
        self.fix_with_tail(project, &log.tail(self.log_tail_chars), settings)
            .await
    }

    /// Same as [`AutoFixOrchestrator::fix`] for a log already in text form.
    /// A blank log is refused without calling the AI.
    pub async fn fix_with_tail(
        &self,
        project: &Project,
        log_text: &str,
        settings: &BuildSettings,
    ) -> Result<Project, FixError> {
        let tail = tail_chars(log_text, self.log_tail_chars);
        if tail.trim().is_empty() {
            return Err(FixError::EmptyLog);
        }
        info!(
            files = project.files.len(),
            log_chars = tail.chars().count(),
            "requesting repair"
        );
        let fixed = self.generator.repair(project, &tail, settings).await?;
        info!(files = fixed.files.len(), "repair received");
        Ok(fixed)
    }
}
