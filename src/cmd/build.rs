//! Headless build command: `plugin-forge build`.

use std::path::Path;

use anyhow::{Context, Result, bail};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;
use walkdir::WalkDir;

use plugin_forge::factory::models::{BuildPhase, Project, ProjectFile, StopReason};
use plugin_forge::factory::server::build_state;
use plugin_forge::factory::ws::WsMessage;

use super::load_config;
use crate::Cli;

/// Directories that hold build output or tooling state, never sources.
const SKIPPED_DIRS: &[&str] = &[
    ".git",
    ".plugin-forge",
    ".gradle",
    ".idea",
    "build",
    "target",
    "out",
    "node_modules",
];

/// Files larger than this are not plugin sources.
const MAX_FILE_BYTES: u64 = 1024 * 1024;

pub async fn cmd_build(
    cli: &Cli,
    project_dir: &Path,
    dir: &Path,
    eternal: bool,
    download: Option<&Path>,
    message: Option<String>,
) -> Result<()> {
    let config = load_config(cli, project_dir)?;
    let problems = config.validate();
    if !problems.is_empty() {
        bail!("Invalid configuration:\n  - {}", problems.join("\n  - "));
    }

    let project = load_project_dir(dir)?;
    if project.is_empty() {
        bail!("No source files found in {}", dir.display());
    }
    if config.toml.github.repository.is_none() {
        bail!(
            "Repository is not configured: set github.repository in forge.toml or pass --repository"
        );
    }

    let state = build_state(&config);
    println!(
        "Loaded {} files from {}",
        style(project.files.len()).cyan(),
        dir.display()
    );
    state.session.replace_project(project);

    let orchestrator = &state.orchestrator;
    let mut rx = state.session.sender().subscribe();
    let view = BuildView::new(cli.verbose);

    let run = orchestrator.run_build(eternal, message);
    tokio::pin!(run);
    let reason = loop {
        tokio::select! {
            result = &mut run => break result?,
            msg = rx.recv() => match msg {
                Ok(json) => view.handle(&json),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "progress view lagged"),
                Err(RecvError::Closed) => {}
            },
            _ = tokio::signal::ctrl_c() => {
                orchestrator.cancel_build();
            }
        }
    };
    while let Ok(json) = rx.try_recv() {
        view.handle(&json);
    }
    view.finish();

    match reason {
        StopReason::BuildSucceeded => {
            println!("{}", style("Build succeeded.").green().bold());
            if let Some(path) = download {
                let (artifact, bytes) = orchestrator
                    .download_artifact()
                    .await
                    .context("Failed to download the build artifact")?;
                std::fs::write(path, &bytes)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!(
                    "Saved {} ({} bytes) to {}",
                    artifact.file_name,
                    bytes.len(),
                    path.display()
                );
            }
            Ok(())
        }
        other => bail!("Build did not succeed: {}", other.describe()),
    }
}

/// Read every UTF-8 text file under `dir` into a project, with forward-slash
/// paths relative to `dir`.
pub fn load_project_dir(dir: &Path) -> Result<Project> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !(entry.file_type().is_dir()
                    && SKIPPED_DIRS.contains(&entry.file_name().to_string_lossy().as_ref()))
        });
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dir)
            .with_context(|| format!("{} is outside {}", entry.path().display(), dir.display()))?;
        let path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if size > MAX_FILE_BYTES {
            debug!(%path, size, "skipping large file");
            continue;
        }
        match std::fs::read_to_string(entry.path()) {
            Ok(content) => files.push(ProjectFile::new(path, content)),
            Err(e) => debug!(%path, error = %e, "skipping unreadable or binary file"),
        }
    }

    Ok(Project::new(
        format!("Loaded from {}", dir.display()),
        files,
    ))
}

/// Terminal rendering of the build event stream.
struct BuildView {
    bar: ProgressBar,
    verbose: bool,
}

impl BuildView {
    fn new(verbose: bool) -> Self {
        let bar = ProgressBar::new(100);
        let bar_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░");
        bar.set_style(bar_style);
        bar.set_prefix("Build");
        Self { bar, verbose }
    }

    fn println(&self, line: impl AsRef<str>) {
        self.bar.println(line.as_ref());
    }

    fn handle(&self, json: &str) {
        let Ok(msg) = serde_json::from_str::<WsMessage>(json) else {
            return;
        };
        match msg {
            WsMessage::LogLine { line } => self.println(&line.text),
            WsMessage::PublishStarted { cycle, file_count } => {
                self.bar.set_position(0);
                self.bar
                    .set_message(format!("cycle {}: publishing {} files", cycle, file_count));
            }
            WsMessage::PublishCompleted { written, .. } if self.verbose => {
                for path in written {
                    self.println(format!("  {} {}", style("pushed").dim(), path));
                }
            }
            WsMessage::BuildProgress { phase, percent, .. } => {
                self.bar.set_position(u64::from(percent));
                self.bar.set_message(phase_message(phase));
            }
            WsMessage::BuildSucceeded { .. } => {
                self.bar.set_position(100);
                self.bar.set_message(style("succeeded").green().to_string());
            }
            WsMessage::BuildFailed { .. } => {
                self.bar.set_message(style("failed").red().to_string());
            }
            WsMessage::BuildTimedOut { .. } => {
                self.bar.set_message(style("timed out").yellow().to_string());
            }
            WsMessage::FixStarted { attempt } => {
                self.bar.set_position(0);
                self.bar
                    .set_message(format!("fix attempt {}: waiting for the AI", attempt));
            }
            _ => {}
        }
    }

    fn finish(&self) {
        self.bar.abandon();
    }
}

fn phase_message(phase: BuildPhase) -> String {
    match phase {
        BuildPhase::Idle => "waiting for the run".to_string(),
        BuildPhase::Queued => "queued".to_string(),
        BuildPhase::InProgress => "building".to_string(),
        BuildPhase::Success => style("succeeded").green().to_string(),
        BuildPhase::Failure => style("failed").red().to_string(),
        BuildPhase::Timeout => style("timed out").yellow().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(root: &Path, path: &str, content: &[u8]) {
        let full = root.join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, content).unwrap();
    }

    #[test]
    fn test_load_project_dir_uses_relative_forward_slash_paths() {
        let dir = tempdir().unwrap();
        write(dir.path(), "build.gradle", b"plugins { id 'java' }");
        write(dir.path(), "src/main/java/dev/heal/Heal.java", b"class Heal {}");

        let project = load_project_dir(dir.path()).unwrap();
        let paths: Vec<&str> = project.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["build.gradle", "src/main/java/dev/heal/Heal.java"]);
    }

    #[test]
    fn test_load_project_dir_skips_tooling_dirs_and_binaries() {
        let dir = tempdir().unwrap();
        write(dir.path(), "plugin.yml", b"name: Heal");
        write(dir.path(), ".git/HEAD", b"ref: refs/heads/main");
        write(dir.path(), "build/libs/heal.jar", b"PK");
        write(dir.path(), ".plugin-forge/forge.toml", b"[project]");
        write(dir.path(), "icon.png", &[0xff, 0xfe, 0x00, 0x9f]);

        let project = load_project_dir(dir.path()).unwrap();
        let paths: Vec<&str> = project.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["plugin.yml"]);
    }

    #[test]
    fn test_load_project_dir_rejects_missing_dir() {
        let dir = tempdir().unwrap();
        let err = load_project_dir(&dir.path().join("nope")).unwrap_err();
        assert!(err.to_string().contains("is not a directory"));
    }
}
