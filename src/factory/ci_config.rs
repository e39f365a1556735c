//! CI workflow synthesis.
//!
//! The workflow is regenerated from settings on every publish, so the remote
//! always builds with the JDK the target server version needs, whether or
//! not the AI emitted a workflow of its own.

use super::models::{BuildSettings, Language, Project, ProjectFile};

/// JDK major version required by a Minecraft server version.
///
/// `>= 1.20.5` → 21, `>= 1.18` → 17, `1.17.x` → 16, older → 8.
/// Unparseable versions get the newest JDK.
pub fn java_version_for(minecraft_version: &str) -> u32 {
    let mut parts = minecraft_version
        .trim()
        .split(['.', '-'])
        .map(|p| p.parse::<u32>());
    let (Some(Ok(major)), Some(Ok(minor))) = (parts.next(), parts.next()) else {
        return 21;
    };
    let patch = match parts.next() {
        Some(Ok(patch)) => patch,
        _ => 0,
    };
    if major > 1 {
        return 21;
    }
    match (minor, patch) {
        (m, _) if m > 20 => 21,
        (20, p) if p >= 5 => 21,
        (m, _) if m >= 18 => 17,
        (17, _) => 16,
        _ => 8,
    }
}

/// Render the GitHub Actions workflow for `settings`.
pub fn render_workflow(settings: &BuildSettings, artifact_glob: &str) -> String {
    let java = java_version_for(&settings.minecraft_version);
    format!(
        r#"name: Build {name}

on:
  push:
  workflow_dispatch:

jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v4
      - name: Set up JDK {java}
        uses: actions/setup-java@v4
        with:
          java-version: '{java}'
          distribution: 'temurin'
      - name: Set up Gradle
        uses: gradle/actions/setup-gradle@v4
      - name: Build with Gradle
        run: gradle build --no-daemon -PminecraftVersion={mc}
      - name: Upload plugin jar
        uses: actions/upload-artifact@v4
        with:
          name: {name}-{mc}
          path: {glob}
"#,
        name = settings.project_name,
        java = java,
        mc = settings.minecraft_version,
        glob = artifact_glob,
    )
}

/// Insert the synthesized workflow at `workflow_path`, replacing any existing entry.
pub fn apply_workflow(
    project: &mut Project,
    settings: &BuildSettings,
    workflow_path: &str,
    artifact_glob: &str,
) {
    project.upsert_file(ProjectFile {
        path: workflow_path.to_string(),
        content: render_workflow(settings, artifact_glob),
        language: Language::Yaml,
    });
}
