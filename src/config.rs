//! Layered configuration for the plugin factory.
//!
//! Settings are read from `.plugin-forge/forge.toml`, then overridden by
//! environment variables (a `.env` file is honoured), then by CLI flags.
//! Every field has a default, so a missing file is a valid configuration.
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! name = "SuperHeal"
//! minecraft_version = "1.21.1"
//!
//! [github]
//! repository = "owner/superheal"
//! branch = "main"
//! token_env = "GITHUB_TOKEN"
//!
//! [ai]
//! base_url = "https://api.openai.com/v1"
//! model = "gpt-4o"
//! api_key_env = "OPENAI_API_KEY"
//!
//! [build]
//! poll_interval_secs = 3
//! max_polls = 180
//! fix_delay_secs = 2
//! log_tail_chars = 5000
//! # max_fix_attempts = 10
//! ```
//!
//! Secrets never live in the file: `token_env` and `api_key_env` name the
//! environment variables that hold them.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::factory::github::parse_owner_repo;
use crate::factory::models::BuildSettings;

/// Directory holding the config file, relative to the working directory.
pub const CONFIG_DIR: &str = ".plugin-forge";

/// Project identity used for prompts, the CI config and artifact names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSection {
    #[serde(default = "default_project_name")]
    pub name: String,
    #[serde(default = "default_minecraft_version")]
    pub minecraft_version: String,
}

fn default_project_name() -> String {
    "MyPlugin".to_string()
}

fn default_minecraft_version() -> String {
    "1.21.1".to_string()
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            name: default_project_name(),
            minecraft_version: default_minecraft_version(),
        }
    }
}

/// Source-control destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubSection {
    /// `owner/repo` slug or GitHub URL. Unset means publishing is not configured.
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_github_api_url")]
    pub api_url: String,
    /// Name of the environment variable holding the access token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

impl Default for GitHubSection {
    fn default() -> Self {
        Self {
            repository: None,
            branch: default_branch(),
            api_url: default_github_api_url(),
            token_env: default_token_env(),
        }
    }
}

/// OpenAI-compatible chat completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiSection {
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,
    #[serde(default = "default_ai_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_ai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_ai_model() -> String {
    "gpt-4o".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_max_tokens() -> u32 {
    16_000
}

fn default_temperature() -> f32 {
    0.2
}

impl Default for AiSection {
    fn default() -> Self {
        Self {
            base_url: default_ai_base_url(),
            model: default_ai_model(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

/// Build-cycle tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSection {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Samples before the poller gives up with a timeout.
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
    /// Pause between applying a fix and republishing.
    #[serde(default = "default_fix_delay_secs")]
    pub fix_delay_secs: u64,
    /// Trailing characters of the build log sent to the repair call.
    #[serde(default = "default_log_tail_chars")]
    pub log_tail_chars: usize,
    /// Unset means the eternal loop runs until success or a manual stop.
    #[serde(default)]
    pub max_fix_attempts: Option<u32>,
    #[serde(default = "default_workflow_path")]
    pub workflow_path: String,
    #[serde(default = "default_artifact_glob")]
    pub artifact_glob: String,
}

fn default_poll_interval_secs() -> u64 {
    3
}

fn default_max_polls() -> u32 {
    180
}

fn default_fix_delay_secs() -> u64 {
    2
}

fn default_log_tail_chars() -> usize {
    5000
}

fn default_workflow_path() -> String {
    ".github/workflows/build.yml".to_string()
}

fn default_artifact_glob() -> String {
    "build/libs/*.jar".to_string()
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_polls: default_max_polls(),
            fix_delay_secs: default_fix_delay_secs(),
            log_tail_chars: default_log_tail_chars(),
            max_fix_attempts: None,
            workflow_path: default_workflow_path(),
            artifact_glob: default_artifact_glob(),
        }
    }
}

impl BuildSection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn fix_delay(&self) -> Duration {
        Duration::from_secs(self.fix_delay_secs)
    }
}

/// The whole `forge.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForgeToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub github: GitHubSection,
    #[serde(default)]
    pub ai: AiSection,
    #[serde(default)]
    pub build: BuildSection,
}

impl ForgeToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse forge.toml")
    }

    /// Load `<dir>/forge.toml`, or defaults when the file doesn't exist.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join("forge.toml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply `PLUGIN_FORGE_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (the environment in production).
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(repo) = lookup("PLUGIN_FORGE_REPOSITORY") {
            self.github.repository = Some(repo);
        }
        if let Some(branch) = lookup("PLUGIN_FORGE_BRANCH") {
            self.github.branch = branch;
        }
        if let Some(version) = lookup("PLUGIN_FORGE_MINECRAFT_VERSION") {
            self.project.minecraft_version = version;
        }
        if let Some(name) = lookup("PLUGIN_FORGE_PROJECT_NAME") {
            self.project.name = name;
        }
        if let Some(model) = lookup("PLUGIN_FORGE_AI_MODEL") {
            self.ai.model = model;
        }
    }

    /// Report problems that would make the build cycle misbehave.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.build.poll_interval_secs == 0 {
            problems.push("build.poll_interval_secs must be greater than 0".to_string());
        }
        if self.build.max_polls == 0 {
            problems.push("build.max_polls must be greater than 0".to_string());
        }
        if self.build.log_tail_chars == 0 {
            problems.push("build.log_tail_chars must be greater than 0".to_string());
        }
        if self.build.max_fix_attempts == Some(0) {
            problems.push("build.max_fix_attempts must be greater than 0 when set".to_string());
        }
        if let Some(repo) = &self.github.repository
            && parse_owner_repo(repo).is_none()
        {
            problems.push(format!(
                "github.repository '{}' must look like 'owner/repo'",
                repo
            ));
        }
        if self.project.name.trim().is_empty() {
            problems.push("project.name must not be empty".to_string());
        }
        problems
    }

    /// Settings the build core consumes.
    pub fn build_settings(&self) -> BuildSettings {
        BuildSettings {
            project_name: self.project.name.clone(),
            minecraft_version: self.project.minecraft_version.clone(),
        }
    }

    /// Render as TOML with nothing secret in it (the file never holds secrets).
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize forge.toml")
    }
}

/// Resolved configuration plus the secrets looked up from the environment.
#[derive(Debug, Clone)]
pub struct ForgeConfig {
    pub config_dir: PathBuf,
    pub toml: ForgeToml,
    pub github_token: Option<String>,
    pub ai_api_key: Option<String>,
}

impl ForgeConfig {
    /// Load from `<project_dir>/.plugin-forge/forge.toml` and the environment.
    pub fn new(project_dir: &Path) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let config_dir = project_dir.join(CONFIG_DIR);
        let mut toml = ForgeToml::load_or_default(&config_dir)?;
        toml.apply_env();

        let github_token = std::env::var(&toml.github.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty());
        let ai_api_key = std::env::var(&toml.ai.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());

        Ok(Self {
            config_dir,
            toml,
            github_token,
            ai_api_key,
        })
    }

    pub fn config_path(project_dir: &Path) -> PathBuf {
        project_dir.join(CONFIG_DIR).join("forge.toml")
    }

    /// Apply CLI overrides, which win over file and environment.
    pub fn with_cli_args(
        mut self,
        repository: Option<String>,
        minecraft_version: Option<String>,
    ) -> Self {
        if let Some(repo) = repository {
            self.toml.github.repository = Some(repo);
        }
        if let Some(version) = minecraft_version {
            self.toml.project.minecraft_version = version;
        }
        self
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = ForgeToml::default();
        assert_eq!(config.build.poll_interval_secs, 3);
        assert_eq!(config.build.max_polls, 180);
        assert_eq!(config.build.fix_delay_secs, 2);
        assert_eq!(config.build.log_tail_chars, 5000);
        assert!(config.build.max_fix_attempts.is_none());
        assert_eq!(config.build.workflow_path, ".github/workflows/build.yml");
        assert!(config.github.repository.is_none());
        assert_eq!(config.github.branch, "main");
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_partial_file_fills_defaults() {
        let config = ForgeToml::parse(
            r#"
            [project]
            name = "SuperHeal"

            [github]
            repository = "steve/superheal"

            [build]
            max_fix_attempts = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.project.name, "SuperHeal");
        assert_eq!(config.project.minecraft_version, "1.21.1");
        assert_eq!(config.github.repository.as_deref(), Some("steve/superheal"));
        assert_eq!(config.build.max_fix_attempts, Some(5));
        assert_eq!(config.build.max_polls, 180);
    }

    #[test]
    fn test_parse_invalid_toml_fails() {
        assert!(ForgeToml::parse("[project\nname = 1").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PLUGIN_FORGE_REPOSITORY", "alex/mine"),
            ("PLUGIN_FORGE_MINECRAFT_VERSION", "1.20.4"),
        ]
        .into_iter()
        .collect();
        let mut config = ForgeToml::default();
        config.apply_env_with(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.github.repository.as_deref(), Some("alex/mine"));
        assert_eq!(config.project.minecraft_version, "1.20.4");
        assert_eq!(config.github.branch, "main");
    }

    #[test]
    fn test_validate_reports_zero_values_and_bad_slug() {
        let mut config = ForgeToml::default();
        config.build.poll_interval_secs = 0;
        config.build.max_polls = 0;
        config.github.repository = Some("not-a-slug".to_string());
        let problems = config.validate();
        assert_eq!(problems.len(), 3);
        assert!(problems.iter().any(|p| p.contains("poll_interval_secs")));
        assert!(problems.iter().any(|p| p.contains("owner/repo")));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = ForgeToml::load_or_default(dir.path()).unwrap();
        assert_eq!(config.project.name, "MyPlugin");
    }

    #[test]
    fn test_load_or_default_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("forge.toml"),
            "[project]\nminecraft_version = \"1.19.4\"\n",
        )
        .unwrap();
        let config = ForgeToml::load_or_default(dir.path()).unwrap();
        assert_eq!(config.project.minecraft_version, "1.19.4");
    }

    #[test]
    fn test_build_settings_projection() {
        let config = ForgeToml::default();
        let settings = config.build_settings();
        assert_eq!(settings.project_name, "MyPlugin");
        assert_eq!(settings.minecraft_version, "1.21.1");
    }

    #[test]
    fn test_to_toml_roundtrips() {
        let mut config = ForgeToml::default();
        config.github.repository = Some("o/r".to_string());
        let rendered = config.to_toml().unwrap();
        let parsed = ForgeToml::parse(&rendered).unwrap();
        assert_eq!(parsed.github.repository.as_deref(), Some("o/r"));
    }
}
