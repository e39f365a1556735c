//! AI collaborator: generates plugin projects and repairs failed builds.
//!
//! The build core only sees the [`CodeGenerator`] trait. The production
//! implementation talks to any OpenAI-compatible chat-completions endpoint
//! and asks for a JSON project back.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::models::{BuildSettings, Language, Project, ProjectFile};
use crate::errors::GenerationError;

/// Extra context the user attached to a generation prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub content: String,
}

#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Produce a whole project from a prompt, optionally revising `prior`.
    async fn generate(
        &self,
        prompt: &str,
        settings: &BuildSettings,
        prior: Option<&Project>,
        attachments: &[Attachment],
    ) -> Result<Project, GenerationError>;

    /// Produce a corrected project given the tail of a failed build log.
    async fn repair(
        &self,
        project: &Project,
        log_tail: &str,
        settings: &BuildSettings,
    ) -> Result<Project, GenerationError>;
}

const SYSTEM_PROMPT: &str = r#"You are an expert Minecraft server plugin developer (Paper/Spigot, Java, Gradle).

You MUST respond with valid JSON only (no markdown, no commentary) matching this schema:
{
  "explanation": "What the plugin does and what you changed",
  "files": [
    { "path": "relative/forward/slash/path", "content": "full file content", "language": "java" }
  ]
}

Rules:
- Always return the COMPLETE project: every file, with its full content.
- Paths are relative and use forward slashes.
- Include build.gradle, settings.gradle and src/main/resources/plugin.yml.
- The jar must be produced under build/libs/.
- Do not emit a CI workflow; one is generated for you.
"#;

/// Render a project as prompt context.
fn render_project(project: &Project) -> String {
    let mut out = String::new();
    for file in &project.files {
        out.push_str(&format!("--- {} ---\n{}\n", file.path, file.content));
    }
    out
}

pub fn generation_prompt(
    prompt: &str,
    settings: &BuildSettings,
    prior: Option<&Project>,
    attachments: &[Attachment],
) -> String {
    let mut out = format!(
        "Plugin name: {}\nTarget Minecraft version: {}\n\nRequest:\n{}\n",
        settings.project_name, settings.minecraft_version, prompt
    );
    for attachment in attachments {
        out.push_str(&format!(
            "\nAttachment {}:\n{}\n",
            attachment.name, attachment.content
        ));
    }
    if let Some(prior) = prior.filter(|p| !p.is_empty()) {
        out.push_str("\nCurrent project (revise it, keep what still applies):\n");
        out.push_str(&render_project(prior));
    }
    out
}

pub fn repair_prompt(project: &Project, log_tail: &str, settings: &BuildSettings) -> String {
    format!(
        "The CI build of plugin {} for Minecraft {} failed.\n\n\
         Build log (most recent output):\n{}\n\n\
         Current project:\n{}\n\
         Fix the errors and return the complete corrected project.",
        settings.project_name,
        settings.minecraft_version,
        log_tail,
        render_project(project)
    )
}

#[derive(Debug, Deserialize)]
struct GeneratedProject {
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    files: Vec<GeneratedFile>,
}

#[derive(Debug, Deserialize)]
struct GeneratedFile {
    path: String,
    content: String,
    #[serde(default)]
    language: Option<Language>,
}

/// Parse the model's reply into a project.
///
/// Tolerates prose or code fences around the JSON object. A reply with no
/// files is rejected.
pub fn parse_project_response(text: &str) -> Result<Project, GenerationError> {
    let cleaned = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => return Err(GenerationError::Malformed("no JSON object in reply".into())),
    };
    let generated: GeneratedProject = serde_json::from_str(cleaned)
        .map_err(|e| GenerationError::Malformed(format!("invalid project JSON: {}", e)))?;
    if generated.files.is_empty() {
        return Err(GenerationError::Malformed("reply contained no files".into()));
    }

    let files = generated
        .files
        .into_iter()
        .map(|f| {
            let path = f.path.trim().trim_start_matches("./").to_string();
            let language = f.language.unwrap_or_else(|| Language::from_path(&path));
            ProjectFile {
                path,
                content: f.content,
                language,
            }
        })
        .collect();
    Ok(Project::new(generated.explanation, files))
}

/// Map an HTTP error status from the completion endpoint.
pub fn classify_status(status: u16, body: &str) -> GenerationError {
    let message: String = body.chars().take(300).collect();
    match status {
        401 | 403 => GenerationError::InvalidCredentials(message),
        402 | 429 => GenerationError::Quota(message),
        _ => GenerationError::Api { status, message },
    }
}

// ── OpenAI-compatible client ─────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiGenerator {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    api_key_env: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiGenerator {
    pub fn from_config(config: &crate::config::ForgeConfig) -> Self {
        let ai = &config.toml.ai;
        Self {
            client: Client::new(),
            base_url: ai.base_url.trim_end_matches('/').to_string(),
            model: ai.model.clone(),
            api_key: config.ai_api_key.clone(),
            api_key_env: ai.api_key_env.clone(),
            max_tokens: ai.max_tokens,
            temperature: ai.temperature,
        }
    }

    async fn complete(&self, user_prompt: &str) -> Result<Project, GenerationError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| GenerationError::MissingApiKey {
                env_var: self.api_key_env.clone(),
            })?;

        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        debug!(model = %self.model, prompt_chars = user_prompt.len(), "requesting completion");
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &text));
        }

        let chat: ChatResponse = resp
            .json()
            .await
            .map_err(|e| GenerationError::Malformed(e.to_string()))?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GenerationError::Malformed("reply had no content".into()))?;
        parse_project_response(&content)
    }
}

#[async_trait]
impl CodeGenerator for OpenAiGenerator {
    async fn generate(
        &self,
        prompt: &str,
        settings: &BuildSettings,
        prior: Option<&Project>,
        attachments: &[Attachment],
    ) -> Result<Project, GenerationError> {
        self.complete(&generation_prompt(prompt, settings, prior, attachments))
            .await
    }

    async fn repair(
        &self,
        project: &Project,
        log_tail: &str,
        settings: &BuildSettings,
    ) -> Result<Project, GenerationError> {
        self.complete(&repair_prompt(project, log_tail, settings))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> BuildSettings {
        BuildSettings {
            project_name: "SuperHeal".into(),
            minecraft_version: "1.21.1".into(),
        }
    }

    #[test]
    fn test_parse_plain_json() {
        let project = parse_project_response(
            r#"{"explanation":"heals","files":[
                {"path":"src/main/java/Heal.java","content":"class Heal {}"},
                {"path":"plugin.yml","content":"name: Heal","language":"yaml"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(project.explanation, "heals");
        assert_eq!(project.files.len(), 2);
        assert_eq!(project.files[0].language, Language::Java);
        assert_eq!(project.files[1].language, Language::Yaml);
    }

    #[test]
    fn test_parse_strips_code_fence_and_dot_slash() {
        let reply = "Here you go:\n```json\n{\"files\":[{\"path\":\"./build.gradle\",\"content\":\"\"}]}\n```";
        let project = parse_project_response(reply).unwrap();
        assert_eq!(project.files[0].path, "build.gradle");
        assert_eq!(project.files[0].language, Language::Groovy);
    }

    #[test]
    fn test_parse_duplicate_paths_last_wins() {
        let project = parse_project_response(
            r#"{"files":[{"path":"a.java","content":"1"},{"path":"a.java","content":"2"}]}"#,
        )
        .unwrap();
        assert_eq!(project.files.len(), 1);
        assert_eq!(project.files[0].content, "2");
    }

    #[test]
    fn test_parse_rejects_empty_and_garbage() {
        assert!(matches!(
            parse_project_response(r#"{"explanation":"nothing","files":[]}"#),
            Err(GenerationError::Malformed(_))
        ));
        assert!(matches!(
            parse_project_response("I cannot help with that"),
            Err(GenerationError::Malformed(_))
        ));
        assert!(matches!(
            parse_project_response("{not json}"),
            Err(GenerationError::Malformed(_))
        ));
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(classify_status(401, ""), GenerationError::InvalidCredentials(_)));
        assert!(matches!(classify_status(429, "slow down"), GenerationError::Quota(_)));
        assert!(matches!(
            classify_status(500, "oops"),
            GenerationError::Api { status: 500, .. }
        ));
    }

    #[test]
    fn test_repair_prompt_carries_log_and_files() {
        let project = Project::new("x", vec![ProjectFile::new("Heal.java", "class Heal {")]);
        let prompt = repair_prompt(&project, "error: reached end of file", &settings());
        assert!(prompt.contains("Minecraft 1.21.1"));
        assert!(prompt.contains("error: reached end of file"));
        assert!(prompt.contains("--- Heal.java ---"));
    }

    #[test]
    fn test_generation_prompt_includes_prior_and_attachments() {
        let prior = Project::new("x", vec![ProjectFile::new("plugin.yml", "name: Heal")]);
        let attachments = vec![Attachment {
            name: "notes.txt".into(),
            content: "use /heal".into(),
        }];
        let prompt = generation_prompt("add a cooldown", &settings(), Some(&prior), &attachments);
        assert!(prompt.contains("add a cooldown"));
        assert!(prompt.contains("Attachment notes.txt"));
        assert!(prompt.contains("--- plugin.yml ---"));

        let fresh = generation_prompt("new plugin", &settings(), Some(&Project::default()), &[]);
        assert!(!fresh.contains("Current project"));
    }

    #[tokio::test]
    async fn test_missing_api_key_fails_before_network() {
        let config = crate::config::ForgeConfig {
            config_dir: std::path::PathBuf::from(".plugin-forge"),
            toml: crate::config::ForgeToml::default(),
            github_token: None,
            ai_api_key: None,
        };
        let generator = OpenAiGenerator::from_config(&config);
        let err = generator
            .repair(&Project::default(), "log", &settings())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GenerationError::MissingApiKey {
                env_var: "OPENAI_API_KEY".into()
            }
        );
    }
}
