//! Configuration view and validation commands: `plugin-forge config`.

use anyhow::{Context, Result, bail};
use console::style;
use plugin_forge::config::{ForgeConfig, ForgeToml};
use plugin_forge::factory::github::is_valid_github_token;

use super::load_config;
use crate::{Cli, ConfigCommands};

fn secret_status(value: &Option<String>) -> &'static str {
    if value.is_some() { "<set>" } else { "<unset>" }
}

pub fn cmd_config(
    cli: &Cli,
    project_dir: &std::path::Path,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let config_path = ForgeConfig::config_path(project_dir);

    match command {
        None | Some(ConfigCommands::Show) => {
            let config = load_config(cli, project_dir)?;
            if config_path.exists() {
                println!("# Config file: {}", config_path.display());
            } else {
                println!("# No forge.toml at {}; showing defaults", config_path.display());
            }
            println!("# Effective values (file, then PLUGIN_FORGE_* env, then CLI flags)");
            println!(
                "# {} = {}",
                config.toml.github.token_env,
                secret_status(&config.github_token)
            );
            println!(
                "# {} = {}",
                config.toml.ai.api_key_env,
                secret_status(&config.ai_api_key)
            );
            println!();
            print!("{}", config.toml.to_toml()?);
        }
        Some(ConfigCommands::Validate) => {
            let config = load_config(cli, project_dir)?;
            let problems = config.validate();
            if problems.is_empty() {
                println!("{}", style("Configuration is valid.").green());
                if config.toml.github.repository.is_none() {
                    println!("Note: github.repository is not set; builds are disabled.");
                }
                match &config.github_token {
                    None => println!(
                        "Note: {} is not set; the repository cannot be written.",
                        config.toml.github.token_env
                    ),
                    Some(token) if !is_valid_github_token(token) => println!(
                        "Note: {} does not look like a GitHub token.",
                        config.toml.github.token_env
                    ),
                    Some(_) => {}
                }
                return Ok(());
            }
            for problem in &problems {
                eprintln!("  {} {}", style("-").red(), problem);
            }
            bail!("Configuration has {} problem(s)", problems.len());
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("forge.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }
            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::write(&config_path, ForgeToml::default().to_toml()?)
                .with_context(|| format!("Failed to write {}", config_path.display()))?;

            println!("Created forge.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [project] name, minecraft_version");
            println!("  - [github] repository, branch");
            println!("  - [ai] model, base_url");
            println!("  - [build] poll_interval_secs, max_polls, max_fix_attempts");
        }
    }

    Ok(())
}
