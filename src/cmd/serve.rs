//! HTTP server command: `plugin-forge serve`.

use anyhow::{Result, bail};
use plugin_forge::factory::server::{ServerConfig, start_server};

use super::load_config;
use crate::Cli;

pub async fn cmd_serve(
    cli: &Cli,
    project_dir: &std::path::Path,
    port: u16,
    open: bool,
    dev: bool,
) -> Result<()> {
    let config = load_config(cli, project_dir)?;
    let problems = config.validate();
    if !problems.is_empty() {
        bail!("Invalid configuration:\n  - {}", problems.join("\n  - "));
    }
    if config.toml.github.repository.is_none() {
        eprintln!("No repository configured; builds stay disabled until github.repository is set.");
    }

    // Skip in dev mode (no browser inside containers)
    if open && !dev {
        let url = format!("http://localhost:{}", port);
        tokio::spawn(async move {
            // Small delay to let the server start binding
            tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
            if let Err(e) = open::that(&url) {
                eprintln!("Failed to open browser: {}", e);
            }
        });
    }

    start_server(
        ServerConfig {
            port,
            dev_mode: dev,
        },
        &config,
    )
    .await
}
