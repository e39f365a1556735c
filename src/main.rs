use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "plugin-forge")]
#[command(
    version,
    about = "Generate Minecraft plugins with AI, build them in GitHub Actions, fix them until they compile"
)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding `.plugin-forge/forge.toml` (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// GitHub repository to publish to, as `owner/repo`. Overrides forge.toml.
    #[arg(long, global = true)]
    pub repository: Option<String>,

    /// Target Minecraft version. Overrides forge.toml.
    #[arg(long, global = true)]
    pub minecraft_version: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the HTTP API and WebSocket feed
    Serve {
        /// Port to serve on
        #[arg(short, long, default_value = "3141")]
        port: u16,

        /// Open the browser once the server is up
        #[arg(long)]
        open: bool,

        /// Enable dev mode (CORS permissive, listen on all interfaces)
        #[arg(long)]
        dev: bool,
    },
    /// Publish a local plugin project, wait for CI, and optionally fix it until it builds
    Build {
        /// Directory holding the plugin sources
        #[arg(long)]
        dir: PathBuf,

        /// Keep fixing and rebuilding until the build succeeds
        #[arg(long)]
        eternal: bool,

        /// Write the built artifact to this file on success
        #[arg(long)]
        download: Option<PathBuf>,

        /// Commit message for the pushed files
        #[arg(short, long)]
        message: Option<String>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and exit non-zero on problems
    Validate,
    /// Write a default forge.toml
    Init,
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "plugin_forge=debug,info"
    } else {
        "plugin_forge=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Serve { port, open, dev } => {
            cmd::cmd_serve(&cli, &project_dir, *port, *open, *dev).await?;
        }
        Commands::Build {
            dir,
            eternal,
            download,
            message,
        } => {
            cmd::cmd_build(
                &cli,
                &project_dir,
                dir,
                *eternal,
                download.as_deref(),
                message.clone(),
            )
            .await?;
        }
        Commands::Config { command } => cmd::cmd_config(&cli, &project_dir, command.clone())?,
    }

    Ok(())
}
