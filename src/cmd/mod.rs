//! CLI command implementations.
//!
//! | Module   | Commands handled |
//! |----------|------------------|
//! | `serve`  | `Serve`          |
//! | `build`  | `Build`          |
//! | `config` | `Config`         |

pub mod build;
pub mod config;
pub mod serve;

pub use build::cmd_build;
pub use config::cmd_config;
pub use serve::cmd_serve;

use anyhow::Result;
use plugin_forge::config::ForgeConfig;

use crate::Cli;

/// Configuration with the global CLI overrides applied.
pub fn load_config(cli: &Cli, project_dir: &std::path::Path) -> Result<ForgeConfig> {
    Ok(ForgeConfig::new(project_dir)?
        .with_cli_args(cli.repository.clone(), cli.minecraft_version.clone()))
}
