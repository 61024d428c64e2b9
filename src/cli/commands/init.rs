//! Implementation of the `deepthink init` command.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use crate::cli::context::AppContext;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::infrastructure::config::{ConfigLoader, CONFIG_DIR};
use crate::services::ElevatedAuthority;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing configuration file with the defaults
    #[arg(long, short)]
    pub force: bool,

    /// Provision a default profile for this user
    #[arg(long)]
    pub user: Option<String>,

    /// Target directory (defaults to current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

#[derive(Debug, serde::Serialize)]
pub struct InitOutput {
    pub initialized_path: PathBuf,
    pub config_written: bool,
    pub database_path: String,
    pub provisioned_user: Option<String>,
}

impl CommandOutput for InitOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!("Initialized DeepThink in {}", self.initialized_path.display())];
        if self.config_written {
            lines.push(format!("  wrote {}/config.yaml", CONFIG_DIR));
        } else {
            lines.push(format!("  kept existing {}/config.yaml (use --force to overwrite)", CONFIG_DIR));
        }
        lines.push(format!("  database ready at {}", self.database_path));
        if let Some(user) = &self.provisioned_user {
            lines.push(format!("  profile ready for {}", user));
        }
        lines.join("\n")
    }
}

pub async fn execute(args: InitArgs, config: Config, json_mode: bool) -> Result<()> {
    let target = if args.path.is_absolute() {
        args.path.clone()
    } else {
        std::env::current_dir()
            .context("Failed to get current directory")?
            .join(&args.path)
    };

    let config_written = ConfigLoader::write_defaults(target.join(CONFIG_DIR), args.force)?;
    let ctx = AppContext::open_at(config, Some(&target)).await?;

    let provisioned_user = match args.user {
        Some(user) => {
            let authority = ElevatedAuthority::assume("deepthink init", "initial account provisioning");
            let outcome = ctx.provisioner().provision(&authority, &user).await?;
            Some(outcome.profile.user_id)
        }
        None => None,
    };

    let out = InitOutput {
        database_path: ctx.config.database.path.clone(),
        initialized_path: target,
        config_written,
        provisioned_user,
    };
    output(&out, json_mode);
    Ok(())
}
