//! Wiring shared by the commands: database, repositories and services.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use crate::adapters::providers::build_provider;
use crate::adapters::sources::build_sources;
use crate::adapters::sqlite::{database_url, initialize_database, PoolConfig, SqliteRepositories};
use crate::domain::models::Config;
use crate::services::{AccountProvisioner, MaintenanceDaemon, RunOrchestrator};

pub struct AppContext {
    pub config: Config,
    pub repos: SqliteRepositories,
}

impl AppContext {
    /// Open (and migrate) the configured database.
    pub async fn open(config: Config) -> Result<Self> {
        Self::open_at(config, None).await
    }

    /// Open the database, resolving a relative path against `root` when given.
    pub async fn open_at(config: Config, root: Option<&Path>) -> Result<Self> {
        let path = match root {
            Some(root) if Path::new(&config.database.path).is_relative() => {
                root.join(&config.database.path).display().to_string()
            }
            _ => config.database.path.clone(),
        };
        let pool = initialize_database(&database_url(&path), Some(PoolConfig::from(&config.database)))
            .await
            .with_context(|| format!("Failed to open database at {}. Run 'deepthink init' first.", path))?;

        Ok(Self {
            repos: SqliteRepositories::new(pool),
            config,
        })
    }

    pub fn orchestrator(&self) -> Result<RunOrchestrator> {
        let provider = build_provider(&self.config.provider).context("Failed to build model provider")?;
        Ok(RunOrchestrator::new(
            self.repos.clone().into(),
            provider,
            build_sources(&self.config.evidence),
            &self.config,
        ))
    }

    pub fn provisioner(&self) -> AccountProvisioner {
        AccountProvisioner::new(Arc::new(self.repos.profiles.clone()), &self.config)
    }

    pub fn maintenance(&self) -> MaintenanceDaemon {
        MaintenanceDaemon::new(
            Arc::new(self.repos.cache.clone()),
            Arc::new(self.repos.costs.clone()),
            self.config.maintenance.clone(),
        )
    }
}
