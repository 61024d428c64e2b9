//! `deepthink maintain`: cache sweep and cost partition upkeep.

use anyhow::Result;
use clap::Args;

use crate::cli::context::AppContext;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::services::maintenance::{MaintenanceEvent, MaintenanceReport};

#[derive(Args, Debug)]
pub struct MaintainArgs {
    /// Run a single cycle and exit instead of running as a daemon
    #[arg(long)]
    pub once: bool,
}

#[derive(Debug, serde::Serialize)]
pub struct MaintainOutput {
    pub cache_rows_swept: u64,
    pub partitions_created: Vec<String>,
}

impl From<MaintenanceReport> for MaintainOutput {
    fn from(report: MaintenanceReport) -> Self {
        Self {
            cache_rows_swept: report.cache_rows_swept,
            partitions_created: report.partitions_created,
        }
    }
}

impl CommandOutput for MaintainOutput {
    fn to_human(&self) -> String {
        let created = if self.partitions_created.is_empty() {
            "none".to_string()
        } else {
            self.partitions_created.join(", ")
        };
        format!(
            "Swept {} expired cache row(s); partitions created: {}",
            self.cache_rows_swept, created
        )
    }
}

pub async fn execute(args: MaintainArgs, config: Config, json_mode: bool) -> Result<()> {
    let ctx = AppContext::open(config).await?;
    let daemon = ctx.maintenance();

    if args.once {
        let report = daemon.run_once().await?;
        output(&MaintainOutput::from(report), json_mode);
        return Ok(());
    }

    let handle = daemon.handle();
    let mut events = daemon.spawn();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(MaintenanceEvent::CycleCompleted { report, .. }) => {
                    output(&MaintainOutput::from(report), json_mode);
                }
                Some(MaintenanceEvent::Stopped { reason }) => {
                    tracing::info!(?reason, "maintenance stopped");
                    break;
                }
                Some(_) => {}
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                handle.stop();
                break;
            }
        }
    }
    Ok(())
}
