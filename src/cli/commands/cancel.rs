//! `deepthink cancel`: stop a pending or running run.

use anyhow::Result;
use clap::Args;
use uuid::Uuid;

use crate::cli::context::AppContext;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;

#[derive(Args, Debug)]
pub struct CancelArgs {
    /// Run id
    pub run_id: Uuid,
}

#[derive(Debug, serde::Serialize)]
pub struct CancelOutput {
    pub run_id: String,
    pub status: String,
}

impl CommandOutput for CancelOutput {
    fn to_human(&self) -> String {
        format!("Run {} is {}", self.run_id, self.status)
    }
}

pub async fn execute(args: CancelArgs, config: Config, json_mode: bool) -> Result<()> {
    let ctx = AppContext::open(config).await?;
    let orchestrator = ctx.orchestrator()?;
    orchestrator.cancel(args.run_id).await?;
    let run = orchestrator.wait(args.run_id).await?;

    output(
        &CancelOutput {
            run_id: run.id.to_string(),
            status: run.status.as_str().to_string(),
        },
        json_mode,
    );
    Ok(())
}
