//! `deepthink run`: submit a goal and follow it to completion.

use anyhow::{Context, Result};
use clap::Args;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

use crate::cli::commands::show::RunDetailOutput;
use crate::cli::context::AppContext;
use crate::cli::output::{create_spinner, output};
use crate::domain::errors::DomainError;
use crate::domain::models::{nanos_to_usd, Config};
use crate::services::RunEvent;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// The goal to reason about
    pub goal: String,

    /// Lane id (defaults to the user's profile lane, then the configured default)
    #[arg(long, short)]
    pub lane: Option<String>,

    /// User the run is charged to
    #[arg(long, short, env = "DEEPTHINK_RUN_USER", default_value = "local")]
    pub user: String,

    /// Override the lane's budget cap, in USD
    #[arg(long)]
    pub budget: Option<f64>,

    /// Print phase events instead of a spinner
    #[arg(long)]
    pub events: bool,
}

fn describe(event: &RunEvent) -> String {
    match event {
        RunEvent::Submitted { lane_id, .. } => format!("submitted on lane {}", lane_id),
        RunEvent::PhaseStarted { stage, .. } => format!("{} started", stage),
        RunEvent::PhaseCompleted { stage, .. } => format!("{} completed", stage),
        RunEvent::CandidateSettled {
            candidate_index,
            succeeded,
            ..
        } => format!(
            "candidate {} {}",
            candidate_index,
            if *succeeded { "succeeded" } else { "failed" }
        ),
        RunEvent::Finished { status, .. } => format!("finished: {}", status.as_str()),
    }
}

pub async fn execute(args: RunArgs, config: Config, json_mode: bool) -> Result<()> {
    let ctx = AppContext::open(config).await?;
    let profile = ctx.provisioner().profile(&args.user).await?;

    let lane_id = args
        .lane
        .clone()
        .or_else(|| profile.as_ref().map(|p| p.default_lane.clone()));
    let mut lane = ctx
        .config
        .lane(lane_id.as_deref())
        .cloned()
        .ok_or_else(|| DomainError::LaneNotFound(lane_id.unwrap_or_else(|| ctx.config.default_lane.clone())))?;

    match (args.budget, &profile) {
        (Some(budget), _) => lane.budget_cap_usd = budget,
        (None, Some(profile)) if args.lane.is_none() => lane.budget_cap_usd = nanos_to_usd(profile.budget_cap_nanos),
        _ => {}
    }

    let orchestrator = ctx.orchestrator()?;
    let mut events = orchestrator.subscribe();
    let run_id = orchestrator
        .submit(&args.goal, lane, &args.user)
        .await
        .context("Failed to submit run")?;

    let spinner = (!json_mode && !args.events).then(|| create_spinner(format!("run {}", run_id)));
    let follower = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) if event.run_id() == run_id => {
                    match &spinner {
                        Some(spinner) => spinner.set_message(describe(&event)),
                        None if !json_mode => println!("{}", describe(&event)),
                        None => {}
                    }
                    if matches!(event, RunEvent::Finished { .. }) {
                        break;
                    }
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
        if let Some(spinner) = spinner {
            spinner.finish_and_clear();
        }
    });

    tokio::select! {
        finished = orchestrator.wait(run_id) => {
            finished?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(run_id = %run_id, "interrupted, cancelling run");
            orchestrator.cancel(run_id).await?;
        }
    }
    // Finished is published before the job ends; give the follower a moment to drain.
    let _ = tokio::time::timeout(Duration::from_millis(500), follower).await;
    let snapshot = orchestrator.get_run(run_id).await?;
    output(&RunDetailOutput::from(&snapshot), json_mode);
    Ok(())
}
