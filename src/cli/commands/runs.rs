//! `deepthink runs`: recent runs, newest first.

use anyhow::{anyhow, Result};
use clap::Args;

use crate::cli::context::AppContext;
use crate::cli::output::{colorize_status, list_table, output, render_list, truncate, usd, CommandOutput};
use crate::domain::models::{Config, Run, RunStatus};
use crate::domain::ports::{RunFilter, RunRepository};

#[derive(Args, Debug)]
pub struct RunsArgs {
    /// Only runs of this user
    #[arg(long, short)]
    pub user: Option<String>,

    /// Only runs in this status (pending, running, success, error, cancelled)
    #[arg(long, short)]
    pub status: Option<String>,

    /// Maximum number of runs to list
    #[arg(long, default_value_t = 20)]
    pub limit: i64,
}

#[derive(Debug, serde::Serialize)]
pub struct RunRow {
    pub id: String,
    pub status: String,
    pub lane_id: String,
    pub goal: String,
    pub verify_score: Option<f64>,
    pub total_cost_usd: f64,
    pub created_at: String,
}

impl From<&Run> for RunRow {
    fn from(run: &Run) -> Self {
        Self {
            id: run.id.to_string(),
            status: run.status.as_str().to_string(),
            lane_id: run.lane_id.clone(),
            goal: run.goal.clone(),
            verify_score: run.verify_score,
            total_cost_usd: run.total_cost_usd(),
            created_at: run.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct RunListOutput {
    pub runs: Vec<RunRow>,
    pub total: usize,
}

impl CommandOutput for RunListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["id", "status", "lane", "score", "cost", "goal"]);
        for run in &self.runs {
            table.add_row(vec![
                run.id[..8].to_string(),
                colorize_status(&run.status).to_string(),
                run.lane_id.clone(),
                run.verify_score.map(|s| format!("{:.2}", s)).unwrap_or_default(),
                usd(run.total_cost_usd),
                truncate(&run.goal, 50),
            ]);
        }
        render_list("run", &table, self.total)
    }
}

pub async fn execute(args: RunsArgs, config: Config, json_mode: bool) -> Result<()> {
    let status = match args.status {
        Some(s) => Some(RunStatus::from_str(&s).ok_or_else(|| anyhow!("Invalid status: {}", s))?),
        None => None,
    };
    let ctx = AppContext::open(config).await?;
    let runs = ctx
        .repos
        .runs
        .list(RunFilter {
            user_id: args.user,
            status,
            limit: Some(args.limit),
        })
        .await?;

    let out = RunListOutput {
        total: runs.len(),
        runs: runs.iter().map(RunRow::from).collect(),
    };
    output(&out, json_mode);
    Ok(())
}
