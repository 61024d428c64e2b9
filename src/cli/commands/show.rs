//! `deepthink show`: one run with its plan, evidence, candidates and checks.

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use uuid::Uuid;

use crate::cli::context::AppContext;
use crate::cli::output::{colorize_status, list_table, output, truncate, usd, CommandOutput};
use crate::domain::models::{Citation, Config};
use crate::services::RunSnapshot;

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Run id
    pub run_id: Uuid,
}

#[derive(Debug, serde::Serialize)]
pub struct CandidateRow {
    pub candidate_index: u32,
    pub status: String,
    pub is_winner: bool,
    pub cache_hit: bool,
    pub error: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct CheckRow {
    pub candidate_index: Option<u32>,
    pub name: String,
    pub status: String,
    pub score: Option<f64>,
    pub reasoning: String,
}

#[derive(Debug, serde::Serialize)]
pub struct RunDetailOutput {
    pub id: String,
    pub status: String,
    pub lane_id: String,
    pub user_id: String,
    pub goal: String,
    pub answer: Option<String>,
    pub citations: Vec<Citation>,
    pub residual_risk: Option<String>,
    pub verify_score: Option<f64>,
    pub failed_stage: Option<String>,
    pub error_reason: Option<String>,
    pub plan_approach: Option<String>,
    pub evidence_count: usize,
    pub source_errors: usize,
    pub candidates: Vec<CandidateRow>,
    pub checks: Vec<CheckRow>,
    pub total_cost_usd: f64,
    pub budget_cap_usd: f64,
    pub total_tokens: i64,
    pub total_latency_ms: i64,
}

impl From<&RunSnapshot> for RunDetailOutput {
    fn from(snapshot: &RunSnapshot) -> Self {
        let run = &snapshot.run;
        let index_of = |pass_id: Uuid| {
            snapshot
                .candidates
                .iter()
                .find(|p| p.id == pass_id)
                .map(|p| p.candidate_index)
        };

        Self {
            id: run.id.to_string(),
            status: run.status.as_str().to_string(),
            lane_id: run.lane_id.clone(),
            user_id: run.user_id.clone(),
            goal: run.goal.clone(),
            answer: run.final_output.as_ref().map(|o| o.answer.clone()),
            citations: run
                .final_output
                .as_ref()
                .map(|o| o.citations.clone())
                .unwrap_or_default(),
            residual_risk: run.residual_risk.clone(),
            verify_score: run.verify_score,
            failed_stage: run.failed_stage.clone(),
            error_reason: run.error_reason.clone(),
            plan_approach: snapshot.plan.as_ref().map(|p| p.approach.clone()),
            evidence_count: snapshot.artifacts.iter().filter(|a| a.is_citable()).count(),
            source_errors: snapshot.artifacts.iter().filter(|a| !a.is_citable()).count(),
            candidates: snapshot
                .candidates
                .iter()
                .map(|p| CandidateRow {
                    candidate_index: p.candidate_index,
                    status: p.status.as_str().to_string(),
                    is_winner: p.is_winner,
                    cache_hit: p.cache_hit,
                    error: p.error.clone(),
                })
                .collect(),
            checks: snapshot
                .checks
                .iter()
                .map(|c| CheckRow {
                    candidate_index: index_of(c.candidate_pass_id),
                    name: c.name.clone(),
                    status: c.status.as_str().to_string(),
                    score: c.score,
                    reasoning: c.reasoning.clone(),
                })
                .collect(),
            total_cost_usd: run.total_cost_usd(),
            budget_cap_usd: run.budget_cap_usd(),
            total_tokens: run.total_tokens,
            total_latency_ms: run.total_latency_ms,
        }
    }
}

impl CommandOutput for RunDetailOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Run {} [{}]", style(&self.id).bold(), colorize_status(&self.status)),
            format!("Lane: {}  User: {}", self.lane_id, self.user_id),
            format!("Goal: {}", self.goal),
        ];
        if let Some(approach) = &self.plan_approach {
            lines.push(format!("Plan: {}", truncate(approach, 100)));
        }
        lines.push(format!(
            "Evidence: {} item(s), {} source error(s)",
            self.evidence_count, self.source_errors
        ));

        if let Some(answer) = &self.answer {
            lines.push(String::new());
            lines.push(format!("{}", style("Answer").bold().underlined()));
            lines.push(answer.clone());
            for c in &self.citations {
                lines.push(format!("  [{}] {} {}", c.ref_id, c.source_uri, style(truncate(&c.snippet, 60)).dim()));
            }
        }
        if let Some(score) = self.verify_score {
            lines.push(format!("Verify score: {:.2}", score));
        }
        if let Some(risk) = &self.residual_risk {
            lines.push(format!("Residual risk: {}", risk));
        }
        if let Some(reason) = &self.error_reason {
            lines.push(format!(
                "{} at {}: {}",
                style("Failed").red().bold(),
                self.failed_stage.as_deref().unwrap_or("unknown stage"),
                reason
            ));
        }

        if !self.candidates.is_empty() {
            let mut table = list_table(&["#", "status", "winner", "cached", "error"]);
            for c in &self.candidates {
                table.add_row(vec![
                    c.candidate_index.to_string(),
                    colorize_status(&c.status).to_string(),
                    if c.is_winner { "yes".to_string() } else { String::new() },
                    if c.cache_hit { "yes".to_string() } else { String::new() },
                    truncate(c.error.as_deref().unwrap_or(""), 50),
                ]);
            }
            lines.push(String::new());
            lines.push(table.to_string());
        }

        if !self.checks.is_empty() {
            let mut table = list_table(&["#", "check", "status", "score", "reasoning"]);
            for c in &self.checks {
                table.add_row(vec![
                    c.candidate_index.map(|i| i.to_string()).unwrap_or_default(),
                    c.name.clone(),
                    colorize_status(&c.status).to_string(),
                    c.score.map(|s| format!("{:.2}", s)).unwrap_or_default(),
                    truncate(&c.reasoning, 60),
                ]);
            }
            lines.push(String::new());
            lines.push(table.to_string());
        }

        lines.push(String::new());
        lines.push(format!(
            "Cost: {} of {} cap, {} tokens, {} ms model time",
            usd(self.total_cost_usd),
            usd(self.budget_cap_usd),
            self.total_tokens,
            self.total_latency_ms
        ));
        lines.join("\n")
    }
}

pub async fn execute(args: ShowArgs, config: Config, json_mode: bool) -> Result<()> {
    let ctx = AppContext::open(config).await?;
    let snapshot = ctx
        .orchestrator()?
        .get_run(args.run_id)
        .await
        .with_context(|| format!("Failed to load run {}", args.run_id))?;
    output(&RunDetailOutput::from(&snapshot), json_mode);
    Ok(())
}
