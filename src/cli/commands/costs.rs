//! `deepthink costs`: spend over a time window, or the ledger of one run.

use anyhow::Result;
use chrono::{Duration, Utc};
use clap::Args;
use uuid::Uuid;

use crate::cli::context::AppContext;
use crate::cli::output::{list_table, output, render_list, usd, CommandOutput};
use crate::domain::models::{nanos_to_usd, Config, CostEntry, CostSummary};
use crate::domain::ports::CostLedgerRepository;

#[derive(Args, Debug)]
pub struct CostsArgs {
    /// Window size in days, ending now
    #[arg(long, default_value_t = 30)]
    pub days: i64,

    /// Show the individual ledger entries of one run instead
    #[arg(long)]
    pub run: Option<Uuid>,
}

#[derive(Debug, serde::Serialize)]
pub struct ModelCost {
    pub model: String,
    pub cost_usd: f64,
}

#[derive(Debug, serde::Serialize)]
pub struct CostSummaryOutput {
    pub days: i64,
    pub total_cost_usd: f64,
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,
    pub entry_count: u64,
    pub by_model: Vec<ModelCost>,
    pub partitions: Vec<String>,
}

impl CostSummaryOutput {
    fn new(days: i64, summary: &CostSummary, partitions: Vec<String>) -> Self {
        let mut by_model: Vec<ModelCost> = summary
            .by_model
            .iter()
            .map(|(model, nanos)| ModelCost {
                model: model.clone(),
                cost_usd: nanos_to_usd(*nanos),
            })
            .collect();
        by_model.sort_by(|a, b| b.cost_usd.total_cmp(&a.cost_usd).then_with(|| a.model.cmp(&b.model)));

        Self {
            days,
            total_cost_usd: summary.total_usd(),
            total_input_tokens: summary.total_input_tokens,
            total_output_tokens: summary.total_output_tokens,
            entry_count: summary.entry_count,
            by_model,
            partitions,
        }
    }
}

impl CommandOutput for CostSummaryOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Last {} day(s): {}", self.days, usd(self.total_cost_usd)),
            format!(
                "{} call(s), {} input / {} output tokens",
                self.entry_count, self.total_input_tokens, self.total_output_tokens
            ),
        ];
        if !self.by_model.is_empty() {
            let mut table = list_table(&["model", "cost"]);
            for row in &self.by_model {
                table.add_row(vec![row.model.clone(), usd(row.cost_usd)]);
            }
            lines.push(table.to_string());
        }
        if !self.partitions.is_empty() {
            lines.push(format!("Partitions: {}", self.partitions.join(", ")));
        }
        lines.join("\n")
    }
}

#[derive(Debug, serde::Serialize)]
pub struct RunLedgerOutput {
    pub run_id: String,
    pub entries: Vec<CostEntry>,
    pub total_cost_usd: f64,
}

impl CommandOutput for RunLedgerOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["recorded", "model", "in", "out", "cost"]);
        for entry in &self.entries {
            table.add_row(vec![
                entry.recorded_at.format("%H:%M:%S").to_string(),
                entry.model.clone(),
                entry.input_tokens.to_string(),
                entry.output_tokens.to_string(),
                usd(nanos_to_usd(entry.cost_nanos)),
            ]);
        }
        format!(
            "{}\nTotal: {}",
            render_list("ledger entry", &table, self.entries.len()),
            usd(self.total_cost_usd)
        )
    }
}

pub async fn execute(args: CostsArgs, config: Config, json_mode: bool) -> Result<()> {
    let ctx = AppContext::open(config).await?;

    if let Some(run_id) = args.run {
        let entries = ctx.repos.costs.list_by_run(run_id).await?;
        let total: i64 = entries.iter().map(|e| e.cost_nanos).sum();
        let out = RunLedgerOutput {
            run_id: run_id.to_string(),
            entries,
            total_cost_usd: nanos_to_usd(total),
        };
        output(&out, json_mode);
        return Ok(());
    }

    let to = Utc::now();
    let from = to - Duration::days(args.days.max(1));
    let summary = ctx.repos.costs.summarize(from, to).await?;
    let partitions = ctx.repos.costs.list_partitions().await?;
    output(&CostSummaryOutput::new(args.days, &summary, partitions), json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_models_sorted_by_spend() {
        let summary = CostSummary {
            total_cost_nanos: 3_000,
            total_input_tokens: 10,
            total_output_tokens: 5,
            entry_count: 2,
            by_model: HashMap::from([("haiku".to_string(), 1_000), ("opus".to_string(), 2_000)]),
        };
        let out = CostSummaryOutput::new(7, &summary, Vec::new());
        assert_eq!(out.by_model[0].model, "opus");
        assert!(out.to_human().contains("Last 7 day(s)"));
    }
}
