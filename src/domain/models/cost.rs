//! Cost ledger records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

const NANOS_PER_USD: f64 = 1_000_000_000.0;

/// Convert a USD amount to integer nanodollars.
pub fn usd_to_nanos(usd: f64) -> i64 {
    (usd * NANOS_PER_USD).round() as i64
}

/// Convert integer nanodollars to USD.
pub fn nanos_to_usd(nanos: i64) -> f64 {
    nanos as f64 / NANOS_PER_USD
}

/// Append-only ledger row, one per charged pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEntry {
    pub id: Uuid,
    pub run_id: Uuid,
    pub pass_id: Uuid,
    pub provider: String,
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_nanos: i64,
    pub recorded_at: DateTime<Utc>,
}

/// Aggregated cost over a time range.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CostSummary {
    pub total_cost_nanos: i64,
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,
    pub entry_count: u64,
    pub by_model: HashMap<String, i64>,
}

impl CostSummary {
    pub fn total_usd(&self) -> f64 {
        nanos_to_usd(self.total_cost_nanos)
    }

    pub fn add(&mut self, entry: &CostEntry) {
        self.total_cost_nanos += entry.cost_nanos;
        self.total_input_tokens += entry.input_tokens;
        self.total_output_tokens += entry.output_tokens;
        self.entry_count += 1;
        *self.by_model.entry(entry.model.clone()).or_default() += entry.cost_nanos;
    }

    /// Format as a human-readable summary.
    pub fn format_summary(&self) -> String {
        let mut s = format!(
            "Cost: ${:.4} ({} calls, {}K input, {}K output)",
            self.total_usd(),
            self.entry_count,
            self.total_input_tokens / 1000,
            self.total_output_tokens / 1000,
        );

        if self.by_model.len() > 1 {
            s.push_str("\n  By model:");
            let mut models: Vec<_> = self.by_model.iter().collect();
            models.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
            for (model, cost) in models {
                s.push_str(&format!("\n    {}: ${:.4}", model, nanos_to_usd(*cost)));
            }
        }

        s
    }
}
