//! Per-run budget accounting.
//!
//! Headroom checks are advisory and happen immediately before a stage's own
//! call; the charge is applied afterwards from real usage. Concurrent stages
//! can therefore overshoot the cap by at most one stage's cost.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{nanos_to_usd, CostEntry};
use crate::domain::ports::{CostLedgerRepository, RunRepository};
use crate::services::pricing::PricingTable;

/// Result of a headroom check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Headroom {
    pub cap_nanos: i64,
    pub spent_nanos: i64,
    pub estimate_nanos: i64,
}

impl Headroom {
    pub fn is_sufficient(&self) -> bool {
        self.spent_nanos.saturating_add(self.estimate_nanos) <= self.cap_nanos
    }

    /// Human-readable budget-exceeded reason.
    pub fn describe(&self) -> String {
        format!(
            "budget exceeded: spent ${:.4} + estimated ${:.4} exceeds cap ${:.4}",
            nanos_to_usd(self.spent_nanos),
            nanos_to_usd(self.estimate_nanos),
            nanos_to_usd(self.cap_nanos)
        )
    }
}

/// Token usage of one completed model call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub latency_ms: i64,
}

/// Outcome of charging a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Charge {
    pub cost_nanos: i64,
    /// False when this pass had already been charged.
    pub applied: bool,
}

#[derive(Clone)]
pub struct BudgetLedger {
    runs: Arc<dyn RunRepository>,
    costs: Arc<dyn CostLedgerRepository>,
    pricing: Arc<PricingTable>,
}

impl BudgetLedger {
    pub fn new(
        runs: Arc<dyn RunRepository>,
        costs: Arc<dyn CostLedgerRepository>,
        pricing: Arc<PricingTable>,
    ) -> Self {
        Self { runs, costs, pricing }
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Compare the run's accumulated cost plus `estimate_nanos` to its cap.
    pub async fn check_headroom(&self, run_id: Uuid, estimate_nanos: i64) -> DomainResult<Headroom> {
        let run = self
            .runs
            .get(run_id)
            .await?
            .ok_or(DomainError::RunNotFound(run_id))?;
        Ok(Headroom {
            cap_nanos: run.budget_cap_nanos,
            spent_nanos: run.total_cost_nanos,
            estimate_nanos,
        })
    }

    /// Charge the run for one pass. Idempotent per `pass_id`: a repeated
    /// charge neither increments totals nor appends a second ledger row.
    pub async fn charge(
        &self,
        run_id: Uuid,
        pass_id: Uuid,
        provider: &str,
        model: &str,
        usage: Usage,
    ) -> DomainResult<Charge> {
        let input_tokens = i64::from(usage.input_tokens);
        let output_tokens = i64::from(usage.output_tokens);
        let cost_nanos = self.pricing.cost_nanos(
            model,
            u64::from(usage.input_tokens),
            u64::from(usage.output_tokens),
        );

        let entry = CostEntry {
            id: Uuid::new_v4(),
            run_id,
            pass_id,
            provider: provider.to_string(),
            model: model.to_string(),
            input_tokens,
            output_tokens,
            cost_nanos,
            recorded_at: Utc::now(),
        };
        let applied = self.costs.record_charge(&entry, usage.latency_ms.max(0)).await?;

        if applied {
            tracing::debug!(
                run_id = %run_id,
                pass_id = %pass_id,
                model,
                cost_usd = nanos_to_usd(cost_nanos),
                "pass charged"
            );
        } else {
            tracing::debug!(run_id = %run_id, pass_id = %pass_id, "charge already applied");
        }

        Ok(Charge { cost_nanos, applied })
    }
}
