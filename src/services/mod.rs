pub mod account_provisioning;
pub mod budget_ledger;
pub mod errors;
pub mod evidence_gatherer;
pub mod maintenance;
pub mod orchestrator;
pub mod pass_cache;
pub mod pass_runner;
pub mod planner;
pub mod pricing;
pub mod solver_pool;
pub mod verifier;

pub use account_provisioning::{AccountProvisioner, ElevatedAuthority, ProvisionOutcome};
pub use budget_ledger::{BudgetLedger, Charge, Headroom, Usage};
pub use errors::{PassError, PipelineError, PipelineResult};
pub use evidence_gatherer::{EvidenceGatherer, EvidenceSet};
pub use maintenance::{MaintenanceDaemon, MaintenanceEvent, MaintenanceHandle, MaintenanceReport};
pub use orchestrator::{RunEvent, RunOrchestrator, RunSnapshot, RunStores};
pub use pass_cache::{cache_key, PassCache};
pub use pass_runner::{PassOutcome, PassRequest, PassRunner};
pub use planner::Planner;
pub use pricing::PricingTable;
pub use solver_pool::{SolveContext, SolverPool};
pub use verifier::{Selection, Verifier};

/// Pull the JSON object out of a model reply that may wrap it in a code
/// fence or surrounding prose.
pub fn extract_json_from_response(response: &str) -> &str {
    let trimmed = response.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```").trim())
        .unwrap_or(trimmed);

    match (unfenced.find('{'), unfenced.rfind('}')) {
        (Some(start), Some(end)) if start < end => &unfenced[start..=end],
        _ => unfenced,
    }
}
