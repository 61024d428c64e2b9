use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Run, RunStatus, RunTransition};

/// Filters for listing runs
#[derive(Default, Debug, Clone)]
pub struct RunFilter {
    pub user_id: Option<String>,
    pub status: Option<RunStatus>,
    pub limit: Option<i64>,
}

/// Repository port for run persistence
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Insert a new run
    async fn create(&self, run: &Run) -> DomainResult<()>;

    /// Get a run by ID
    async fn get(&self, id: Uuid) -> DomainResult<Option<Run>>;

    /// Apply a lifecycle transition.
    ///
    /// The update is conditional on the run currently being in one of the
    /// target status's allowed predecessors; returns `false` when the run had
    /// already moved on (e.g. a terminal row is never rewritten).
    async fn transition(&self, id: Uuid, transition: &RunTransition) -> DomainResult<bool>;

    /// Atomically add usage to the run's accumulated totals.
    ///
    /// Idempotent per `charge_id`: a repeated charge is ignored and returns
    /// `false`. The totals are updated with a single `x = x + ?` statement.
    async fn increment_totals(
        &self,
        run_id: Uuid,
        charge_id: Uuid,
        tokens: i64,
        cost_nanos: i64,
        latency_ms: i64,
    ) -> DomainResult<bool>;

    /// List runs, newest first
    async fn list(&self, filter: RunFilter) -> DomainResult<Vec<Run>>;
}
