use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::Pass;

/// Repository port for pass records.
#[async_trait]
pub trait PassRepository: Send + Sync {
    async fn insert(&self, pass: &Pass) -> DomainResult<()>;

    async fn get(&self, id: Uuid) -> DomainResult<Option<Pass>>;

    /// All passes of a run in creation order.
    async fn list_by_run(&self, run_id: Uuid) -> DomainResult<Vec<Pass>>;
}
