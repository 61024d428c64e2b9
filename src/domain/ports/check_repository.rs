use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::Check;

#[async_trait]
pub trait CheckRepository: Send + Sync {
    async fn insert_batch(&self, checks: &[Check]) -> DomainResult<()>;

    async fn list_by_run(&self, run_id: Uuid) -> DomainResult<Vec<Check>>;
}
