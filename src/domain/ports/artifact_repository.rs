use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::Artifact;

#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    /// Insert artifacts in one transaction, skipping any whose
    /// `(run_id, content_hash)` is already stored. Returns rows inserted.
    async fn insert_batch(&self, artifacts: &[Artifact]) -> DomainResult<u64>;

    /// Artifacts of a run ordered by reference id.
    async fn list_by_run(&self, run_id: Uuid) -> DomainResult<Vec<Artifact>>;
}
