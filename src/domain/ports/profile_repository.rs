use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::UserProfile;

#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn get(&self, user_id: &str) -> DomainResult<Option<UserProfile>>;

    /// Insert the profile unless one exists. Returns `true` if inserted.
    async fn insert_if_absent(&self, profile: &UserProfile) -> DomainResult<bool>;
}
