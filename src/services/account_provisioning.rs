//! Account provisioning.
//!
//! Default per-user records are created by an explicit service action at
//! account-creation time. Writing a profile for another user bypasses the
//! per-user access boundary, so the caller must hold an [`ElevatedAuthority`],
//! which can only be obtained through [`ElevatedAuthority::assume`] and is
//! always logged.

use chrono::Utc;
use std::sync::Arc;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Config, UserProfile};
use crate::domain::ports::ProfileRepository;

/// Proof that the caller deliberately stepped outside per-user access rules.
#[derive(Debug)]
pub struct ElevatedAuthority {
    actor: String,
    reason: String,
}

impl ElevatedAuthority {
    pub fn assume(actor: impl Into<String>, reason: impl Into<String>) -> Self {
        let authority = Self {
            actor: actor.into(),
            reason: reason.into(),
        };
        tracing::warn!(
            actor = %authority.actor,
            reason = %authority.reason,
            "elevated authority assumed"
        );
        authority
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionOutcome {
    pub profile: UserProfile,
    /// False when the user already had a profile
    pub created: bool,
}

#[derive(Clone)]
pub struct AccountProvisioner {
    profiles: Arc<dyn ProfileRepository>,
    default_lane: String,
    default_budget_cap_nanos: i64,
}

impl AccountProvisioner {
    pub fn new(profiles: Arc<dyn ProfileRepository>, config: &Config) -> Self {
        let default_budget_cap_nanos = config
            .lane(None)
            .map(|lane| lane.budget_cap_nanos())
            .unwrap_or_default();
        Self {
            profiles,
            default_lane: config.default_lane.clone(),
            default_budget_cap_nanos,
        }
    }

    /// Create the default profile for `user_id` if none exists. Safe to call
    /// repeatedly; an existing profile is returned untouched.
    pub async fn provision(&self, authority: &ElevatedAuthority, user_id: &str) -> DomainResult<ProvisionOutcome> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(DomainError::ValidationFailed("user id must not be empty".to_string()));
        }

        let profile = UserProfile {
            user_id: user_id.to_string(),
            default_lane: self.default_lane.clone(),
            budget_cap_nanos: self.default_budget_cap_nanos,
            provisioned_by: authority.actor().to_string(),
            created_at: Utc::now(),
        };
        let created = self.profiles.insert_if_absent(&profile).await?;

        let profile = if created {
            tracing::info!(user_id, actor = authority.actor(), "user profile provisioned");
            profile
        } else {
            self.profiles
                .get(user_id)
                .await?
                .ok_or_else(|| DomainError::ExecutionFailed(format!("profile for {} vanished", user_id)))?
        };

        Ok(ProvisionOutcome { profile, created })
    }

    pub async fn profile(&self, user_id: &str) -> DomainResult<Option<UserProfile>> {
        self.profiles.get(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteProfileRepository};

    async fn provisioner() -> AccountProvisioner {
        let pool = create_migrated_test_pool().await.unwrap();
        AccountProvisioner::new(Arc::new(SqliteProfileRepository::new(pool)), &Config::default())
    }

    #[tokio::test]
    async fn test_provision_is_idempotent() {
        let provisioner = provisioner().await;
        let authority = ElevatedAuthority::assume("cli", "first run");

        let first = provisioner.provision(&authority, "alice").await.unwrap();
        assert!(first.created);
        assert_eq!(first.profile.provisioned_by, "cli");
        assert_eq!(first.profile.default_lane, Config::default().default_lane);

        let again = ElevatedAuthority::assume("admin", "retry");
        let second = provisioner.provision(&again, "alice").await.unwrap();
        assert!(!second.created);
        assert_eq!(second.profile.provisioned_by, "cli");
    }

    #[tokio::test]
    async fn test_provision_rejects_blank_user() {
        let provisioner = provisioner().await;
        let authority = ElevatedAuthority::assume("cli", "test");
        assert!(matches!(
            provisioner.provision(&authority, "  ").await,
            Err(DomainError::ValidationFailed(_))
        ));
        assert!(provisioner.profile("nobody").await.unwrap().is_none());
    }
}
