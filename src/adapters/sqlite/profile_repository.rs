//! SQLite implementation of the ProfileRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use super::{format_datetime, parse_datetime};
use crate::domain::errors::DomainResult;
use crate::domain::models::UserProfile;
use crate::domain::ports::ProfileRepository;

#[derive(Clone)]
pub struct SqliteProfileRepository {
    pool: SqlitePool,
}

impl SqliteProfileRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileRepository for SqliteProfileRepository {
    async fn get(&self, user_id: &str) -> DomainResult<Option<UserProfile>> {
        let row: Option<(String, String, i64, String, String)> = sqlx::query_as(
            "SELECT user_id, default_lane, budget_cap_nanos, provisioned_by, created_at FROM user_profiles WHERE user_id = ?"
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((user_id, default_lane, budget_cap_nanos, provisioned_by, created_at)) = row else {
            return Ok(None);
        };

        Ok(Some(UserProfile {
            user_id,
            default_lane,
            budget_cap_nanos,
            provisioned_by,
            created_at: parse_datetime(&created_at)?,
        }))
    }

    async fn insert_if_absent(&self, profile: &UserProfile) -> DomainResult<bool> {
        let result = sqlx::query(
            r#"INSERT OR IGNORE INTO user_profiles (user_id, default_lane, budget_cap_nanos, provisioned_by, created_at)
               VALUES (?, ?, ?, ?, ?)"#
        )
        .bind(&profile.user_id)
        .bind(&profile.default_lane)
        .bind(profile.budget_cap_nanos)
        .bind(&profile.provisioned_by)
        .bind(format_datetime(profile.created_at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
