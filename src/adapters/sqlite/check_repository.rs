//! SQLite implementation of the CheckRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{format_datetime, parse_datetime, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Check, CheckKind, CheckStatus};
use crate::domain::ports::CheckRepository;

#[derive(Clone)]
pub struct SqliteCheckRepository {
    pool: SqlitePool,
}

impl SqliteCheckRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckRepository for SqliteCheckRepository {
    async fn insert_batch(&self, checks: &[Check]) -> DomainResult<()> {
        let mut tx = self.pool.begin().await?;

        for check in checks {
            sqlx::query(
                r#"INSERT INTO checks (id, run_id, verifier_pass_id, candidate_pass_id, name, kind,
                   status, score, reasoning, created_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#
            )
            .bind(check.id.to_string())
            .bind(check.run_id.to_string())
            .bind(check.verifier_pass_id.to_string())
            .bind(check.candidate_pass_id.to_string())
            .bind(&check.name)
            .bind(check.kind.as_str())
            .bind(check.status.as_str())
            .bind(check.score)
            .bind(&check.reasoning)
            .bind(format_datetime(check.created_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_by_run(&self, run_id: Uuid) -> DomainResult<Vec<Check>> {
        let rows: Vec<CheckRow> = sqlx::query_as(
            r#"SELECT id, run_id, verifier_pass_id, candidate_pass_id, name, kind, status, score,
               reasoning, created_at
               FROM checks WHERE run_id = ? ORDER BY created_at, rowid"#
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }
}

#[derive(sqlx::FromRow)]
struct CheckRow {
    id: String,
    run_id: String,
    verifier_pass_id: String,
    candidate_pass_id: String,
    name: String,
    kind: String,
    status: String,
    score: Option<f64>,
    reasoning: String,
    created_at: String,
}

impl TryFrom<CheckRow> for Check {
    type Error = DomainError;

    fn try_from(row: CheckRow) -> Result<Self, Self::Error> {
        let kind = CheckKind::from_str(&row.kind)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid check kind: {}", row.kind)))?;
        let status = CheckStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid check status: {}", row.status)))?;

        Ok(Check {
            id: parse_uuid(&row.id)?,
            run_id: parse_uuid(&row.run_id)?,
            verifier_pass_id: parse_uuid(&row.verifier_pass_id)?,
            candidate_pass_id: parse_uuid(&row.candidate_pass_id)?,
            name: row.name,
            kind,
            status,
            score: row.score,
            reasoning: row.reasoning,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}
