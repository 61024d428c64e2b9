//! SQLite implementation of the PassRepository.

use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{format_datetime, parse_datetime, parse_optional_json, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Pass, PassStatus, PassType};
use crate::domain::ports::PassRepository;

const PASS_COLUMNS: &str = "id, run_id, pass_type, model, status, input_snapshot, output_snapshot, \
    error, candidate_index, is_winner, cache_hit, latency_ms, params, input_tokens, output_tokens, created_at";

#[derive(Clone)]
pub struct SqlitePassRepository {
    pool: SqlitePool,
}

impl SqlitePassRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Flag `pass_id` as the winner of `run_id` on `conn`.
///
/// Re-marking the current winner is a no-op. Fails with
/// `WinnerAlreadySelected` if another pass already won and with
/// `ValidationFailed` if the pass is not a succeeded solver pass of the run.
/// Runs inside the run's success transition.
pub(super) async fn apply_winner(conn: &mut SqliteConnection, run_id: Uuid, pass_id: Uuid) -> DomainResult<()> {
    let current: Option<(String,)> = sqlx::query_as("SELECT id FROM passes WHERE run_id = ? AND is_winner = 1")
        .bind(run_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    if let Some((winner,)) = current {
        if parse_uuid(&winner)? == pass_id {
            return Ok(());
        }
        return Err(DomainError::WinnerAlreadySelected(run_id));
    }

    let result = sqlx::query(
        r#"UPDATE passes SET is_winner = 1
           WHERE id = ? AND run_id = ? AND pass_type = 'solver' AND status = 'succeeded'"#
    )
    .bind(pass_id.to_string())
    .bind(run_id.to_string())
    .execute(&mut *conn)
    .await;

    let result = match result {
        Ok(result) => result,
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            return Err(DomainError::WinnerAlreadySelected(run_id));
        }
        Err(e) => return Err(e.into()),
    };

    if result.rows_affected() == 0 {
        let row: Option<(String, String)> = sqlx::query_as("SELECT status, pass_type FROM passes WHERE id = ?")
            .bind(pass_id.to_string())
            .fetch_optional(&mut *conn)
            .await?;
        return match row {
            None => Err(DomainError::PassNotFound(pass_id)),
            Some((status, pass_type)) => Err(DomainError::ValidationFailed(format!(
                "pass {pass_id} ({status} {pass_type}) cannot win run {run_id}"
            ))),
        };
    }

    Ok(())
}

#[async_trait]
impl PassRepository for SqlitePassRepository {
    async fn insert(&self, pass: &Pass) -> DomainResult<()> {
        let input_json = serde_json::to_string(&pass.input_snapshot)?;
        let output_json = pass.output.as_ref().map(serde_json::to_string).transpose()?;
        let params_json = pass.params.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"INSERT INTO passes (id, run_id, pass_type, model, status, input_snapshot, output_snapshot,
               error, candidate_index, is_winner, cache_hit, latency_ms, params, input_tokens,
               output_tokens, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#
        )
        .bind(pass.id.to_string())
        .bind(pass.run_id.to_string())
        .bind(pass.pass_type.as_str())
        .bind(&pass.model)
        .bind(pass.status.as_str())
        .bind(input_json)
        .bind(output_json)
        .bind(&pass.error)
        .bind(i64::from(pass.candidate_index))
        .bind(pass.is_winner)
        .bind(pass.cache_hit)
        .bind(pass.latency_ms)
        .bind(params_json)
        .bind(pass.input_tokens)
        .bind(pass.output_tokens)
        .bind(format_datetime(pass.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Pass>> {
        let row: Option<PassRow> = sqlx::query_as(&format!("SELECT {PASS_COLUMNS} FROM passes WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.try_into()).transpose()
    }

    async fn list_by_run(&self, run_id: Uuid) -> DomainResult<Vec<Pass>> {
        let rows: Vec<PassRow> = sqlx::query_as(&format!(
            "SELECT {PASS_COLUMNS} FROM passes WHERE run_id = ? ORDER BY created_at, candidate_index"
        ))
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

}

#[derive(sqlx::FromRow)]
struct PassRow {
    id: String,
    run_id: String,
    pass_type: String,
    model: String,
    status: String,
    input_snapshot: String,
    output_snapshot: Option<String>,
    error: Option<String>,
    candidate_index: i64,
    is_winner: bool,
    cache_hit: bool,
    latency_ms: i64,
    params: Option<String>,
    input_tokens: i64,
    output_tokens: i64,
    created_at: String,
}

impl TryFrom<PassRow> for Pass {
    type Error = DomainError;

    fn try_from(row: PassRow) -> Result<Self, Self::Error> {
        let pass_type = PassType::from_str(&row.pass_type)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid pass type: {}", row.pass_type)))?;
        let status = PassStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid pass status: {}", row.status)))?;
        let candidate_index = u32::try_from(row.candidate_index)
            .map_err(|e| DomainError::SerializationError(e.to_string()))?;

        Ok(Pass {
            id: parse_uuid(&row.id)?,
            run_id: parse_uuid(&row.run_id)?,
            pass_type,
            model: row.model,
            status,
            input_snapshot: serde_json::from_str(&row.input_snapshot)?,
            output: parse_optional_json(row.output_snapshot)?,
            error: row.error,
            candidate_index,
            is_winner: row.is_winner,
            cache_hit: row.cache_hit,
            latency_ms: row.latency_ms,
            params: parse_optional_json(row.params)?,
            input_tokens: row.input_tokens,
            output_tokens: row.output_tokens,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}
