//! SQLite implementation of the CacheRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::{format_datetime, parse_datetime};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{CacheEntry, PassType};
use crate::domain::ports::CacheRepository;

#[derive(Clone)]
pub struct SqliteCacheRepository {
    pool: SqlitePool,
}

impl SqliteCacheRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CacheRepository for SqliteCacheRepository {
    async fn get(&self, cache_key: &str, now: DateTime<Utc>) -> DomainResult<Option<CacheEntry>> {
        let row: Option<CacheRow> = sqlx::query_as(
            r#"SELECT cache_key, pass_type, payload, model, input_tokens, output_tokens, created_at, expires_at
               FROM pass_cache WHERE cache_key = ? AND expires_at > ?"#
        )
        .bind(cache_key)
        .bind(format_datetime(now))
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.try_into()).transpose()
    }

    async fn put(&self, entry: &CacheEntry) -> DomainResult<()> {
        let payload = serde_json::to_string(&entry.payload)?;

        sqlx::query(
            r#"INSERT INTO pass_cache (cache_key, pass_type, payload, model, input_tokens, output_tokens, created_at, expires_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (cache_key) DO UPDATE SET
                   pass_type = excluded.pass_type,
                   payload = excluded.payload,
                   model = excluded.model,
                   input_tokens = excluded.input_tokens,
                   output_tokens = excluded.output_tokens,
                   created_at = excluded.created_at,
                   expires_at = excluded.expires_at"#
        )
        .bind(&entry.cache_key)
        .bind(entry.pass_type.as_str())
        .bind(payload)
        .bind(&entry.model)
        .bind(entry.input_tokens)
        .bind(entry.output_tokens)
        .bind(format_datetime(entry.created_at))
        .bind(format_datetime(entry.expires_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> DomainResult<u64> {
        let result = sqlx::query("DELETE FROM pass_cache WHERE expires_at <= ?")
            .bind(format_datetime(now))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct CacheRow {
    cache_key: String,
    pass_type: String,
    payload: String,
    model: String,
    input_tokens: i64,
    output_tokens: i64,
    created_at: String,
    expires_at: String,
}

impl TryFrom<CacheRow> for CacheEntry {
    type Error = DomainError;

    fn try_from(row: CacheRow) -> Result<Self, Self::Error> {
        let pass_type = PassType::from_str(&row.pass_type)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid pass type: {}", row.pass_type)))?;

        Ok(CacheEntry {
            cache_key: row.cache_key,
            pass_type,
            payload: serde_json::from_str(&row.payload)?,
            model: row.model,
            input_tokens: row.input_tokens,
            output_tokens: row.output_tokens,
            created_at: parse_datetime(&row.created_at)?,
            expires_at: parse_datetime(&row.expires_at)?,
        })
    }
}
