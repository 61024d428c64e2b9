//! SQLite implementation of the ArtifactRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{format_datetime, parse_datetime, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Artifact, SourceType};
use crate::domain::ports::ArtifactRepository;

#[derive(Clone)]
pub struct SqliteArtifactRepository {
    pool: SqlitePool,
}

impl SqliteArtifactRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ArtifactRepository for SqliteArtifactRepository {
    async fn insert_batch(&self, artifacts: &[Artifact]) -> DomainResult<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for artifact in artifacts {
            inserted += sqlx::query(
                r#"INSERT INTO artifacts (id, run_id, ref_id, source_type, source_uri, content_hash,
                   snippet, location, relevance, created_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                   ON CONFLICT (run_id, content_hash) DO NOTHING"#
            )
            .bind(artifact.id.to_string())
            .bind(artifact.run_id.to_string())
            .bind(&artifact.ref_id)
            .bind(artifact.source_type.as_str())
            .bind(&artifact.source_uri)
            .bind(&artifact.content_hash)
            .bind(&artifact.snippet)
            .bind(&artifact.location)
            .bind(artifact.relevance)
            .bind(format_datetime(artifact.created_at))
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn list_by_run(&self, run_id: Uuid) -> DomainResult<Vec<Artifact>> {
        // Evidence (R1..) before recorded errors (E1..), numerically within each.
        let rows: Vec<ArtifactRow> = sqlx::query_as(
            r#"SELECT id, run_id, ref_id, source_type, source_uri, content_hash, snippet, location,
               relevance, created_at
               FROM artifacts WHERE run_id = ?
               ORDER BY source_type = 'error', CAST(substr(ref_id, 2) AS INTEGER), ref_id"#
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }
}

#[derive(sqlx::FromRow)]
struct ArtifactRow {
    id: String,
    run_id: String,
    ref_id: String,
    source_type: String,
    source_uri: String,
    content_hash: String,
    snippet: String,
    location: Option<String>,
    relevance: f64,
    created_at: String,
}

impl TryFrom<ArtifactRow> for Artifact {
    type Error = DomainError;

    fn try_from(row: ArtifactRow) -> Result<Self, Self::Error> {
        let source_type = SourceType::from_str(&row.source_type)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid source type: {}", row.source_type)))?;

        Ok(Artifact {
            id: parse_uuid(&row.id)?,
            run_id: parse_uuid(&row.run_id)?,
            ref_id: row.ref_id,
            source_type,
            source_uri: row.source_uri,
            content_hash: row.content_hash,
            snippet: row.snippet,
            location: row.location,
            relevance: row.relevance,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}
