//! SQLite database adapters for the DeepThink pipeline.

pub mod artifact_repository;
pub mod cache_repository;
pub mod check_repository;
pub mod connection;
pub mod cost_ledger_repository;
pub mod migrations;
pub mod pass_repository;
pub mod profile_repository;
pub mod run_repository;

pub use artifact_repository::SqliteArtifactRepository;
pub use cache_repository::SqliteCacheRepository;
pub use check_repository::SqliteCheckRepository;
pub use connection::{
    create_pool, create_test_pool, database_url, verify_connection, ConnectionError, PoolConfig,
};
pub use cost_ledger_repository::SqliteCostLedgerRepository;
pub use migrations::{all_embedded_migrations, Migration, MigrationError, Migrator};
pub use pass_repository::SqlitePassRepository;
pub use profile_repository::SqliteProfileRepository;
pub use run_repository::SqliteRunRepository;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};

/// Format a timestamp for storage.
///
/// Fixed width (microseconds, `Z` suffix) so that lexical order in SQL
/// matches chronological order.
pub fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a UUID string from a SQLite row field.
pub fn parse_uuid(s: &str) -> DomainResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| DomainError::SerializationError(e.to_string()))
}

/// Parse an RFC3339 datetime string from a SQLite row field.
pub fn parse_datetime(s: &str) -> DomainResult<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map_err(|e| DomainError::SerializationError(e.to_string()))
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse an optional RFC3339 datetime string from a SQLite row field.
pub fn parse_optional_datetime(s: Option<String>) -> DomainResult<Option<DateTime<Utc>>> {
    s.map(|s| parse_datetime(&s)).transpose()
}

/// Parse an optional JSON column.
pub fn parse_optional_json<T: serde::de::DeserializeOwned>(s: Option<String>) -> DomainResult<Option<T>> {
    s.map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| DomainError::SerializationError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
    #[error("Query error: {0}")]
    Query(#[from] sqlx::Error),
}

pub async fn initialize_database(database_url: &str, config: Option<PoolConfig>) -> Result<SqlitePool, DatabaseError> {
    let pool = create_pool(database_url, config).await?;
    let migrator = Migrator::new(pool.clone());
    migrator.run_embedded_migrations(all_embedded_migrations()).await?;
    Ok(pool)
}

/// Create an in-memory test pool with all migrations applied.
pub async fn create_migrated_test_pool() -> Result<SqlitePool, DatabaseError> {
    let pool = create_test_pool().await?;
    let migrator = Migrator::new(pool.clone());
    migrator.run_embedded_migrations(all_embedded_migrations()).await?;
    Ok(pool)
}

/// All repositories over one pool.
#[derive(Clone)]
pub struct SqliteRepositories {
    pub runs: SqliteRunRepository,
    pub passes: SqlitePassRepository,
    pub artifacts: SqliteArtifactRepository,
    pub checks: SqliteCheckRepository,
    pub cache: SqliteCacheRepository,
    pub costs: SqliteCostLedgerRepository,
    pub profiles: SqliteProfileRepository,
}

impl SqliteRepositories {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            runs: SqliteRunRepository::new(pool.clone()),
            passes: SqlitePassRepository::new(pool.clone()),
            artifacts: SqliteArtifactRepository::new(pool.clone()),
            checks: SqliteCheckRepository::new(pool.clone()),
            cache: SqliteCacheRepository::new(pool.clone()),
            costs: SqliteCostLedgerRepository::new(pool.clone()),
            profiles: SqliteProfileRepository::new(pool),
        }
    }
}
