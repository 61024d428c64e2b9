//! Domain errors for the DeepThink reasoning pipeline.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors that can occur in the DeepThink system.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Run not found: {0}")]
    RunNotFound(Uuid),

    #[error("Pass not found: {0}")]
    PassNotFound(Uuid),

    #[error("Lane not found: {0}")]
    LaneNotFound(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition { from: String, to: String, reason: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Winner already selected for run {0}")]
    WinnerAlreadySelected(Uuid),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
