//! Errors raised inside the reasoning pipeline.

use std::time::Duration;
use thiserror::Error;

use crate::domain::errors::DomainError;
use crate::domain::models::Stage;
use crate::domain::ports::ProviderError;

/// Why a single pass failed. Recorded on the pass row, never fatal by itself.
#[derive(Debug, Clone, Error)]
pub enum PassError {
    #[error(transparent)]
    Provider(ProviderError),

    #[error("schema violation: {0}")]
    Schema(String),

    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

/// Errors that end a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    BudgetExceeded(String),

    #[error("schema violation: {0}")]
    SchemaViolation(String),

    #[error("no viable candidates")]
    NoViableCandidates,

    #[error("{stage} failed: {reason}")]
    StageFailed { stage: Stage, reason: String },

    #[error("run cancelled")]
    Cancelled,

    #[error(transparent)]
    Domain(#[from] DomainError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
