//! Evidence source port.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::models::SourceType;

/// An unprocessed search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSnippet {
    pub uri: String,
    pub text: String,
    pub location: Option<String>,
}

/// A failed source query. Never fatal to a run.
#[derive(Debug, Clone, Error)]
#[error("source {source_id} failed: {message}")]
pub struct SourceError {
    pub source_id: String,
    pub message: String,
}

#[async_trait]
pub trait EvidenceSource: Send + Sync {
    fn source_id(&self) -> &str;

    fn source_type(&self) -> SourceType;

    async fn search(&self, query: &str) -> Result<Vec<RawSnippet>, SourceError>;
}
