//! In-memory evidence source.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::domain::models::SourceType;
use crate::domain::ports::{EvidenceSource, RawSnippet, SourceError};

/// Returns a fixed set of snippets for every query, or a scripted failure.
pub struct StaticSource {
    id: String,
    source_type: SourceType,
    snippets: Vec<RawSnippet>,
    failure: Option<String>,
    searches: AtomicUsize,
}

impl StaticSource {
    pub fn new(id: impl Into<String>, source_type: SourceType, snippets: Vec<RawSnippet>) -> Self {
        Self {
            id: id.into(),
            source_type,
            snippets,
            failure: None,
            searches: AtomicUsize::new(0),
        }
    }

    /// A source whose every search fails with `message`.
    pub fn failing(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::new(id, SourceType::Web, Vec::new())
        }
    }

    /// Convenience for building snippets.
    pub fn snippet(uri: &str, text: &str) -> RawSnippet {
        RawSnippet {
            uri: uri.to_string(),
            text: text.to_string(),
            location: None,
        }
    }

    pub fn search_count(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EvidenceSource for StaticSource {
    fn source_id(&self) -> &str {
        &self.id
    }

    fn source_type(&self) -> SourceType {
        self.source_type
    }

    async fn search(&self, _query: &str) -> Result<Vec<RawSnippet>, SourceError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(message) => Err(SourceError {
                source_id: self.id.clone(),
                message: message.clone(),
            }),
            None => Ok(self.snippets.clone()),
        }
    }
}
