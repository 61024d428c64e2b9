//! Evidence source adapters.

pub mod file_corpus;
pub mod static_source;

pub use file_corpus::FileCorpusSource;
pub use static_source::StaticSource;

use std::sync::Arc;

use crate::domain::models::EvidenceConfig;
use crate::domain::ports::EvidenceSource;

/// Sources enabled by configuration.
pub fn build_sources(config: &EvidenceConfig) -> Vec<Arc<dyn EvidenceSource>> {
    let mut sources: Vec<Arc<dyn EvidenceSource>> = Vec::new();
    if let Some(dir) = &config.corpus_dir {
        sources.push(Arc::new(FileCorpusSource::new("corpus", dir)));
    }
    sources
}
