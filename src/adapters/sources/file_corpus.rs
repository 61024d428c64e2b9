//! Evidence source over a directory of text files.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::domain::models::SourceType;
use crate::domain::ports::{EvidenceSource, RawSnippet, SourceError};
use crate::domain::text::{normalize_whitespace, term_overlap, terms};

const CORPUS_EXTENSIONS: [&str; 3] = ["txt", "md", "markdown"];

/// Serves paragraphs of the `.txt`/`.md` files directly under a directory
/// that share at least one term with the query.
pub struct FileCorpusSource {
    id: String,
    dir: PathBuf,
}

impl FileCorpusSource {
    pub fn new(id: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            dir: dir.into(),
        }
    }

    fn error(&self, message: impl Into<String>) -> SourceError {
        SourceError {
            source_id: self.id.clone(),
            message: message.into(),
        }
    }

    async fn corpus_files(&self) -> Result<Vec<PathBuf>, SourceError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| self.error(format!("cannot read {}: {}", self.dir.display(), e)))?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| self.error(e.to_string()))? {
            let path = entry.path();
            if path.is_file() && has_corpus_extension(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

fn has_corpus_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| CORPUS_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

#[async_trait]
impl EvidenceSource for FileCorpusSource {
    fn source_id(&self) -> &str {
        &self.id
    }

    fn source_type(&self) -> SourceType {
        SourceType::File
    }

    async fn search(&self, query: &str) -> Result<Vec<RawSnippet>, SourceError> {
        let query_terms = terms(query);
        let mut snippets = Vec::new();

        for path in self.corpus_files().await? {
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| self.error(format!("cannot read {}: {}", path.display(), e)))?;

            for (index, paragraph) in content.split("\n\n").enumerate() {
                let text = normalize_whitespace(paragraph);
                if text.is_empty() || term_overlap(&query_terms, &text) == 0.0 {
                    continue;
                }
                snippets.push(RawSnippet {
                    uri: format!("file://{}", path.display()),
                    text,
                    location: Some(format!("paragraph {}", index + 1)),
                });
            }
        }

        tracing::debug!(source = %self.id, hits = snippets.len(), "corpus search complete");
        Ok(snippets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_search_returns_matching_paragraphs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("storage.md"),
            "LSM trees batch writes into sorted runs.\n\nCompaction merges runs.\n\nUnrelated trivia.",
        )
        .unwrap();
        std::fs::write(dir.path().join("ignored.bin"), "LSM trees").unwrap();

        let source = FileCorpusSource::new("corpus", dir.path());
        let hits = source.search("How does LSM compaction work?").await.unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].location.as_deref(), Some("paragraph 1"));
        assert!(hits[1].text.contains("Compaction"));
    }

    #[tokio::test]
    async fn test_missing_directory_is_a_source_error() {
        let source = FileCorpusSource::new("corpus", "/definitely/not/here");
        let err = source.search("anything").await.unwrap_err();
        assert_eq!(err.source_id, "corpus");
    }
}
