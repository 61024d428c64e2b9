//! Evidence stage: retrieve from every lane-selected source, then rerank,
//! deduplicate and persist as artifacts.
//!
//! Source failures never fail the run. They are logged, recorded on the
//! retriever pass and stored as `error` artifacts (E1, E2, ...).

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    Artifact, LaneConfig, Pass, PassOutput, PassType, RankedRef, SourceType,
};
use crate::domain::ports::{ArtifactRepository, EvidenceSource, PassRepository, SourceError};
use crate::domain::text::{normalize_whitespace, term_overlap, terms};
use crate::services::pass_cache::{cache_key, CachedOutput, PassCache};

const RETRIEVER_MODEL: &str = "source-search";
const RERANKER_MODEL: &str = "lexical-overlap";

/// A raw snippet tagged with the source that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedSnippet {
    pub source_id: String,
    pub source_type: SourceType,
    pub uri: String,
    pub text: String,
    pub location: Option<String>,
}

/// A deduplicated snippet with its relevance to the goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedSnippet {
    pub content_hash: String,
    pub relevance: f64,
    pub snippet: RetrievedSnippet,
}

/// Evidence available to the solvers and the verifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvidenceSet {
    /// Citable artifacts in reference order (R1 first).
    pub artifacts: Vec<Artifact>,
    /// Recorded source failures (E1..).
    pub errors: Vec<Artifact>,
}

impl EvidenceSet {
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn get(&self, ref_id: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.ref_id == ref_id)
    }

    /// Stable identity of the evidence content, used in solver cache keys.
    pub fn fingerprint(&self) -> String {
        self.artifacts
            .iter()
            .map(|a| format!("{}={}", a.ref_id, a.content_hash))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Rebuild from persisted artifacts.
    pub fn from_artifacts(all: Vec<Artifact>) -> Self {
        let (artifacts, errors): (Vec<Artifact>, Vec<Artifact>) =
            all.into_iter().partition(|a| a.is_citable());
        Self { artifacts, errors }
    }
}

/// Hash of a snippet's normalized text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_whitespace(text).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Score, deduplicate and order snippets. Identical content collapses into one
/// entry keeping the highest relevance; ties in relevance keep retrieval order.
pub fn rerank(goal: &str, snippets: &[RetrievedSnippet], max_evidence: usize) -> Vec<RankedSnippet> {
    let goal_terms = terms(goal);
    let mut ranked: Vec<RankedSnippet> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for snippet in snippets {
        let hash = content_hash(&snippet.text);
        let relevance = term_overlap(&goal_terms, &snippet.text);
        match positions.get(&hash) {
            Some(&i) => {
                if relevance > ranked[i].relevance {
                    ranked[i].relevance = relevance;
                    ranked[i].snippet = snippet.clone();
                }
            }
            None => {
                positions.insert(hash.clone(), ranked.len());
                ranked.push(RankedSnippet {
                    content_hash: hash,
                    relevance,
                    snippet: snippet.clone(),
                });
            }
        }
    }

    // Vec::sort_by is stable, so equal scores keep first-seen order.
    ranked.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
    ranked.truncate(max_evidence);
    ranked
}

#[derive(Clone)]
pub struct EvidenceGatherer {
    sources: Vec<Arc<dyn EvidenceSource>>,
    passes: Arc<dyn PassRepository>,
    artifacts: Arc<dyn ArtifactRepository>,
    cache: PassCache,
}

impl EvidenceGatherer {
    pub fn new(
        sources: Vec<Arc<dyn EvidenceSource>>,
        passes: Arc<dyn PassRepository>,
        artifacts: Arc<dyn ArtifactRepository>,
        cache: PassCache,
    ) -> Self {
        Self {
            sources,
            passes,
            artifacts,
            cache,
        }
    }

    /// Retrieve, rerank and persist evidence for a run.
    pub async fn gather(&self, run_id: Uuid, goal: &str, lane: &LaneConfig) -> DomainResult<EvidenceSet> {
        let cache_input = format!("{}\n{}", goal, lane.source_filter());

        let (snippets, failures) = self.retrieve(run_id, goal, lane, &cache_input).await?;
        let ranked = self
            .rerank_pass(run_id, goal, lane, &cache_input, &snippets, !failures.is_empty())
            .await?;

        let now = Utc::now();
        let mut evidence = EvidenceSet::default();
        for (i, entry) in ranked.into_iter().enumerate() {
            evidence.artifacts.push(Artifact {
                id: Uuid::new_v4(),
                run_id,
                ref_id: format!("R{}", i + 1),
                source_type: entry.snippet.source_type,
                source_uri: entry.snippet.uri,
                content_hash: entry.content_hash,
                snippet: normalize_whitespace(&entry.snippet.text),
                location: entry.snippet.location,
                relevance: entry.relevance,
                created_at: now,
            });
        }
        for (i, failure) in failures.iter().enumerate() {
            evidence.errors.push(Artifact {
                id: Uuid::new_v4(),
                run_id,
                ref_id: format!("E{}", i + 1),
                source_type: SourceType::Error,
                source_uri: format!("source://{}", failure.source_id),
                content_hash: content_hash(&format!("error\n{}\n{}", failure.source_id, failure.message)),
                snippet: failure.message.clone(),
                location: None,
                relevance: 0.0,
                created_at: now,
            });
        }

        let batch: Vec<Artifact> = evidence
            .artifacts
            .iter()
            .chain(evidence.errors.iter())
            .cloned()
            .collect();
        self.artifacts.insert_batch(&batch).await?;

        tracing::info!(
            run_id = %run_id,
            evidence = evidence.artifacts.len(),
            source_errors = evidence.errors.len(),
            "evidence gathered"
        );
        Ok(evidence)
    }

    async fn retrieve(
        &self,
        run_id: Uuid,
        goal: &str,
        lane: &LaneConfig,
        cache_input: &str,
    ) -> DomainResult<(Vec<RetrievedSnippet>, Vec<SourceError>)> {
        let started = Instant::now();
        let key = cache_key(PassType::Retriever, cache_input);
        let selected: Vec<&Arc<dyn EvidenceSource>> = self
            .sources
            .iter()
            .filter(|s| lane.uses_source(s.source_id()))
            .collect();
        let source_ids: Vec<String> = selected.iter().map(|s| s.source_id().to_string()).collect();
        let snapshot = json!({ "goal": goal, "sources": source_ids });

        if let Some(snippets) = self.cached::<Vec<RetrievedSnippet>>(&key).await {
            let pass = Pass::new(Uuid::new_v4(), run_id, PassType::Retriever, RETRIEVER_MODEL)
                .with_input(snapshot)
                .from_cache()
                .with_latency_ms(elapsed_ms(started))
                .succeeded(PassOutput::Retrieval {
                    snippet_count: snippets.len(),
                    sources: source_ids,
                    failures: Vec::new(),
                });
            self.passes.insert(&pass).await?;
            return Ok((snippets, Vec::new()));
        }

        let results = join_all(selected.iter().map(|source| async move {
            let source_type = source.source_type();
            source.search(goal).await.map(|hits| {
                hits.into_iter()
                    .map(|hit| RetrievedSnippet {
                        source_id: source.source_id().to_string(),
                        source_type,
                        uri: hit.uri,
                        text: hit.text,
                        location: hit.location,
                    })
                    .collect::<Vec<_>>()
            })
        }))
        .await;

        let mut snippets = Vec::new();
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(hits) => snippets.extend(hits),
                Err(err) => {
                    tracing::warn!(run_id = %run_id, source = %err.source_id, error = %err.message, "evidence source failed");
                    failures.push(err);
                }
            }
        }

        let pass = Pass::new(Uuid::new_v4(), run_id, PassType::Retriever, RETRIEVER_MODEL)
            .with_input(snapshot)
            .with_latency_ms(elapsed_ms(started))
            .succeeded(PassOutput::Retrieval {
                snippet_count: snippets.len(),
                sources: source_ids,
                failures: failures.iter().map(|f| f.to_string()).collect(),
            });
        self.passes.insert(&pass).await?;

        // A degraded retrieval is not worth replaying.
        if failures.is_empty() {
            self.store(&key, PassType::Retriever, RETRIEVER_MODEL, &snippets).await;
        }
        Ok((snippets, failures))
    }

    async fn rerank_pass(
        &self,
        run_id: Uuid,
        goal: &str,
        lane: &LaneConfig,
        cache_input: &str,
        snippets: &[RetrievedSnippet],
        degraded: bool,
    ) -> DomainResult<Vec<RankedSnippet>> {
        let started = Instant::now();
        let key = cache_key(
            PassType::Reranker,
            &format!("{}\n{}\n{}", cache_input, lane.max_evidence, snippet_fingerprint(snippets)),
        );
        let snapshot = json!({ "goal": goal, "candidates": snippets.len(), "max_evidence": lane.max_evidence });

        let (ranked, cache_hit) = match self.cached::<Vec<RankedSnippet>>(&key).await {
            Some(ranked) => (ranked, true),
            None => (rerank(goal, snippets, lane.max_evidence), false),
        };

        let mut pass = Pass::new(Uuid::new_v4(), run_id, PassType::Reranker, RERANKER_MODEL)
            .with_input(snapshot)
            .with_latency_ms(elapsed_ms(started));
        if cache_hit {
            pass = pass.from_cache();
        }
        let pass = pass.succeeded(PassOutput::Rerank {
            ranked: ranked
                .iter()
                .map(|r| RankedRef {
                    content_hash: r.content_hash.clone(),
                    relevance: r.relevance,
                })
                .collect(),
        });
        self.passes.insert(&pass).await?;

        if !cache_hit && !degraded && !snippets.is_empty() {
            self.store(&key, PassType::Reranker, RERANKER_MODEL, &ranked).await;
        }
        Ok(ranked)
    }

    async fn cached<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.cache.lookup(key).await {
            Ok(Some(entry)) => serde_json::from_value(entry.payload).ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(cache_key = %key, error = %e, "cache lookup failed");
                None
            }
        }
    }

    async fn store<T: Serialize>(&self, key: &str, pass_type: PassType, model: &str, value: &T) {
        let Ok(payload) = serde_json::to_value(value) else {
            return;
        };
        let output = CachedOutput {
            payload,
            model: model.to_string(),
            input_tokens: 0,
            output_tokens: 0,
        };
        if let Err(e) = self.cache.store(key, pass_type, output).await {
            tracing::warn!(cache_key = %key, error = %e, "cache store failed");
        }
    }
}

/// Hash over the retrieved candidates, so a changed corpus misses the
/// reranker cache.
fn snippet_fingerprint(snippets: &[RetrievedSnippet]) -> String {
    let joined = snippets
        .iter()
        .map(|s| format!("{}={}", s.uri, content_hash(&s.text)))
        .collect::<Vec<_>>()
        .join("\n");
    content_hash(&joined)
}

fn elapsed_ms(started: Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}
