//! Common test utilities for integration tests
//!
//! Provides shared fixtures for building a pipeline over an in-memory
//! database and a scripted model provider.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use deepthink::adapters::providers::{ScriptedProvider, ScriptedResponse};
use deepthink::adapters::sqlite::{create_migrated_test_pool, SqliteRepositories};
use deepthink::domain::models::{Config, LaneConfig, ModelPrice};
use deepthink::domain::ports::EvidenceSource;
use deepthink::services::RunOrchestrator;

/// Create a temporary directory for test isolation
pub fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Returns the path to a SQLite database file in a temporary directory.
pub fn temp_db_path() -> (TempDir, PathBuf) {
    let dir = temp_dir();
    let db_path = dir.path().join("test.db");
    (dir, db_path)
}

/// Initializes tracing subscriber for test output.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Config with fast retries and no rate limiting in practice.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.retry.max_retries = 1;
    config.retry.initial_backoff_ms = 1;
    config.retry.max_backoff_ms = 5;
    config.rate_limit.requests_per_second = 1000.0;
    config.rate_limit.burst_size = 100;
    config
}

/// Register a flat per-model price in USD per million tokens.
pub fn price(config: &mut Config, model: &str, input_per_million: f64, output_per_million: f64) {
    config.pricing.overrides.insert(
        model.to_string(),
        ModelPrice {
            input_per_million,
            output_per_million,
        },
    );
}

/// The built-in lane with the given id.
pub fn lane(config: &Config, id: &str) -> LaneConfig {
    config.lane(Some(id)).cloned().expect("built-in lane")
}

pub struct TestPipeline {
    pub orchestrator: RunOrchestrator,
    pub repos: SqliteRepositories,
    pub provider: Arc<ScriptedProvider>,
    pub config: Config,
}

/// Orchestrator over a fresh in-memory database.
pub async fn pipeline(
    config: Config,
    provider: ScriptedProvider,
    sources: Vec<Arc<dyn EvidenceSource>>,
) -> TestPipeline {
    let pool = create_migrated_test_pool().await.expect("test pool");
    let repos = SqliteRepositories::new(pool);
    let provider = Arc::new(provider);
    let orchestrator = RunOrchestrator::new(repos.clone().into(), provider.clone(), sources, &config);
    TestPipeline {
        orchestrator,
        repos,
        provider,
        config,
    }
}

pub fn plan_json(requires_evidence: bool) -> String {
    json!({
        "goal_restatement": "Explain the behavior asked about.",
        "approach": "Summarize the mechanism, then give an example.",
        "key_considerations": ["accuracy", "brevity"],
        "estimated_steps": 2,
        "requires_evidence": requires_evidence
    })
    .to_string()
}

pub fn candidate_json(answer: &str, citations: &[&str]) -> String {
    json!({ "answer": answer, "citations": citations }).to_string()
}

pub fn judgment_json(score: f64) -> String {
    json!({ "score": score, "reasoning": "Addresses the goal." }).to_string()
}

/// Judge first, then solvers, then the planner: the judge prompt carries
/// neither the solver nor the planner marker, but solver prompts mention
/// the plan.
pub fn scripted(requires_evidence: bool, answer: &str, citations: &[&str]) -> ScriptedProvider {
    ScriptedProvider::new()
        .on("\"score\"", ScriptedResponse::success(judgment_json(0.9)))
        .on("\"citations\"", ScriptedResponse::success(candidate_json(answer, citations)))
        .on("goal_restatement", ScriptedResponse::success(plan_json(requires_evidence)))
}
