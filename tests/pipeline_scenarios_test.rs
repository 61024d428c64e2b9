//! End-to-end pipeline scenarios over an in-memory database and a scripted
//! model provider.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::{candidate_json, fast_config, lane, pipeline, plan_json, price, scripted, setup_test_logging};
use deepthink::adapters::providers::{ScriptedProvider, ScriptedResponse};
use deepthink::adapters::sources::StaticSource;
use deepthink::domain::models::{Pass, PassStatus, PassType, Run, RunStatus, SourceType};
use deepthink::domain::ports::{ArtifactRepository, CostLedgerRepository, EvidenceSource, PassRepository};
use deepthink::services::RunOrchestrator;
use uuid::Uuid;

const GOAL: &str = "Why does a mutable borrow prevent other borrows of the same value?";

async fn finish(orchestrator: &RunOrchestrator, run_id: Uuid) -> Run {
    tokio::time::timeout(Duration::from_secs(30), orchestrator.wait(run_id))
        .await
        .expect("run did not finish in time")
        .expect("wait failed")
}

fn solver_passes(passes: &[Pass]) -> Vec<&Pass> {
    passes.iter().filter(|p| p.pass_type == PassType::Solver).collect()
}

fn assert_single_solver_winner(passes: &[Pass]) {
    let winners: Vec<&Pass> = passes.iter().filter(|p| p.is_winner).collect();
    assert_eq!(winners.len(), 1, "exactly one winner per successful run");
    assert_eq!(winners[0].pass_type, PassType::Solver);
    assert_eq!(winners[0].status, PassStatus::Succeeded);
}

#[tokio::test]
async fn test_plan_without_evidence_skips_retrieval() {
    setup_test_logging();
    let source = Arc::new(StaticSource::new(
        "docs",
        SourceType::File,
        vec![StaticSource::snippet("file://borrow.md", "Borrowing rules in Rust.")],
    ));
    let sources: Vec<Arc<dyn EvidenceSource>> = vec![source.clone()];
    let config = fast_config();
    let p = pipeline(config.clone(), scripted(false, "Aliasing plus mutation is unsound.", &[]), sources).await;

    let run_id = p.orchestrator.submit(GOAL, lane(&config, "standard"), "alice").await.unwrap();
    let run = finish(&p.orchestrator, run_id).await;

    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(source.search_count(), 0);
    assert!(p.repos.artifacts.list_by_run(run_id).await.unwrap().is_empty());

    let passes = p.repos.passes.list_by_run(run_id).await.unwrap();
    assert_eq!(solver_passes(&passes).len(), 3);
    assert!(passes.iter().all(|p| p.pass_type != PassType::Retriever));
    assert_single_solver_winner(&passes);

    let output = run.final_output.expect("final output");
    assert_eq!(output.answer, "Aliasing plus mutation is unsound.");
    assert!(output.citations.is_empty());
    assert!(run.verify_score.is_some_and(|s| s >= 0.5));
    assert_eq!(p.provider.calls_matching("[candidate:").await, 3);
}

#[tokio::test]
async fn test_timed_out_candidate_does_not_block_the_run() {
    setup_test_logging();
    let mut config = fast_config();
    config.retry.max_retries = 0;
    let provider = ScriptedProvider::new()
        .on("\"score\"", ScriptedResponse::success(common::judgment_json(0.9)))
        .on(
            "[candidate:2]",
            ScriptedResponse::success(candidate_json("late", &[])).with_delay(Duration::from_secs(5)),
        )
        .on("\"citations\"", ScriptedResponse::success(candidate_json("on time", &[])))
        .on("goal_restatement", ScriptedResponse::success(plan_json(false)));
    let p = pipeline(config.clone(), provider, Vec::new()).await;

    let mut standard = lane(&config, "standard");
    standard.solver_timeout_secs = 1;
    let run_id = p.orchestrator.submit(GOAL, standard, "alice").await.unwrap();
    let run = finish(&p.orchestrator, run_id).await;

    assert_eq!(run.status, RunStatus::Success);
    let passes = p.repos.passes.list_by_run(run_id).await.unwrap();
    let solvers = solver_passes(&passes);
    assert_eq!(solvers.len(), 3);

    let late = solvers.iter().find(|p| p.candidate_index == 2).expect("candidate 2 recorded");
    assert_eq!(late.status, PassStatus::Failed);
    assert!(!late.is_winner);
    assert!(late.error.is_some());

    assert_single_solver_winner(&passes);
    assert_eq!(run.final_output.map(|o| o.answer), Some("on time".to_string()));
    assert!(run
        .residual_risk
        .as_deref()
        .is_some_and(|r| r.contains("1 of 3 candidates failed")));
}

#[tokio::test]
async fn test_no_candidate_passing_checks_still_succeeds_with_low_confidence() {
    setup_test_logging();
    let config = fast_config();
    let p = pipeline(config.clone(), scripted(false, "See the reference.", &["R9"]), Vec::new()).await;

    let run_id = p.orchestrator.submit(GOAL, lane(&config, "standard"), "alice").await.unwrap();
    let run = finish(&p.orchestrator, run_id).await;

    assert_eq!(run.status, RunStatus::Success);
    let score = run.verify_score.expect("verify score");
    assert!(score < 0.5, "shortfall score should be low, got {}", score);
    assert!(run.residual_risk.as_deref().is_some_and(|r| !r.is_empty()));

    let passes = p.repos.passes.list_by_run(run_id).await.unwrap();
    assert_single_solver_winner(&passes);
    // Only fully passing candidates are judged.
    assert_eq!(p.provider.calls_matching("\"score\"").await, 0);
    // Unknown references never reach the final citations.
    assert!(run.final_output.is_some_and(|o| o.citations.is_empty()));
}

#[tokio::test]
async fn test_budget_too_small_for_planning_fails_before_any_call() {
    setup_test_logging();
    let mut config = fast_config();
    price(&mut config, "mock-model", 0.0, 20.0);
    let p = pipeline(config.clone(), scripted(false, "unused", &[]), Vec::new()).await;

    let mut tight = lane(&config, "standard");
    tight.planner_model = "mock-model".to_string();
    tight.planner_max_tokens = 1000;
    tight.budget_cap_usd = 0.01;

    let run_id = p.orchestrator.submit(GOAL, tight, "alice").await.unwrap();
    let run = finish(&p.orchestrator, run_id).await;

    assert_eq!(run.status, RunStatus::Error);
    assert_eq!(run.failed_stage.as_deref(), Some("planning"));
    assert!(run
        .error_reason
        .as_deref()
        .is_some_and(|r| r.to_lowercase().contains("budget")));
    assert!(run.final_output.is_none());
    assert!(p.repos.passes.list_by_run(run_id).await.unwrap().is_empty());
    assert_eq!(p.provider.call_count(), 0);
    assert_eq!(run.total_cost_nanos, 0);
}

#[tokio::test]
async fn test_overshoot_is_bounded_by_the_stage_in_flight() {
    setup_test_logging();
    let mut config = fast_config();
    price(&mut config, "mock-model", 0.0, 20.0);
    let provider = ScriptedProvider::new()
        .on(
            "\"citations\"",
            ScriptedResponse::success(candidate_json("costly", &[])).with_usage(100, 1000),
        )
        .on("goal_restatement", ScriptedResponse::success(plan_json(false)));
    let p = pipeline(config.clone(), provider, Vec::new()).await;

    let mut budget_lane = lane(&config, "standard");
    budget_lane.planner_model = "mock-model".to_string();
    budget_lane.solver_model = "mock-model".to_string();
    budget_lane.judge_model = None;
    budget_lane.planner_max_tokens = 100;
    budget_lane.solver_max_tokens = 500;
    budget_lane.budget_cap_usd = 0.05;

    let run_id = p.orchestrator.submit(GOAL, budget_lane, "alice").await.unwrap();
    let run = finish(&p.orchestrator, run_id).await;

    // Planner: 50 output tokens at $20/M. Each solver: 1000 output tokens.
    let planner_nanos = 1_000_000;
    let solver_nanos = 20_000_000;
    assert_eq!(run.total_cost_nanos, planner_nanos + 3 * solver_nanos);
    assert!(run.total_cost_nanos > run.budget_cap_nanos);
    assert!(run.total_cost_nanos <= run.budget_cap_nanos + 3 * solver_nanos);

    assert_eq!(run.status, RunStatus::Error);
    assert_eq!(run.failed_stage.as_deref(), Some("verification"));
    assert!(run.error_reason.as_deref().is_some_and(|r| r.contains("budget")));

    // Concurrent charges are all accounted for.
    let entries = p.repos.costs.list_by_run(run_id).await.unwrap();
    assert_eq!(entries.len(), 4);
    assert_eq!(entries.iter().map(|e| e.cost_nanos).sum::<i64>(), run.total_cost_nanos);
    let passes = p.repos.passes.list_by_run(run_id).await.unwrap();
    assert!(passes.iter().all(|p| !p.is_winner));
}

#[tokio::test]
async fn test_judge_overshoot_still_delivers_the_winner() {
    setup_test_logging();
    let mut config = fast_config();
    price(&mut config, "free-model", 0.0, 0.0);
    price(&mut config, "judge-model", 0.0, 20.0);
    let provider = ScriptedProvider::new()
        .on(
            "\"score\"",
            ScriptedResponse::success(common::judgment_json(0.9)).with_usage(100, 3000),
        )
        .on("\"citations\"", ScriptedResponse::success(candidate_json("Aliasing is exclusive.", &[])))
        .on("goal_restatement", ScriptedResponse::success(plan_json(false)));
    let p = pipeline(config.clone(), provider, Vec::new()).await;

    let mut budget_lane = lane(&config, "standard");
    budget_lane.planner_model = "free-model".to_string();
    budget_lane.solver_model = "free-model".to_string();
    budget_lane.judge_model = Some("judge-model".to_string());
    budget_lane.judge_max_tokens = 500;
    budget_lane.budget_cap_usd = 0.05;

    let run_id = p.orchestrator.submit(GOAL, budget_lane, "alice").await.unwrap();
    let run = finish(&p.orchestrator, run_id).await;

    // Three judges estimated at 500 tokens each fit the cap; any one judge
    // billing 3000 output tokens at $20/M overshoots it.
    assert_eq!(run.status, RunStatus::Success, "error: {:?}", run.error_reason);
    assert!(run.total_cost_nanos > run.budget_cap_nanos);
    assert_eq!(run.final_output.map(|o| o.answer).as_deref(), Some("Aliasing is exclusive."));

    let passes = p.repos.passes.list_by_run(run_id).await.unwrap();
    assert!(passes.iter().any(|p| p.pass_type == PassType::VerifierModel));
    assert_single_solver_winner(&passes);
}

#[tokio::test]
async fn test_identical_goals_run_independently_and_reuse_the_cache() {
    setup_test_logging();
    let config = fast_config();
    let p = pipeline(config.clone(), scripted(false, "Exclusive access.", &[]), Vec::new()).await;
    let standard = lane(&config, "standard");

    let (a, b) = tokio::join!(
        p.orchestrator.submit(GOAL, standard.clone(), "alice"),
        p.orchestrator.submit(GOAL, standard.clone(), "bob"),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_ne!(a, b);
    let run_a = finish(&p.orchestrator, a).await;
    let run_b = finish(&p.orchestrator, b).await;
    assert_eq!(run_a.status, RunStatus::Success);
    assert_eq!(run_b.status, RunStatus::Success);
    for id in [a, b] {
        let passes = p.repos.passes.list_by_run(id).await.unwrap();
        assert!(passes.iter().all(|pass| pass.run_id == id));
        assert_single_solver_winner(&passes);
    }

    let planner_calls = p.provider.calls_matching("goal_restatement").await;
    let solver_calls = p.provider.calls_matching("[candidate:").await;

    let c = p.orchestrator.submit(GOAL, standard, "carol").await.unwrap();
    let run_c = finish(&p.orchestrator, c).await;
    assert_eq!(run_c.status, RunStatus::Success);
    assert_eq!(p.provider.calls_matching("goal_restatement").await, planner_calls);
    assert_eq!(p.provider.calls_matching("[candidate:").await, solver_calls);

    let passes = p.repos.passes.list_by_run(c).await.unwrap();
    let planner = passes
        .iter()
        .find(|pass| pass.pass_type == PassType::Planner)
        .expect("planner pass");
    assert!(planner.cache_hit);
    assert!(solver_passes(&passes).iter().all(|pass| pass.cache_hit));
    assert!(run_c.total_cost_nanos < run_a.total_cost_nanos);
}

#[tokio::test]
async fn test_evidence_is_deduplicated_and_source_failures_recorded() {
    setup_test_logging();
    let shared = "A mutable borrow grants exclusive access, so no other borrow of the value may coexist.";
    let docs = Arc::new(StaticSource::new(
        "docs",
        SourceType::File,
        vec![
            StaticSource::snippet("file://book/ch04.md", shared),
            StaticSource::snippet("file://book/ch04-copy.md", shared),
            StaticSource::snippet("file://garden.md", "Tomatoes need sun."),
        ],
    ));
    let web = Arc::new(StaticSource::failing("web", "connection refused"));
    let sources: Vec<Arc<dyn EvidenceSource>> = vec![docs.clone(), web.clone()];
    let config = fast_config();
    let p = pipeline(config.clone(), scripted(true, "Exclusive access [R1].", &["R1"]), sources).await;

    let run_id = p.orchestrator.submit(GOAL, lane(&config, "standard"), "alice").await.unwrap();
    let run = finish(&p.orchestrator, run_id).await;
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(docs.search_count(), 1);
    assert_eq!(web.search_count(), 1);

    let artifacts = p.repos.artifacts.list_by_run(run_id).await.unwrap();
    let hashes: HashSet<&str> = artifacts.iter().map(|a| a.content_hash.as_str()).collect();
    assert_eq!(hashes.len(), artifacts.len(), "content hashes are unique per run");

    let citable: Vec<_> = artifacts.iter().filter(|a| a.is_citable()).collect();
    assert_eq!(citable.len(), 2);
    let r1 = citable.iter().find(|a| a.ref_id == "R1").expect("R1");
    assert_eq!(r1.snippet, shared);
    assert!(artifacts
        .iter()
        .any(|a| a.source_type == SourceType::Error && a.ref_id.starts_with('E')));

    let output = run.final_output.expect("final output");
    assert_eq!(output.citations.len(), 1);
    assert_eq!(output.citations[0].ref_id, "R1");
    assert_eq!(output.citations[0].snippet, shared);
    assert_single_solver_winner(&p.repos.passes.list_by_run(run_id).await.unwrap());
}

#[tokio::test]
async fn test_cancel_from_another_orchestrator_stops_the_run() {
    setup_test_logging();
    let config = fast_config();
    let provider = ScriptedProvider::new()
        .on("\"citations\"", ScriptedResponse::success(candidate_json("unused", &[])))
        .on(
            "goal_restatement",
            ScriptedResponse::success(plan_json(false)).with_delay(Duration::from_millis(400)),
        );
    let p = pipeline(config.clone(), provider, Vec::new()).await;
    let other = RunOrchestrator::new(p.repos.clone().into(), p.provider.clone(), Vec::new(), &config);

    let run_id = p.orchestrator.submit(GOAL, lane(&config, "standard"), "alice").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    other.cancel(run_id).await.unwrap();

    let run = finish(&p.orchestrator, run_id).await;
    assert_eq!(run.status, RunStatus::Cancelled);
    assert!(run.final_output.is_none());
    assert_eq!(p.provider.calls_matching("[candidate:").await, 0);

    // Cancelling again is a no-op.
    other.cancel(run_id).await.unwrap();
}
