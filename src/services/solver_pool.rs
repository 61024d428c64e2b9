//! Solver stage: concurrent candidate answers over the same plan and evidence.

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{CandidateOutput, ExecutionParams, LaneConfig, PassType, Plan};
use crate::services::evidence_gatherer::EvidenceSet;
use crate::services::extract_json_from_response;
use crate::services::pass_runner::{PassOutcome, PassRequest, PassRunner};

const SOLVER_SYSTEM: &str = "You are one of several independent solvers in a multi-pass reasoning \
pipeline. Follow the plan, ground claims in the listed evidence, and respond with JSON only.";

#[derive(Deserialize)]
struct RawCandidate {
    answer: String,
    #[serde(default)]
    citations: Vec<String>,
}

/// Interpret solver text. Output that does not match the requested shape is
/// kept verbatim as an unstructured candidate for the verifier to reject.
pub fn parse_candidate(text: &str) -> Result<CandidateOutput, String> {
    match serde_json::from_str::<RawCandidate>(extract_json_from_response(text)) {
        Ok(raw) if !raw.answer.trim().is_empty() => Ok(CandidateOutput {
            answer: raw.answer.trim().to_string(),
            citations: raw.citations.into_iter().map(|c| c.trim().to_string()).collect(),
            well_formed: true,
        }),
        _ => Ok(CandidateOutput {
            answer: text.trim().to_string(),
            citations: Vec::new(),
            well_formed: false,
        }),
    }
}

/// Inputs shared by every candidate of one run.
#[derive(Debug, Clone)]
pub struct SolveContext {
    pub run_id: Uuid,
    pub goal: String,
    pub plan: Plan,
    pub evidence: EvidenceSet,
    pub lane: LaneConfig,
}

#[derive(Clone)]
pub struct SolverPool {
    runner: PassRunner,
}

impl SolverPool {
    pub fn new(runner: PassRunner) -> Self {
        Self { runner }
    }

    pub fn params_for(lane: &LaneConfig, candidate_index: u32) -> ExecutionParams {
        ExecutionParams {
            max_tokens: lane.solver_max_tokens,
            temperature: Some(lane.temperature_for(candidate_index)),
            seed: Some(lane.seed_for(candidate_index)),
            timeout_secs: lane.call_timeout_secs,
        }
    }

    fn prompt(ctx: &SolveContext, candidate_index: u32) -> String {
        let mut prompt = format!("[candidate:{}]\nGoal:\n{}\n\nPlan:\n", candidate_index, ctx.goal.trim());
        prompt.push_str(&format!("Restated goal: {}\n", ctx.plan.goal_restatement));
        prompt.push_str(&format!("Approach: {}\n", ctx.plan.approach));
        for consideration in &ctx.plan.key_considerations {
            prompt.push_str(&format!("- {}\n", consideration));
        }

        prompt.push_str("\nEvidence:\n");
        if ctx.evidence.is_empty() {
            prompt.push_str("No evidence is available. Answer from general knowledge and leave citations empty.\n");
        } else {
            for artifact in &ctx.evidence.artifacts {
                prompt.push_str(&format!("[{}] ({}) {}\n", artifact.ref_id, artifact.source_uri, artifact.snippet));
            }
        }

        prompt.push_str(
            "\nReply with a JSON object: {\"answer\": string, \"citations\": [evidence ids such as \"R1\"]}. \
Cite only ids listed above.",
        );
        prompt
    }

    fn system(lane: &LaneConfig) -> String {
        if lane.system_instructions.trim().is_empty() {
            SOLVER_SYSTEM.to_string()
        } else {
            format!("{}\n\n{}", lane.system_instructions.trim(), SOLVER_SYSTEM)
        }
    }

    fn cache_input(ctx: &SolveContext, candidate_index: u32, params: &ExecutionParams) -> String {
        format!(
            "{}\n{}\n{}\n{}\n{}",
            ctx.goal,
            serde_json::to_string(&ctx.plan).unwrap_or_default(),
            ctx.evidence.fingerprint(),
            candidate_index,
            serde_json::to_string(params).unwrap_or_default()
        )
    }

    /// Worst-case cost of the whole stage.
    pub fn estimate_nanos(&self, ctx: &SolveContext) -> i64 {
        let pricing = self.runner.ledger().pricing();
        let chars = Self::system(&ctx.lane).len() + Self::prompt(ctx, 0).len();
        let per_call = pricing.estimate_call_nanos(&ctx.lane.solver_model, chars, ctx.lane.solver_max_tokens);
        per_call.saturating_mul(i64::from(ctx.lane.effective_candidate_count()))
    }

    /// Run every candidate concurrently and wait for all of them to settle.
    /// `on_settled` sees each outcome as it lands; the result is ordered by
    /// candidate index.
    pub async fn solve<F>(&self, ctx: SolveContext, mut on_settled: F) -> DomainResult<Vec<PassOutcome<CandidateOutput>>>
    where
        F: FnMut(&PassOutcome<CandidateOutput>),
    {
        let ctx = Arc::new(ctx);
        let deadline = Duration::from_secs(ctx.lane.solver_timeout_secs.max(1));
        let mut tasks = FuturesUnordered::new();

        for candidate_index in 0..ctx.lane.effective_candidate_count() {
            let runner = self.runner.clone();
            let ctx = ctx.clone();
            tasks.push(tokio::spawn(async move {
                let params = Self::params_for(&ctx.lane, candidate_index);
                let request = PassRequest::new(
                    ctx.run_id,
                    PassType::Solver,
                    ctx.lane.solver_model.clone(),
                    Self::system(&ctx.lane),
                    Self::prompt(&ctx, candidate_index),
                    params.clone(),
                )
                .with_candidate_index(candidate_index)
                .with_snapshot(json!({
                    "goal": ctx.goal,
                    "evidence": ctx.evidence.fingerprint(),
                    "candidate_index": candidate_index,
                }))
                .cached_by(Self::cache_input(&ctx, candidate_index, &params))
                .with_deadline(deadline);

                runner.run(request, parse_candidate).await
            }));
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.next().await {
            let outcome = joined
                .map_err(|e| DomainError::ExecutionFailed(format!("solver task aborted: {}", e)))??;
            tracing::debug!(
                run_id = %ctx.run_id,
                candidate_index = outcome.pass().candidate_index,
                succeeded = outcome.is_succeeded(),
                "candidate settled"
            );
            on_settled(&outcome);
            outcomes.push(outcome);
        }

        outcomes.sort_by_key(|o| o.pass().candidate_index);
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::providers::{ScriptedProvider, ScriptedResponse};
    use crate::domain::models::PassStatus;
    use crate::services::pass_runner::tests::harness;

    fn plan() -> Plan {
        Plan {
            goal_restatement: "Explain Raft".to_string(),
            approach: "Summarize leader election".to_string(),
            key_considerations: vec!["terms".to_string()],
            estimated_steps: 2,
            requires_evidence: false,
        }
    }

    fn context(run_id: Uuid, lane: LaneConfig) -> SolveContext {
        SolveContext {
            run_id,
            goal: "Explain Raft".to_string(),
            plan: plan(),
            evidence: EvidenceSet::default(),
            lane,
        }
    }

    #[test]
    fn test_parse_candidate_keeps_unstructured_text() {
        let structured = parse_candidate(r#"{"answer":"yes","citations":["R1"]}"#).unwrap();
        assert!(structured.well_formed);
        assert_eq!(structured.citations, vec!["R1"]);

        let loose = parse_candidate("just prose").unwrap();
        assert!(!loose.well_formed);
        assert_eq!(loose.answer, "just prose");
    }

    #[test]
    fn test_params_vary_per_candidate() {
        let lane = LaneConfig::new("standard");
        let a = SolverPool::params_for(&lane, 0);
        let b = SolverPool::params_for(&lane, 1);
        assert_ne!(a.temperature, b.temperature);
        assert_ne!(a.seed, b.seed);
    }

    #[tokio::test]
    async fn test_all_candidates_settle_in_index_order() {
        let provider = ScriptedProvider::new()
            .on("[candidate:0]", ScriptedResponse::success(r#"{"answer":"zero","citations":[]}"#).with_delay(Duration::from_millis(30)))
            .on("[candidate:1]", ScriptedResponse::success(r#"{"answer":"one","citations":[]}"#))
            .on("[candidate:2]", ScriptedResponse::success(r#"{"answer":"two","citations":[]}"#));
        let (h, provider) = harness(provider).await;
        let pool = SolverPool::new(h.runner.clone());

        let mut settled = 0;
        let outcomes = pool
            .solve(context(h.run_id, LaneConfig::new("standard")), |_| settled += 1)
            .await
            .unwrap();

        assert_eq!(settled, 3);
        assert_eq!(provider.call_count(), 3);
        let indices: Vec<u32> = outcomes.iter().map(|o| o.pass().candidate_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(outcomes.iter().all(|o| o.is_succeeded()));
    }

    #[tokio::test]
    async fn test_timed_out_candidate_fails_alone() {
        let provider = ScriptedProvider::new()
            .on("[candidate:1]", ScriptedResponse::success("{}").with_delay(Duration::from_secs(5)))
            .on("citations", ScriptedResponse::success(r#"{"answer":"ok","citations":[]}"#));
        let (h, _) = harness(provider).await;
        let pool = SolverPool::new(h.runner.clone());

        let mut lane = LaneConfig::new("standard");
        lane.solver_timeout_secs = 1;
        let outcomes = pool.solve(context(h.run_id, lane), |_| {}).await.unwrap();

        assert_eq!(outcomes[1].pass().status, PassStatus::Failed);
        assert!(outcomes[0].is_succeeded());
        assert!(outcomes[2].is_succeeded());
    }
}
