//! Planner stage: turns a goal into a structured [`Plan`].

use serde_json::json;
use uuid::Uuid;

use crate::domain::models::{ExecutionParams, LaneConfig, PassType, Plan, Stage};
use crate::services::errors::{PassError, PipelineError, PipelineResult};
use crate::services::extract_json_from_response;
use crate::services::pass_runner::{PassOutcome, PassRequest, PassRunner};

const PLANNER_SYSTEM: &str = "You are the planning stage of a multi-pass reasoning pipeline. \
Produce a plan that later stages will follow. Respond with JSON only.";

const PLAN_SCHEMA: &str = r#"{
  "goal_restatement": string (non-empty),
  "approach": string (non-empty),
  "key_considerations": [string, ...],
  "estimated_steps": integer >= 1,
  "requires_evidence": boolean
}"#;

const STRICT_REMINDER: &str = "Your previous reply could not be parsed. Reply with exactly one JSON \
object with these five fields and no others. No prose, no code fences.";

/// Validate raw model text as a plan.
pub fn parse_plan(text: &str) -> Result<Plan, String> {
    let plan: Plan = serde_json::from_str(extract_json_from_response(text))
        .map_err(|e| format!("plan is not valid JSON of the expected shape: {}", e))?;
    plan.validate()?;
    Ok(plan)
}

#[derive(Clone)]
pub struct Planner {
    runner: PassRunner,
}

impl Planner {
    pub fn new(runner: PassRunner) -> Self {
        Self { runner }
    }

    fn system(lane: &LaneConfig) -> String {
        if lane.system_instructions.trim().is_empty() {
            PLANNER_SYSTEM.to_string()
        } else {
            format!("{}\n\n{}", lane.system_instructions.trim(), PLANNER_SYSTEM)
        }
    }

    fn prompt(goal: &str, strict: bool) -> String {
        let mut prompt = format!(
            "Goal:\n{}\n\nReturn a plan as a JSON object of this shape:\n{}\n",
            goal.trim(),
            PLAN_SCHEMA
        );
        if strict {
            prompt.push('\n');
            prompt.push_str(STRICT_REMINDER);
        }
        prompt
    }

    fn params(lane: &LaneConfig) -> ExecutionParams {
        ExecutionParams {
            max_tokens: lane.planner_max_tokens,
            temperature: Some(0.0),
            seed: None,
            timeout_secs: lane.call_timeout_secs,
        }
    }

    /// Worst-case cost of one planner call.
    pub fn estimate_nanos(&self, goal: &str, lane: &LaneConfig) -> i64 {
        let chars = Self::system(lane).len() + Self::prompt(goal, true).len();
        self.runner
            .ledger()
            .pricing()
            .estimate_call_nanos(&lane.planner_model, chars, lane.planner_max_tokens)
    }

    /// Produce a validated plan, retrying once with stricter instructions if
    /// the first reply does not parse.
    pub async fn plan(&self, run_id: Uuid, goal: &str, lane: &LaneConfig) -> PipelineResult<Plan> {
        let cache_input = format!("{}\n{}", goal, lane.id);
        let mut last_violation = String::new();

        for attempt in 1..=2u32 {
            let strict = attempt > 1;
            if strict {
                let headroom = self
                    .runner
                    .ledger()
                    .check_headroom(run_id, self.estimate_nanos(goal, lane))
                    .await?;
                if !headroom.is_sufficient() {
                    return Err(PipelineError::BudgetExceeded(headroom.describe()));
                }
            }

            let request = PassRequest::new(
                run_id,
                PassType::Planner,
                lane.planner_model.clone(),
                Self::system(lane),
                Self::prompt(goal, strict),
                Self::params(lane),
            )
            .with_snapshot(json!({ "goal": goal, "lane_id": lane.id, "attempt": attempt }))
            .cached_by(cache_input.clone());

            match self.runner.run(request, parse_plan).await? {
                PassOutcome::Succeeded { value, .. } => {
                    tracing::info!(
                        run_id = %run_id,
                        attempt,
                        requires_evidence = value.requires_evidence,
                        "plan ready"
                    );
                    return Ok(value);
                }
                PassOutcome::Failed {
                    error: PassError::Schema(reason),
                    ..
                } => {
                    tracing::warn!(run_id = %run_id, attempt, reason = %reason, "plan rejected");
                    last_violation = reason;
                }
                PassOutcome::Failed { error, .. } => {
                    return Err(PipelineError::StageFailed {
                        stage: Stage::Planning,
                        reason: error.to_string(),
                    });
                }
            }
        }

        Err(PipelineError::SchemaViolation(format!(
            "planner output rejected twice: {}",
            last_violation
        )))
    }
}
