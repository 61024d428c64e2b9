//! Pass domain model.
//!
//! A pass is one stage execution within a run. Passes are written once by the
//! stage that executed them; the only later mutation is marking the single
//! winning solver pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::plan::Plan;

/// Kind of stage execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassType {
    Planner,
    Retriever,
    Reranker,
    Solver,
    VerifierDeterministic,
    VerifierModel,
}

impl PassType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Retriever => "retriever",
            Self::Reranker => "reranker",
            Self::Solver => "solver",
            Self::VerifierDeterministic => "verifier_deterministic",
            Self::VerifierModel => "verifier_model",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "planner" => Some(Self::Planner),
            "retriever" => Some(Self::Retriever),
            "reranker" => Some(Self::Reranker),
            "solver" => Some(Self::Solver),
            "verifier_deterministic" => Some(Self::VerifierDeterministic),
            "verifier_model" => Some(Self::VerifierModel),
            _ => None,
        }
    }

    /// Only solver passes may ever be marked as the winner.
    pub fn can_win(&self) -> bool {
        matches!(self, Self::Solver)
    }
}

/// Outcome of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassStatus {
    Succeeded,
    Failed,
}

impl PassStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Parameters used for a model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionParams {
    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Sampling temperature (0.0 - 1.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Sampling seed, used to diversify solver candidates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    /// Per-call timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ExecutionParams {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            temperature: Some(0.7),
            seed: None,
            timeout_secs: 120,
        }
    }
}

/// A solver candidate's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateOutput {
    pub answer: String,
    /// Evidence reference ids the candidate claims to rely on.
    pub citations: Vec<String>,
    /// Whether the raw model output parsed into the requested structure.
    pub well_formed: bool,
}

/// A model-based quality judgment for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgment {
    /// Quality score in `[0.0, 1.0]`.
    pub score: f64,
    pub reasoning: String,
}

impl Judgment {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.score) || self.score.is_nan() {
            return Err(format!("score {} is outside [0, 1]", self.score));
        }
        if self.reasoning.trim().is_empty() {
            return Err("reasoning must not be empty".to_string());
        }
        Ok(())
    }
}

/// A reranked evidence reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedRef {
    pub content_hash: String,
    pub relevance: f64,
}

/// Typed output snapshot, one variant per pass kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PassOutput {
    Plan(Plan),
    Retrieval {
        snippet_count: usize,
        sources: Vec<String>,
        failures: Vec<String>,
    },
    Rerank {
        ranked: Vec<RankedRef>,
    },
    Candidate(CandidateOutput),
    DeterministicChecks {
        candidates_checked: usize,
        fully_passing: Vec<u32>,
    },
    Judgment(Judgment),
}

impl From<Plan> for PassOutput {
    fn from(plan: Plan) -> Self {
        Self::Plan(plan)
    }
}

impl From<CandidateOutput> for PassOutput {
    fn from(candidate: CandidateOutput) -> Self {
        Self::Candidate(candidate)
    }
}

impl From<Judgment> for PassOutput {
    fn from(judgment: Judgment) -> Self {
        Self::Judgment(judgment)
    }
}

/// One stage execution within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pass {
    pub id: Uuid,
    pub run_id: Uuid,
    pub pass_type: PassType,
    pub model: String,
    pub status: PassStatus,
    pub input_snapshot: serde_json::Value,
    pub output: Option<PassOutput>,
    pub error: Option<String>,
    /// Candidate index for solver passes (and the judged candidate for
    /// model verification); 0 otherwise.
    pub candidate_index: u32,
    pub is_winner: bool,
    pub cache_hit: bool,
    pub latency_ms: i64,
    pub params: Option<ExecutionParams>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub created_at: DateTime<Utc>,
}

impl Pass {
    /// Start building a pass record with a pre-assigned id.
    pub fn new(id: Uuid, run_id: Uuid, pass_type: PassType, model: impl Into<String>) -> Self {
        Self {
            id,
            run_id,
            pass_type,
            model: model.into(),
            status: PassStatus::Succeeded,
            input_snapshot: serde_json::Value::Null,
            output: None,
            error: None,
            candidate_index: 0,
            is_winner: false,
            cache_hit: false,
            latency_ms: 0,
            params: None,
            input_tokens: 0,
            output_tokens: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_candidate_index(mut self, index: u32) -> Self {
        self.candidate_index = index;
        self
    }

    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input_snapshot = input;
        self
    }

    pub fn with_params(mut self, params: ExecutionParams) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_usage(mut self, input_tokens: i64, output_tokens: i64) -> Self {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self
    }

    pub fn with_latency_ms(mut self, latency_ms: i64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn from_cache(mut self) -> Self {
        self.cache_hit = true;
        self
    }

    pub fn succeeded(mut self, output: PassOutput) -> Self {
        self.status = PassStatus::Succeeded;
        self.output = Some(output);
        self.error = None;
        self
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.status = PassStatus::Failed;
        self.error = Some(error.into());
        self
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == PassStatus::Succeeded
    }

    /// The candidate output, if this is a successful solver pass.
    pub fn candidate(&self) -> Option<&CandidateOutput> {
        match &self.output {
            Some(PassOutput::Candidate(c)) if self.pass_type == PassType::Solver => Some(c),
            _ => None,
        }
    }

    /// The plan, if this is a successful planner pass.
    pub fn plan(&self) -> Option<&Plan> {
        match &self.output {
            Some(PassOutput::Plan(p)) => Some(p),
            _ => None,
        }
    }
}
