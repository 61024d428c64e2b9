//! Lane configuration: a named bundle of models, limits and candidate count.

use serde::{Deserialize, Serialize};

use super::cost::usd_to_nanos;

/// A named configuration bundle selected per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LaneConfig {
    /// Lane identifier (e.g. "standard")
    pub id: String,

    /// Short human description
    #[serde(default)]
    pub description: String,

    /// System instructions prepended to every stage prompt
    #[serde(default)]
    pub system_instructions: String,

    /// Model used by the planner
    #[serde(default = "default_model")]
    pub planner_model: String,

    /// Model used by solver candidates
    #[serde(default = "default_model")]
    pub solver_model: String,

    /// Model used for quality judgment; no model-based judgment when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge_model: Option<String>,

    /// Number of parallel solver candidates (clamped to at least 1)
    #[serde(default = "default_candidate_count")]
    pub candidate_count: u32,

    /// Maximum evidence snippets kept after reranking
    #[serde(default = "default_max_evidence")]
    pub max_evidence: usize,

    /// Evidence sources to query; empty means every registered source
    #[serde(default)]
    pub sources: Vec<String>,

    /// Temperature of candidate 0
    #[serde(default = "default_base_temperature")]
    pub base_temperature: f32,

    /// Temperature increment per candidate index
    #[serde(default = "default_temperature_step")]
    pub temperature_step: f32,

    /// Seed of candidate 0; candidate i uses `seed_base + i`
    #[serde(default)]
    pub seed_base: u64,

    #[serde(default = "default_planner_max_tokens")]
    pub planner_max_tokens: u32,

    #[serde(default = "default_solver_max_tokens")]
    pub solver_max_tokens: u32,

    #[serde(default = "default_judge_max_tokens")]
    pub judge_max_tokens: u32,

    /// Timeout for a single model call in seconds
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Timeout for a whole solver pass (including retries) in seconds
    #[serde(default = "default_solver_timeout_secs")]
    pub solver_timeout_secs: u64,

    /// Hard budget cap per run in USD
    #[serde(default = "default_budget_cap_usd")]
    pub budget_cap_usd: f64,
}

fn default_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

const fn default_candidate_count() -> u32 {
    3
}

const fn default_max_evidence() -> usize {
    8
}

const fn default_base_temperature() -> f32 {
    0.3
}

const fn default_temperature_step() -> f32 {
    0.2
}

const fn default_planner_max_tokens() -> u32 {
    1024
}

const fn default_solver_max_tokens() -> u32 {
    2048
}

const fn default_judge_max_tokens() -> u32 {
    512
}

const fn default_call_timeout_secs() -> u64 {
    60
}

const fn default_solver_timeout_secs() -> u64 {
    180
}

const fn default_budget_cap_usd() -> f64 {
    1.0
}

impl LaneConfig {
    /// Build a lane with default settings.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            system_instructions: String::new(),
            planner_model: default_model(),
            solver_model: default_model(),
            judge_model: None,
            candidate_count: default_candidate_count(),
            max_evidence: default_max_evidence(),
            sources: Vec::new(),
            base_temperature: default_base_temperature(),
            temperature_step: default_temperature_step(),
            seed_base: 0,
            planner_max_tokens: default_planner_max_tokens(),
            solver_max_tokens: default_solver_max_tokens(),
            judge_max_tokens: default_judge_max_tokens(),
            call_timeout_secs: default_call_timeout_secs(),
            solver_timeout_secs: default_solver_timeout_secs(),
            budget_cap_usd: default_budget_cap_usd(),
        }
    }

    /// The built-in lanes written by `init`.
    pub fn builtin() -> Vec<Self> {
        let mut standard = Self::new("standard");
        standard.description = "Three candidates with model judgment".to_string();
        standard.judge_model = Some("claude-haiku-4-5".to_string());

        let mut quick = Self::new("quick");
        quick.description = "Single candidate, deterministic checks only".to_string();
        quick.solver_model = "claude-haiku-4-5".to_string();
        quick.planner_model = "claude-haiku-4-5".to_string();
        quick.candidate_count = 1;
        quick.max_evidence = 4;
        quick.budget_cap_usd = 0.25;

        vec![standard, quick]
    }

    /// Candidate count, never less than one.
    pub fn effective_candidate_count(&self) -> u32 {
        self.candidate_count.max(1)
    }

    pub fn budget_cap_nanos(&self) -> i64 {
        usd_to_nanos(self.budget_cap_usd)
    }

    /// Temperature for a candidate, clamped to `[0, 1]`.
    pub fn temperature_for(&self, candidate_index: u32) -> f32 {
        let t = self.base_temperature + self.temperature_step * candidate_index as f32;
        t.clamp(0.0, 1.0)
    }

    pub fn seed_for(&self, candidate_index: u32) -> u64 {
        self.seed_base.wrapping_add(u64::from(candidate_index))
    }

    /// Whether the lane selects the given evidence source.
    pub fn uses_source(&self, source_id: &str) -> bool {
        self.sources.is_empty() || self.sources.iter().any(|s| s == source_id)
    }

    /// Stable textual form of the source filter, used in cache keys.
    pub fn source_filter(&self) -> String {
        if self.sources.is_empty() {
            return "*".to_string();
        }
        let mut sources = self.sources.clone();
        sources.sort();
        sources.join(",")
    }
}
