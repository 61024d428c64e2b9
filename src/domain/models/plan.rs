//! Structured plan produced by the planner pass.

use serde::{Deserialize, Serialize};

/// The planner's structured output.
///
/// Deserialization rejects unknown fields so that the model output must match
/// this exact shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Plan {
    /// The goal restated in the planner's own words.
    pub goal_restatement: String,
    /// How the solvers should approach the goal.
    pub approach: String,
    /// Points every candidate should address.
    pub key_considerations: Vec<String>,
    /// Rough number of reasoning steps expected.
    pub estimated_steps: u32,
    /// Whether evidence gathering should run before solving.
    pub requires_evidence: bool,
}

impl Plan {
    /// Validate semantic constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if self.goal_restatement.trim().is_empty() {
            return Err("goal_restatement must not be empty".to_string());
        }
        if self.approach.trim().is_empty() {
            return Err("approach must not be empty".to_string());
        }
        if self.estimated_steps == 0 {
            return Err("estimated_steps must be at least 1".to_string());
        }
        if self.key_considerations.iter().any(|c| c.trim().is_empty()) {
            return Err("key_considerations must not contain empty entries".to_string());
        }
        Ok(())
    }
}
