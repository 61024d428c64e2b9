//! Run domain model.
//!
//! A run is one end-to-end reasoning job for a single user goal. Its status
//! only moves forward: `pending → running → {success, error, cancelled}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::cost::nanos_to_usd;

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, pipeline not yet started
    Pending,
    /// Stages are executing
    Running,
    /// Final output assembled
    Success,
    /// Failed with a recorded stage and reason
    Error,
    /// Cancelled by the caller
    Cancelled,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Cancelled)
    }

    /// Valid transitions from this status. No state is ever re-entered.
    pub fn valid_transitions(&self) -> Vec<RunStatus> {
        match self {
            Self::Pending => vec![Self::Running, Self::Error, Self::Cancelled],
            Self::Running => vec![Self::Success, Self::Error, Self::Cancelled],
            Self::Success | Self::Error | Self::Cancelled => vec![],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }

    /// Statuses a run must currently be in for it to move to `self`.
    pub fn allowed_predecessors(&self) -> Vec<RunStatus> {
        [Self::Pending, Self::Running]
            .into_iter()
            .filter(|from| from.can_transition_to(*self))
            .collect()
    }
}

/// Pipeline stage names used for error attribution and phase events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Planning,
    Evidence,
    Solving,
    Verification,
    Assembly,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Evidence => "evidence",
            Self::Solving => "solving",
            Self::Verification => "verification",
            Self::Assembly => "assembly",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One evidence reference actually used by the winning answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub ref_id: String,
    pub source_uri: String,
    pub snippet: String,
}

/// Structured final output of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalOutput {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub residual_risk: String,
}

/// A state change requested by the orchestrator.
#[derive(Debug, Clone)]
pub enum RunTransition {
    Start,
    /// Completes the run and flags `winner_pass_id` as its winning candidate
    /// in the same write.
    Succeed {
        output: FinalOutput,
        verify_score: f64,
        winner_pass_id: Uuid,
    },
    Fail {
        stage: Stage,
        reason: String,
    },
    Cancel,
}

impl RunTransition {
    /// Target status of this transition.
    pub fn target(&self) -> RunStatus {
        match self {
            Self::Start => RunStatus::Running,
            Self::Succeed { .. } => RunStatus::Success,
            Self::Fail { .. } => RunStatus::Error,
            Self::Cancel => RunStatus::Cancelled,
        }
    }
}

/// One reasoning job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub user_id: String,
    pub lane_id: String,
    pub goal: String,
    pub status: RunStatus,
    /// Hard budget cap in nanodollars.
    pub budget_cap_nanos: i64,
    pub verify_score: Option<f64>,
    pub residual_risk: Option<String>,
    pub final_output: Option<FinalOutput>,
    pub failed_stage: Option<String>,
    pub error_reason: Option<String>,
    pub total_latency_ms: i64,
    pub total_cost_nanos: i64,
    pub total_tokens: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Create a new pending run.
    pub fn new(
        user_id: impl Into<String>,
        lane_id: impl Into<String>,
        goal: impl Into<String>,
        budget_cap_nanos: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            lane_id: lane_id.into(),
            goal: goal.into(),
            status: RunStatus::Pending,
            budget_cap_nanos,
            verify_score: None,
            residual_risk: None,
            final_output: None,
            failed_stage: None,
            error_reason: None,
            total_latency_ms: 0,
            total_cost_nanos: 0,
            total_tokens: 0,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    pub fn total_cost_usd(&self) -> f64 {
        nanos_to_usd(self.total_cost_nanos)
    }

    pub fn budget_cap_usd(&self) -> f64 {
        nanos_to_usd(self.budget_cap_nanos)
    }

    /// Budget remaining before the cap (may be negative after overshoot).
    pub fn remaining_nanos(&self) -> i64 {
        self.budget_cap_nanos - self.total_cost_nanos
    }
}
