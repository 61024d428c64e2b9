//! Verification outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Deterministic,
    ModelBased,
}

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deterministic => "deterministic",
            Self::ModelBased => "model_based",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "deterministic" => Some(Self::Deterministic),
            "model_based" => Some(Self::ModelBased),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Fail,
    Skip,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Skip => "skip",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pass" => Some(Self::Pass),
            "fail" => Some(Self::Fail),
            "skip" => Some(Self::Skip),
            _ => None,
        }
    }
}

/// One verification outcome against one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Check {
    pub id: Uuid,
    pub run_id: Uuid,
    pub verifier_pass_id: Uuid,
    pub candidate_pass_id: Uuid,
    pub name: String,
    pub kind: CheckKind,
    pub status: CheckStatus,
    /// Model-judged quality score; `None` for deterministic checks.
    pub score: Option<f64>,
    pub reasoning: String,
    pub created_at: DateTime<Utc>,
}

impl Check {
    pub fn deterministic(
        run_id: Uuid,
        verifier_pass_id: Uuid,
        candidate_pass_id: Uuid,
        name: &str,
        status: CheckStatus,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            verifier_pass_id,
            candidate_pass_id,
            name: name.to_string(),
            kind: CheckKind::Deterministic,
            status,
            score: None,
            reasoning: reasoning.into(),
            created_at: Utc::now(),
        }
    }

    pub fn model_based(
        run_id: Uuid,
        verifier_pass_id: Uuid,
        candidate_pass_id: Uuid,
        status: CheckStatus,
        score: Option<f64>,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            verifier_pass_id,
            candidate_pass_id,
            name: "model_judgment".to_string(),
            kind: CheckKind::ModelBased,
            status,
            score,
            reasoning: reasoning.into(),
            created_at: Utc::now(),
        }
    }
}
