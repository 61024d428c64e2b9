//! Evidence artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where an evidence snippet came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Web,
    Db,
    File,
    /// A source failure recorded for auditability; never citable.
    Error,
    Search,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Db => "db",
            Self::File => "file",
            Self::Error => "error",
            Self::Search => "search",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "web" => Some(Self::Web),
            "db" => Some(Self::Db),
            "file" => Some(Self::File),
            "error" => Some(Self::Error),
            "search" => Some(Self::Search),
            _ => None,
        }
    }
}

/// A deduplicated evidence snippet with a stable reference id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    pub run_id: Uuid,
    /// Human-readable reference id ("R1" = most relevant; "E1" for errors).
    pub ref_id: String,
    pub source_type: SourceType,
    pub source_uri: String,
    pub content_hash: String,
    pub snippet: String,
    pub location: Option<String>,
    pub relevance: f64,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Whether a solver may cite this artifact.
    pub fn is_citable(&self) -> bool {
        self.source_type != SourceType::Error
    }
}
