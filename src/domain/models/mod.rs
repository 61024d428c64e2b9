pub mod artifact;
pub mod cache;
pub mod check;
pub mod config;
pub mod cost;
pub mod lane;
pub mod pass;
pub mod plan;
pub mod profile;
pub mod run;

pub use artifact::{Artifact, SourceType};
pub use cache::CacheEntry;
pub use check::{Check, CheckKind, CheckStatus};
pub use config::{
    CacheConfig, Config, DatabaseConfig, EvidenceConfig, LoggingConfig, MaintenanceConfig,
    ModelPrice, PricingConfig, ProviderConfig, ProviderKind, RateLimitConfig, RetryConfig,
};
pub use cost::{nanos_to_usd, usd_to_nanos, CostEntry, CostSummary};
pub use lane::LaneConfig;
pub use pass::{
    CandidateOutput, ExecutionParams, Judgment, Pass, PassOutput, PassStatus, PassType, RankedRef,
};
pub use plan::Plan;
pub use profile::UserProfile;
pub use run::{Citation, FinalOutput, Run, RunStatus, RunTransition, Stage};
