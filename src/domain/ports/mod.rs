//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines async trait interfaces that adapters must implement:
//! - Repositories: durable storage for runs, passes, artifacts, checks,
//!   cache entries, the cost ledger and user profiles
//! - ModelProvider: the opaque completion capability
//! - EvidenceSource: external search/knowledge sources

pub mod artifact_repository;
pub mod cache_repository;
pub mod check_repository;
pub mod cost_ledger_repository;
pub mod evidence_source;
pub mod model_provider;
pub mod pass_repository;
pub mod profile_repository;
pub mod run_repository;

pub use artifact_repository::ArtifactRepository;
pub use cache_repository::CacheRepository;
pub use check_repository::CheckRepository;
pub use cost_ledger_repository::CostLedgerRepository;
pub use evidence_source::{EvidenceSource, RawSnippet, SourceError};
pub use model_provider::{
    Completion, CompletionRequest, ModelProvider, ProviderError, ProviderErrorKind,
};
pub use pass_repository::PassRepository;
pub use profile_repository::ProfileRepository;
pub use run_repository::{RunFilter, RunRepository};
