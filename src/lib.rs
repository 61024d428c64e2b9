//! DeepThink - multi-pass reasoning pipeline
//!
//! A run takes a user goal, produces a structured plan, gathers evidence,
//! solves it with several speculative candidates in parallel, verifies the
//! candidates with deterministic and model-based checks and returns one
//! winning answer with citations and a residual-risk note. Pass outputs are
//! cached by content address and every model call is charged against the
//! run's budget through an atomic ledger.
//!
//! # Architecture
//!
//! This crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models, errors and port traits
//! - **Adapters** (`adapters`): SQLite repositories, model providers, evidence sources
//! - **Service Layer** (`services`): the pipeline stages and the run orchestrator
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use deepthink::adapters::sqlite::{initialize_database, SqliteRepositories};
//! use deepthink::adapters::providers::ScriptedProvider;
//! use deepthink::services::RunOrchestrator;
//!
//! let pool = initialize_database("sqlite:deepthink.db", None).await?;
//! let config = deepthink::Config::default();
//! let orchestrator = RunOrchestrator::new(
//!     SqliteRepositories::new(pool).into(),
//!     std::sync::Arc::new(ScriptedProvider::offline()),
//!     Vec::new(),
//!     &config,
//! );
//! let lane = config.lane(None).cloned().unwrap();
//! let run_id = orchestrator.submit("Explain B-trees", lane, "alice").await?;
//! let run = orchestrator.wait(run_id).await?;
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    Artifact, Check, Config, FinalOutput, LaneConfig, Pass, PassType, Plan, Run, RunStatus,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{RunEvent, RunOrchestrator, RunSnapshot};
