//! Domain layer for the DeepThink reasoning pipeline
//!
//! This module contains the core records (runs, passes, artifacts, checks,
//! cache and cost entries), their invariants, and the port traits that
//! infrastructure adapters implement.

pub mod errors;
pub mod models;
pub mod ports;
pub mod text;

pub use errors::{DomainError, DomainResult};
