//! Infrastructure layer module
//!
//! Process-level plumbing that is not a port adapter:
//! - Configuration management (figment)
//! - Logging infrastructure (tracing)

pub mod config;
pub mod logging;
