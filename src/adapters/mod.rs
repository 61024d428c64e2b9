//! Infrastructure adapters for external systems.

pub mod providers;
pub mod sources;
pub mod sqlite;
