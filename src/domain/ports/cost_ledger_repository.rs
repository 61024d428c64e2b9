use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{CostEntry, CostSummary};

/// Append-only, time-partitioned cost ledger.
#[async_trait]
pub trait CostLedgerRepository: Send + Sync {
    /// Append an entry to the partition covering its timestamp.
    async fn append(&self, entry: &CostEntry) -> DomainResult<()>;

    /// Charge the entry's run and append the entry in one transaction.
    ///
    /// The charge is keyed on `entry.pass_id`; a repeated charge writes
    /// nothing and returns `false`. If the append fails the run totals are
    /// left untouched.
    async fn record_charge(&self, entry: &CostEntry, latency_ms: i64) -> DomainResult<bool>;

    async fn list_by_run(&self, run_id: Uuid) -> DomainResult<Vec<CostEntry>>;

    /// Aggregate all entries recorded in `[from, to)`.
    async fn summarize(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> DomainResult<CostSummary>;

    /// Create the partition for a calendar month if missing.
    /// Returns `true` when a partition was created.
    async fn ensure_partition(&self, year: i32, month: u32) -> DomainResult<bool>;

    /// Names of the registered monthly partitions.
    async fn list_partitions(&self) -> DomainResult<Vec<String>>;
}
