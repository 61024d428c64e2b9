//! SQLite implementation of the CostLedgerRepository.
//!
//! Entries live in monthly tables (`cost_entries_YYYYMM`) registered in
//! `cost_partitions`, plus `cost_entries_default` for months whose partition
//! has not been created yet. Reads span every table with `UNION ALL`.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::run_repository::apply_charge;
use super::{format_datetime, parse_datetime, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{CostEntry, CostSummary};
use crate::domain::ports::CostLedgerRepository;

const DEFAULT_PARTITION: &str = "cost_entries_default";

const ENTRY_COLUMNS: &str =
    "id, run_id, pass_id, provider, model, input_tokens, output_tokens, cost_nanos, recorded_at";

/// Table name of the partition covering a calendar month.
pub fn partition_name(year: i32, month: u32) -> String {
    format!("cost_entries_{year:04}{month:02}")
}

/// `[start, end)` of a calendar month.
fn month_range(year: i32, month: u32) -> DomainResult<(DateTime<Utc>, DateTime<Utc>)> {
    let invalid = || DomainError::ValidationFailed(format!("invalid partition month {year}-{month}"));
    if !(1..=12).contains(&month) {
        return Err(invalid());
    }
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let start = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single().ok_or_else(invalid)?;
    let end = Utc
        .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
        .single()
        .ok_or_else(invalid)?;
    Ok((start, end))
}

async fn insert_entry(conn: &mut SqliteConnection, table: &str, entry: &CostEntry) -> DomainResult<()> {
    sqlx::query(&format!(
        "INSERT INTO {table} ({ENTRY_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(entry.id.to_string())
    .bind(entry.run_id.to_string())
    .bind(entry.pass_id.to_string())
    .bind(&entry.provider)
    .bind(&entry.model)
    .bind(entry.input_tokens)
    .bind(entry.output_tokens)
    .bind(entry.cost_nanos)
    .bind(format_datetime(entry.recorded_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// DDL for one monthly partition, one statement per element.
fn partition_ddl(name: &str, start: &str, end: &str) -> [String; 4] {
    // Bounds are literal constants derived from integers, not user input.
    [
        format!(
            r#"CREATE TABLE IF NOT EXISTS {name} (
                id TEXT PRIMARY KEY NOT NULL,
                run_id TEXT NOT NULL,
                pass_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                input_tokens INTEGER NOT NULL CHECK (input_tokens >= 0),
                output_tokens INTEGER NOT NULL CHECK (output_tokens >= 0),
                cost_nanos INTEGER NOT NULL CHECK (cost_nanos >= 0),
                recorded_at TEXT NOT NULL CHECK (recorded_at >= '{start}' AND recorded_at < '{end}')
            )"#
        ),
        format!("CREATE INDEX IF NOT EXISTS idx_{name}_recorded ON {name}(recorded_at)"),
        format!("CREATE INDEX IF NOT EXISTS idx_{name}_run ON {name}(run_id)"),
        format!(
            r#"CREATE TRIGGER IF NOT EXISTS {name}_append_only
            BEFORE UPDATE ON {name}
            BEGIN
                SELECT RAISE(ABORT, 'cost entries are append-only');
            END"#
        ),
    ]
}

#[derive(Clone)]
pub struct SqliteCostLedgerRepository {
    pool: SqlitePool,
}

impl SqliteCostLedgerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Every table holding cost entries, default partition first.
    async fn all_tables(&self) -> DomainResult<Vec<String>> {
        let mut tables = vec![DEFAULT_PARTITION.to_string()];
        tables.extend(self.list_partitions().await?);
        Ok(tables)
    }

    async fn table_for(&self, recorded_at: DateTime<Utc>) -> DomainResult<String> {
        let name = partition_name(recorded_at.year(), recorded_at.month());
        let registered: Option<(String,)> = sqlx::query_as("SELECT name FROM cost_partitions WHERE name = ?")
            .bind(&name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(registered.map_or_else(|| DEFAULT_PARTITION.to_string(), |(n,)| n))
    }
}

#[async_trait]
impl CostLedgerRepository for SqliteCostLedgerRepository {
    async fn append(&self, entry: &CostEntry) -> DomainResult<()> {
        let table = self.table_for(entry.recorded_at).await?;
        let mut conn = self.pool.acquire().await?;
        insert_entry(&mut conn, &table, entry).await
    }

    async fn record_charge(&self, entry: &CostEntry, latency_ms: i64) -> DomainResult<bool> {
        let table = self.table_for(entry.recorded_at).await?;
        let mut tx = self.pool.begin().await?;

        let applied = apply_charge(
            &mut tx,
            entry.run_id,
            entry.pass_id,
            entry.input_tokens + entry.output_tokens,
            entry.cost_nanos,
            latency_ms,
        )
        .await?;
        if !applied {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_entry(&mut tx, &table, entry).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn list_by_run(&self, run_id: Uuid) -> DomainResult<Vec<CostEntry>> {
        let tables = self.all_tables().await?;
        let query = tables
            .iter()
            .map(|t| format!("SELECT {ENTRY_COLUMNS} FROM {t} WHERE run_id = ?"))
            .collect::<Vec<_>>()
            .join(" UNION ALL ")
            + " ORDER BY recorded_at";

        let mut q = sqlx::query_as::<_, CostEntryRow>(&query);
        for _ in &tables {
            q = q.bind(run_id.to_string());
        }

        let rows = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(|r| r.try_into()).collect()
    }

    async fn summarize(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> DomainResult<CostSummary> {
        let tables = self.all_tables().await?;
        let union = tables
            .iter()
            .map(|t| {
                format!(
                    "SELECT model, input_tokens, output_tokens, cost_nanos FROM {t} WHERE recorded_at >= ? AND recorded_at < ?"
                )
            })
            .collect::<Vec<_>>()
            .join(" UNION ALL ");
        let query = format!(
            "SELECT model, SUM(cost_nanos), SUM(input_tokens), SUM(output_tokens), COUNT(*) FROM ({union}) GROUP BY model"
        );

        let (from, to) = (format_datetime(from), format_datetime(to));
        let mut q = sqlx::query_as::<_, (String, i64, i64, i64, i64)>(&query);
        for _ in &tables {
            q = q.bind(&from).bind(&to);
        }

        let mut summary = CostSummary::default();
        for (model, cost, input, output, count) in q.fetch_all(&self.pool).await? {
            summary.total_cost_nanos += cost;
            summary.total_input_tokens += input;
            summary.total_output_tokens += output;
            summary.entry_count += u64::try_from(count).unwrap_or(0);
            summary.by_model.insert(model, cost);
        }
        Ok(summary)
    }

    async fn ensure_partition(&self, year: i32, month: u32) -> DomainResult<bool> {
        let (start, end) = month_range(year, month)?;
        let name = partition_name(year, month);
        let (start, end) = (format_datetime(start), format_datetime(end));

        let mut tx = self.pool.begin().await?;

        for statement in partition_ddl(&name, &start, &end) {
            sqlx::query(&statement).execute(&mut *tx).await?;
        }

        let created = sqlx::query(
            r#"INSERT OR IGNORE INTO cost_partitions (name, year, month, range_start, range_end, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#
        )
        .bind(&name)
        .bind(year)
        .bind(i64::from(month))
        .bind(&start)
        .bind(&end)
        .bind(format_datetime(Utc::now()))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(created == 1)
    }

    async fn list_partitions(&self) -> DomainResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM cost_partitions ORDER BY year, month")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(n,)| n).collect())
    }
}

#[derive(sqlx::FromRow)]
struct CostEntryRow {
    id: String,
    run_id: String,
    pass_id: String,
    provider: String,
    model: String,
    input_tokens: i64,
    output_tokens: i64,
    cost_nanos: i64,
    recorded_at: String,
}

impl TryFrom<CostEntryRow> for CostEntry {
    type Error = DomainError;

    fn try_from(row: CostEntryRow) -> Result<Self, Self::Error> {
        Ok(CostEntry {
            id: parse_uuid(&row.id)?,
            run_id: parse_uuid(&row.run_id)?,
            pass_id: parse_uuid(&row.pass_id)?,
            provider: row.provider,
            model: row.model,
            input_tokens: row.input_tokens,
            output_tokens: row.output_tokens,
            cost_nanos: row.cost_nanos,
            recorded_at: parse_datetime(&row.recorded_at)?,
        })
    }
}
