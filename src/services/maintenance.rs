//! Background maintenance daemon.
//!
//! Runs independently of any request on a fixed interval: sweeps expired
//! pass-cache rows and makes sure cost-ledger partitions exist for the
//! current month and the configured number of months ahead.

use chrono::{DateTime, Datelike, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, Instant};

use crate::domain::errors::DomainResult;
use crate::domain::models::MaintenanceConfig;
use crate::domain::ports::{CacheRepository, CostLedgerRepository};

/// Stop after this many failed cycles in a row.
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Result of one maintenance cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub cache_rows_swept: u64,
    /// Partitions created this cycle, e.g. `cost_entries_202611`
    pub partitions_created: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum MaintenanceEvent {
    Started,
    CycleCompleted { cycle: u64, report: MaintenanceReport, duration_ms: u64 },
    CycleFailed { cycle: u64, error: String },
    Stopped { reason: StopReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    TooManyFailures,
}

#[derive(Debug, Clone, Default)]
pub struct MaintenanceStatus {
    pub running: bool,
    pub total_cycles: u64,
    pub failed_cycles: u64,
    pub last_cycle: Option<Instant>,
    pub total_swept: u64,
}

/// Handle to stop a running daemon and read its status.
#[derive(Clone)]
pub struct MaintenanceHandle {
    stop_flag: Arc<AtomicBool>,
    status: Arc<RwLock<MaintenanceStatus>>,
}

impl MaintenanceHandle {
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
    }

    pub async fn status(&self) -> MaintenanceStatus {
        self.status.read().await.clone()
    }
}

/// `(year, month)` pairs from the month of `now` through `months_ahead`
/// months later.
pub fn partition_months(now: DateTime<Utc>, months_ahead: u32) -> Vec<(i32, u32)> {
    let mut year = now.year();
    let mut month = now.month();
    let mut months = Vec::with_capacity(months_ahead as usize + 1);
    for _ in 0..=months_ahead {
        months.push((year, month));
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }
    months
}

pub struct MaintenanceDaemon {
    cache: Arc<dyn CacheRepository>,
    costs: Arc<dyn CostLedgerRepository>,
    config: MaintenanceConfig,
    status: Arc<RwLock<MaintenanceStatus>>,
    stop_flag: Arc<AtomicBool>,
}

impl MaintenanceDaemon {
    pub fn new(
        cache: Arc<dyn CacheRepository>,
        costs: Arc<dyn CostLedgerRepository>,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            cache,
            costs,
            config,
            status: Arc::new(RwLock::new(MaintenanceStatus::default())),
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn handle(&self) -> MaintenanceHandle {
        MaintenanceHandle {
            stop_flag: self.stop_flag.clone(),
            status: self.status.clone(),
        }
    }

    /// Spawn the daemon loop, returning a channel of its events.
    pub fn spawn(self) -> mpsc::Receiver<MaintenanceEvent> {
        let (tx, rx) = mpsc::channel(100);
        tokio::spawn(async move {
            self.run_loop(tx).await;
        });
        rx
    }

    async fn run_loop(self, tx: mpsc::Sender<MaintenanceEvent>) {
        self.status.write().await.running = true;
        let _ = tx.send(MaintenanceEvent::Started).await;

        let period = Duration::from_secs(self.config.interval_secs.max(1));
        let mut timer = interval(period);
        let mut consecutive_failures = 0u32;
        let mut reason = StopReason::Requested;

        loop {
            // The first tick completes immediately, so a cycle runs on startup.
            timer.tick().await;
            if self.stop_flag.load(Ordering::Acquire) {
                break;
            }

            let cycle = {
                let mut status = self.status.write().await;
                status.total_cycles += 1;
                status.total_cycles
            };
            let start = Instant::now();

            match self.run_once().await {
                Ok(report) => {
                    consecutive_failures = 0;
                    {
                        let mut status = self.status.write().await;
                        status.last_cycle = Some(Instant::now());
                        status.total_swept += report.cache_rows_swept;
                    }
                    let _ = tx
                        .send(MaintenanceEvent::CycleCompleted {
                            cycle,
                            report,
                            duration_ms: start.elapsed().as_millis() as u64,
                        })
                        .await;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    self.status.write().await.failed_cycles += 1;
                    tracing::warn!(cycle, error = %e, "maintenance cycle failed");
                    let _ = tx
                        .send(MaintenanceEvent::CycleFailed {
                            cycle,
                            error: e.to_string(),
                        })
                        .await;
                    if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                        reason = StopReason::TooManyFailures;
                        break;
                    }
                }
            }

            if self.stop_flag.load(Ordering::Acquire) {
                break;
            }
        }

        self.status.write().await.running = false;
        tracing::info!(?reason, "maintenance daemon stopped");
        let _ = tx.send(MaintenanceEvent::Stopped { reason }).await;
    }

    /// One maintenance cycle (also used by `maintain --once`).
    pub async fn run_once(&self) -> DomainResult<MaintenanceReport> {
        self.run_at(Utc::now()).await
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> DomainResult<MaintenanceReport> {
        let cache_rows_swept = self.cache.sweep_expired(now).await?;

        let mut partitions_created = Vec::new();
        for (year, month) in partition_months(now, self.config.partition_months_ahead) {
            if self.costs.ensure_partition(year, month).await? {
                partitions_created.push(format!("cost_entries_{:04}{:02}", year, month));
            }
        }

        tracing::info!(
            cache_rows_swept,
            partitions_created = partitions_created.len(),
            "maintenance cycle complete"
        );
        Ok(MaintenanceReport {
            cache_rows_swept,
            partitions_created,
        })
    }
}
