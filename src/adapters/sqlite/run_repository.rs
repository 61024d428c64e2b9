//! SQLite implementation of the RunRepository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::pass_repository::apply_winner;
use super::{format_datetime, parse_datetime, parse_optional_datetime, parse_optional_json, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{FinalOutput, Run, RunStatus, RunTransition};
use crate::domain::ports::{RunFilter, RunRepository};

const RUN_COLUMNS: &str = "id, user_id, lane_id, goal, status, budget_cap_nanos, verify_score, \
    residual_risk, final_output, failed_stage, error_reason, total_latency_ms, total_cost_nanos, \
    total_tokens, created_at, started_at, ended_at";

#[derive(Clone)]
pub struct SqliteRunRepository {
    pool: SqlitePool,
}

impl SqliteRunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn exists(&self, id: Uuid) -> DomainResult<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM runs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

/// SQL list of the statuses a run may be in to move to `target`.
fn predecessor_list(target: RunStatus) -> String {
    target
        .allowed_predecessors()
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Record a charge marker and add it to the run's totals on `conn`.
///
/// Returns `false` when `charge_id` was already applied. The caller owns the
/// transaction so other writes can commit or roll back with the charge.
pub(super) async fn apply_charge(
    conn: &mut SqliteConnection,
    run_id: Uuid,
    charge_id: Uuid,
    tokens: i64,
    cost_nanos: i64,
    latency_ms: i64,
) -> DomainResult<bool> {
    if tokens < 0 || cost_nanos < 0 || latency_ms < 0 {
        return Err(DomainError::ValidationFailed(
            "ledger increments must be non-negative".to_string(),
        ));
    }

    let inserted = sqlx::query(
        r#"INSERT OR IGNORE INTO run_charges (charge_id, run_id, tokens, cost_nanos, latency_ms, charged_at)
           SELECT ?, id, ?, ?, ?, ? FROM runs WHERE id = ?"#
    )
    .bind(charge_id.to_string())
    .bind(tokens)
    .bind(cost_nanos)
    .bind(latency_ms)
    .bind(format_datetime(Utc::now()))
    .bind(run_id.to_string())
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if inserted == 0 {
        let run: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM runs WHERE id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&mut *conn)
            .await?;
        return match run {
            Some(_) => Ok(false),
            None => Err(DomainError::RunNotFound(run_id)),
        };
    }

    sqlx::query(
        r#"UPDATE runs SET total_tokens = total_tokens + ?,
           total_cost_nanos = total_cost_nanos + ?,
           total_latency_ms = total_latency_ms + ?
           WHERE id = ?"#
    )
    .bind(tokens)
    .bind(cost_nanos)
    .bind(latency_ms)
    .bind(run_id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(true)
}

#[async_trait]
impl RunRepository for SqliteRunRepository {
    async fn create(&self, run: &Run) -> DomainResult<()> {
        let final_output = run.final_output.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"INSERT INTO runs (id, user_id, lane_id, goal, status, budget_cap_nanos, verify_score,
               residual_risk, final_output, failed_stage, error_reason, total_latency_ms,
               total_cost_nanos, total_tokens, created_at, started_at, ended_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#
        )
        .bind(run.id.to_string())
        .bind(&run.user_id)
        .bind(&run.lane_id)
        .bind(&run.goal)
        .bind(run.status.as_str())
        .bind(run.budget_cap_nanos)
        .bind(run.verify_score)
        .bind(&run.residual_risk)
        .bind(final_output)
        .bind(&run.failed_stage)
        .bind(&run.error_reason)
        .bind(run.total_latency_ms)
        .bind(run.total_cost_nanos)
        .bind(run.total_tokens)
        .bind(format_datetime(run.created_at))
        .bind(run.started_at.map(format_datetime))
        .bind(run.ended_at.map(format_datetime))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Run>> {
        let row: Option<RunRow> = sqlx::query_as(&format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.try_into()).transpose()
    }

    async fn transition(&self, id: Uuid, transition: &RunTransition) -> DomainResult<bool> {
        let target = transition.target();
        let guard = format!("id = ? AND status IN ({})", predecessor_list(target));
        let now = format_datetime(Utc::now());

        let result = match transition {
            RunTransition::Start => {
                sqlx::query(&format!("UPDATE runs SET status = ?, started_at = ? WHERE {guard}"))
                    .bind(target.as_str())
                    .bind(&now)
                    .bind(id.to_string())
                    .execute(&self.pool)
                    .await?
            }
            RunTransition::Succeed { output, verify_score, winner_pass_id } => {
                let output_json = serde_json::to_string(output)?;
                let mut tx = self.pool.begin().await?;
                let result = sqlx::query(&format!(
                    "UPDATE runs SET status = ?, final_output = ?, verify_score = ?, residual_risk = ?, ended_at = ? WHERE {guard}"
                ))
                .bind(target.as_str())
                .bind(output_json)
                .bind(*verify_score)
                .bind(&output.residual_risk)
                .bind(&now)
                .bind(id.to_string())
                .execute(&mut *tx)
                .await?;
                if result.rows_affected() == 1 {
                    apply_winner(&mut tx, id, *winner_pass_id).await?;
                    tx.commit().await?;
                } else {
                    tx.rollback().await?;
                }
                result
            }
            RunTransition::Fail { stage, reason } => {
                sqlx::query(&format!(
                    "UPDATE runs SET status = ?, failed_stage = ?, error_reason = ?, ended_at = ? WHERE {guard}"
                ))
                .bind(target.as_str())
                .bind(stage.as_str())
                .bind(reason)
                .bind(&now)
                .bind(id.to_string())
                .execute(&self.pool)
                .await?
            }
            RunTransition::Cancel => {
                sqlx::query(&format!("UPDATE runs SET status = ?, ended_at = ? WHERE {guard}"))
                    .bind(target.as_str())
                    .bind(&now)
                    .bind(id.to_string())
                    .execute(&self.pool)
                    .await?
            }
        };

        if result.rows_affected() == 0 && !self.exists(id).await? {
            return Err(DomainError::RunNotFound(id));
        }

        Ok(result.rows_affected() == 1)
    }

    async fn increment_totals(
        &self,
        run_id: Uuid,
        charge_id: Uuid,
        tokens: i64,
        cost_nanos: i64,
        latency_ms: i64,
    ) -> DomainResult<bool> {
        let mut tx = self.pool.begin().await?;
        if !apply_charge(&mut tx, run_id, charge_id, tokens, cost_nanos, latency_ms).await? {
            tx.rollback().await?;
            return Ok(false);
        }
        tx.commit().await?;
        Ok(true)
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{all_embedded_migrations, create_test_pool, Migrator, SqlitePassRepository};
    use crate::domain::models::{CandidateOutput, Pass, PassOutput, PassType, Stage};
    use crate::domain::ports::PassRepository;

    async fn setup_test_repo() -> SqliteRunRepository {
        let pool = create_test_pool().await.unwrap();
        let migrator = Migrator::new(pool.clone());
        migrator.run_embedded_migrations(all_embedded_migrations()).await.unwrap();
        SqliteRunRepository::new(pool)
    }

    #[tokio::test]
    async fn test_create_and_get_run() {
        let repo = setup_test_repo().await;
        let run = Run::new("alice", "standard", "Why is the sky blue?", 500_000_000);
        repo.create(&run).await.unwrap();

        let fetched = repo.get(run.id).await.unwrap().unwrap();
        assert_eq!(fetched.goal, "Why is the sky blue?");
        assert_eq!(fetched.status, RunStatus::Pending);
        assert_eq!(fetched.budget_cap_nanos, 500_000_000);
    }

    #[tokio::test]
    async fn test_transitions_are_one_way() {
        let repo = setup_test_repo().await;
        let run = Run::new("alice", "standard", "goal", 1);
        repo.create(&run).await.unwrap();

        assert!(repo.transition(run.id, &RunTransition::Start).await.unwrap());
        // Running is never re-entered.
        assert!(!repo.transition(run.id, &RunTransition::Start).await.unwrap());

        let fail = RunTransition::Fail { stage: Stage::Solving, reason: "no viable candidates".to_string() };
        assert!(repo.transition(run.id, &fail).await.unwrap());

        // Terminal rows are never rewritten.
        assert!(!repo.transition(run.id, &RunTransition::Cancel).await.unwrap());
        let fetched = repo.get(run.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, RunStatus::Error);
        assert_eq!(fetched.failed_stage.as_deref(), Some("solving"));
        assert_eq!(fetched.error_reason.as_deref(), Some("no viable candidates"));
        assert!(fetched.ended_at.is_some());
    }

    fn output() -> FinalOutput {
        FinalOutput {
            answer: "Rayleigh scattering".to_string(),
            citations: vec![],
            residual_risk: "No residual risks identified.".to_string(),
        }
    }

    async fn insert_solver(repo: &SqliteRunRepository, run_id: Uuid) -> Uuid {
        let pass = Pass::new(Uuid::new_v4(), run_id, PassType::Solver, "m").succeeded(PassOutput::Candidate(
            CandidateOutput { answer: "Rayleigh scattering".to_string(), citations: vec![], well_formed: true },
        ));
        SqlitePassRepository::new(repo.pool.clone()).insert(&pass).await.unwrap();
        pass.id
    }

    async fn winners(repo: &SqliteRunRepository, run_id: Uuid) -> Vec<Uuid> {
        SqlitePassRepository::new(repo.pool.clone())
            .list_by_run(run_id)
            .await
            .unwrap()
            .into_iter()
            .filter(|p| p.is_winner)
            .map(|p| p.id)
            .collect()
    }

    #[tokio::test]
    async fn test_succeed_writes_final_output_and_winner() {
        let repo = setup_test_repo().await;
        let run = Run::new("alice", "standard", "goal", 1);
        repo.create(&run).await.unwrap();
        repo.transition(run.id, &RunTransition::Start).await.unwrap();
        let winner = insert_solver(&repo, run.id).await;

        let succeed = RunTransition::Succeed { output: output(), verify_score: 0.9, winner_pass_id: winner };
        assert!(repo.transition(run.id, &succeed).await.unwrap());

        let fetched = repo.get(run.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, RunStatus::Success);
        assert_eq!(fetched.final_output, Some(output()));
        assert_eq!(fetched.verify_score, Some(0.9));
        assert_eq!(fetched.residual_risk.as_deref(), Some("No residual risks identified."));
        assert_eq!(winners(&repo, run.id).await, vec![winner]);
    }

    #[tokio::test]
    async fn test_succeed_after_cancel_marks_no_winner() {
        let repo = setup_test_repo().await;
        let run = Run::new("alice", "standard", "goal", 1);
        repo.create(&run).await.unwrap();
        repo.transition(run.id, &RunTransition::Start).await.unwrap();
        let candidate = insert_solver(&repo, run.id).await;
        assert!(repo.transition(run.id, &RunTransition::Cancel).await.unwrap());

        let succeed = RunTransition::Succeed { output: output(), verify_score: 0.9, winner_pass_id: candidate };
        assert!(!repo.transition(run.id, &succeed).await.unwrap());

        let fetched = repo.get(run.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, RunStatus::Cancelled);
        assert!(fetched.final_output.is_none());
        assert!(winners(&repo, run.id).await.is_empty());
    }

    #[tokio::test]
    async fn test_succeed_with_invalid_winner_leaves_run_running() {
        let repo = setup_test_repo().await;
        let run = Run::new("alice", "standard", "goal", 1);
        repo.create(&run).await.unwrap();
        repo.transition(run.id, &RunTransition::Start).await.unwrap();

        let succeed = RunTransition::Succeed { output: output(), verify_score: 0.9, winner_pass_id: Uuid::new_v4() };
        let err = repo.transition(run.id, &succeed).await.unwrap_err();
        assert!(matches!(err, DomainError::PassNotFound(_)));

        let fetched = repo.get(run.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, RunStatus::Running);
        assert!(fetched.final_output.is_none());
    }

    #[tokio::test]
    async fn test_transition_unknown_run() {
        let repo = setup_test_repo().await;
        let err = repo.transition(Uuid::new_v4(), &RunTransition::Start).await.unwrap_err();
        assert!(matches!(err, DomainError::RunNotFound(_)));
    }

    #[tokio::test]
    async fn test_increment_is_idempotent_per_charge() {
        let repo = setup_test_repo().await;
        let run = Run::new("alice", "standard", "goal", 1_000);
        repo.create(&run).await.unwrap();

        let charge = Uuid::new_v4();
        assert!(repo.increment_totals(run.id, charge, 100, 40, 12).await.unwrap());
        assert!(!repo.increment_totals(run.id, charge, 100, 40, 12).await.unwrap());
        assert!(repo.increment_totals(run.id, Uuid::new_v4(), 50, 10, 3).await.unwrap());

        let fetched = repo.get(run.id).await.unwrap().unwrap();
        assert_eq!(fetched.total_tokens, 150);
        assert_eq!(fetched.total_cost_nanos, 50);
        assert_eq!(fetched.total_latency_ms, 15);
    }

    #[tokio::test]
    async fn test_increment_rejects_negative_and_unknown_run() {
        let repo = setup_test_repo().await;
        let run = Run::new("alice", "standard", "goal", 1_000);
        repo.create(&run).await.unwrap();

        assert!(repo.increment_totals(run.id, Uuid::new_v4(), -1, 0, 0).await.is_err());
        let err = repo.increment_totals(Uuid::new_v4(), Uuid::new_v4(), 1, 1, 1).await.unwrap_err();
        assert!(matches!(err, DomainError::RunNotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_increments_lose_nothing() {
        let repo = setup_test_repo().await;
        let run = Run::new("alice", "standard", "goal", 1_000_000);
        repo.create(&run).await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let repo = repo.clone();
                let run_id = run.id;
                tokio::spawn(async move { repo.increment_totals(run_id, Uuid::new_v4(), 10, 7, 1).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().unwrap());
        }

        let fetched = repo.get(run.id).await.unwrap().unwrap();
        assert_eq!(fetched.total_tokens, 160);
        assert_eq!(fetched.total_cost_nanos, 112);
    }

    #[tokio::test]
    async fn test_list_filters_by_user() {
        let repo = setup_test_repo().await;
        repo.create(&Run::new("alice", "standard", "a", 1)).await.unwrap();
        repo.create(&Run::new("bob", "standard", "b", 1)).await.unwrap();

        let runs = repo
            .list(RunFilter { user_id: Some("alice".to_string()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].user_id, "alice");
    }
}
