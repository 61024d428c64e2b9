//! Run orchestrator (job controller).
//!
//! Owns the run state machine `pending → running → {success, error,
//! cancelled}` and sequences the stages: planning, evidence (only when the
//! plan asks for it), solving, verification and final assembly. Every stage
//! starts with a durable-status check, so a cancel issued from another
//! process stops the pipeline at the next stage boundary. Stages that call a
//! model also start with an advisory budget headroom check; assembly does
//! not, so a run whose judges overshot the cap still delivers its winner.
//! Success and the winner flag are written in one transaction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::adapters::sqlite::SqliteRepositories;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Artifact, CandidateOutput, Check, Citation, Config, CostSummary, FinalOutput, LaneConfig, Pass,
    PassType, Plan, Run, RunStatus, RunTransition, Stage,
};
use crate::domain::ports::{
    ArtifactRepository, CacheRepository, CheckRepository, CostLedgerRepository, EvidenceSource,
    ModelProvider, PassRepository, RunRepository,
};
use crate::services::budget_ledger::BudgetLedger;
use crate::services::errors::{PipelineError, PipelineResult};
use crate::services::evidence_gatherer::{EvidenceGatherer, EvidenceSet};
use crate::services::pass_cache::PassCache;
use crate::services::pass_runner::{build_rate_limiter, PassOutcome, PassRunner};
use crate::services::planner::Planner;
use crate::services::pricing::PricingTable;
use crate::services::solver_pool::{SolveContext, SolverPool};
use crate::services::verifier::{VerificationInput, VerifiedCandidate, Verifier};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Progress notifications for subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Submitted { run_id: Uuid, lane_id: String },
    PhaseStarted { run_id: Uuid, stage: Stage },
    PhaseCompleted { run_id: Uuid, stage: Stage },
    CandidateSettled { run_id: Uuid, candidate_index: u32, succeeded: bool },
    Finished { run_id: Uuid, status: RunStatus },
}

impl RunEvent {
    pub fn run_id(&self) -> Uuid {
        match self {
            Self::Submitted { run_id, .. }
            | Self::PhaseStarted { run_id, .. }
            | Self::PhaseCompleted { run_id, .. }
            | Self::CandidateSettled { run_id, .. }
            | Self::Finished { run_id, .. } => *run_id,
        }
    }
}

/// Current view of a run; every part is partial until the run finishes.
#[derive(Debug, Clone)]
pub struct RunSnapshot {
    pub run: Run,
    pub plan: Option<Plan>,
    pub artifacts: Vec<Artifact>,
    pub candidates: Vec<Pass>,
    pub checks: Vec<Check>,
}

/// Persistence ports used by the pipeline.
#[derive(Clone)]
pub struct RunStores {
    pub runs: Arc<dyn RunRepository>,
    pub passes: Arc<dyn PassRepository>,
    pub artifacts: Arc<dyn ArtifactRepository>,
    pub checks: Arc<dyn CheckRepository>,
    pub cache: Arc<dyn CacheRepository>,
    pub costs: Arc<dyn CostLedgerRepository>,
}

impl From<SqliteRepositories> for RunStores {
    fn from(repos: SqliteRepositories) -> Self {
        Self {
            runs: Arc::new(repos.runs),
            passes: Arc::new(repos.passes),
            artifacts: Arc::new(repos.artifacts),
            checks: Arc::new(repos.checks),
            cache: Arc::new(repos.cache),
            costs: Arc::new(repos.costs),
        }
    }
}

struct Job {
    handle: JoinHandle<()>,
    cancelled: Arc<AtomicBool>,
}

#[derive(Clone)]
pub struct RunOrchestrator {
    stores: RunStores,
    ledger: BudgetLedger,
    planner: Planner,
    gatherer: EvidenceGatherer,
    solvers: SolverPool,
    verifier: Verifier,
    events: broadcast::Sender<RunEvent>,
    jobs: Arc<Mutex<HashMap<Uuid, Job>>>,
}

impl RunOrchestrator {
    pub fn new(
        stores: RunStores,
        provider: Arc<dyn ModelProvider>,
        sources: Vec<Arc<dyn EvidenceSource>>,
        config: &Config,
    ) -> Self {
        let cache = PassCache::new(stores.cache.clone(), &config.cache);
        let ledger = BudgetLedger::new(
            stores.runs.clone(),
            stores.costs.clone(),
            Arc::new(PricingTable::new(&config.pricing)),
        );
        let runner = PassRunner::new(
            provider,
            stores.passes.clone(),
            cache.clone(),
            ledger.clone(),
            Arc::new(build_rate_limiter(&config.rate_limit)),
            config.retry.clone(),
        );
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            planner: Planner::new(runner.clone()),
            gatherer: EvidenceGatherer::new(sources, stores.passes.clone(), stores.artifacts.clone(), cache),
            solvers: SolverPool::new(runner.clone()),
            verifier: Verifier::new(runner, stores.passes.clone(), stores.checks.clone()),
            ledger,
            stores,
            events,
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe to phase events of every run.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: RunEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Validate and persist a new run, then start its pipeline in the
    /// background. Returns as soon as the run is `running`.
    pub async fn submit(&self, goal: &str, lane: LaneConfig, user_id: &str) -> DomainResult<Uuid> {
        let goal = goal.trim();
        if goal.is_empty() {
            return Err(DomainError::ValidationFailed("goal must not be empty".to_string()));
        }
        if lane.id.trim().is_empty() {
            return Err(DomainError::ValidationFailed("lane id must not be empty".to_string()));
        }
        if user_id.trim().is_empty() {
            return Err(DomainError::ValidationFailed("user id must not be empty".to_string()));
        }
        let mut lane = lane;
        lane.candidate_count = lane.effective_candidate_count();
        let cap = lane.budget_cap_nanos();
        if cap <= 0 {
            return Err(DomainError::ValidationFailed(format!(
                "lane {} has a non-positive budget cap",
                lane.id
            )));
        }

        let run = Run::new(user_id, lane.id.clone(), goal, cap);
        self.stores.runs.create(&run).await?;
        self.emit(RunEvent::Submitted {
            run_id: run.id,
            lane_id: lane.id.clone(),
        });
        self.stores.runs.transition(run.id, &RunTransition::Start).await?;
        tracing::info!(run_id = %run.id, lane = %lane.id, user_id, "run submitted");

        let cancelled = Arc::new(AtomicBool::new(false));
        let this = self.clone();
        let flag = cancelled.clone();
        let run_id = run.id;
        let goal = goal.to_string();
        let handle = tokio::spawn(async move {
            this.execute(run_id, goal, lane, flag).await;
        });

        self.jobs.lock().await.insert(run_id, Job { handle, cancelled });
        Ok(run_id)
    }

    /// Current run row plus whatever plan, evidence, candidates and checks
    /// exist so far.
    pub async fn get_run(&self, run_id: Uuid) -> DomainResult<RunSnapshot> {
        let run = self
            .stores
            .runs
            .get(run_id)
            .await?
            .ok_or(DomainError::RunNotFound(run_id))?;
        let passes = self.stores.passes.list_by_run(run_id).await?;

        let plan = passes
            .iter()
            .rev()
            .filter(|p| p.pass_type == PassType::Planner)
            .find_map(|p| p.plan().cloned());
        let candidates = passes
            .into_iter()
            .filter(|p| p.pass_type == PassType::Solver)
            .collect();

        Ok(RunSnapshot {
            run,
            plan,
            artifacts: self.stores.artifacts.list_by_run(run_id).await?,
            candidates,
            checks: self.stores.checks.list_by_run(run_id).await?,
        })
    }

    /// Cancel a pending or running run. Cancelling an already-cancelled run
    /// is a no-op; a finished run cannot be cancelled.
    pub async fn cancel(&self, run_id: Uuid) -> DomainResult<()> {
        let run = self
            .stores
            .runs
            .get(run_id)
            .await?
            .ok_or(DomainError::RunNotFound(run_id))?;

        if run.status == RunStatus::Cancelled {
            return Ok(());
        }

        let applied = self.stores.runs.transition(run_id, &RunTransition::Cancel).await?;
        if !applied {
            let current = self
                .stores
                .runs
                .get(run_id)
                .await?
                .map(|r| r.status)
                .unwrap_or(run.status);
            if current != RunStatus::Cancelled {
                return Err(DomainError::InvalidStateTransition {
                    from: current.as_str().to_string(),
                    to: RunStatus::Cancelled.as_str().to_string(),
                    reason: "run already finished".to_string(),
                });
            }
            return Ok(());
        }

        let local = match self.jobs.lock().await.get(&run_id) {
            Some(job) => {
                job.cancelled.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        };
        if !local {
            self.emit(RunEvent::Finished {
                run_id,
                status: RunStatus::Cancelled,
            });
        }
        tracing::info!(run_id = %run_id, "run cancelled");
        Ok(())
    }

    /// Wait for a run started by this orchestrator to stop, then return its
    /// final row. Runs owned elsewhere are returned as currently stored.
    pub async fn wait(&self, run_id: Uuid) -> DomainResult<Run> {
        let job = self.jobs.lock().await.remove(&run_id);
        if let Some(job) = job {
            job.handle
                .await
                .map_err(|e| DomainError::ExecutionFailed(format!("pipeline task aborted: {}", e)))?;
        }
        self.stores
            .runs
            .get(run_id)
            .await?
            .ok_or(DomainError::RunNotFound(run_id))
    }

    async fn execute(&self, run_id: Uuid, goal: String, lane: LaneConfig, cancelled: Arc<AtomicBool>) {
        let mut stage = Stage::Planning;
        let result = self.pipeline(run_id, &goal, &lane, &cancelled, &mut stage).await;

        if let Err(error) = result {
            let reason = match error {
                PipelineError::Cancelled => None,
                PipelineError::NoViableCandidates => {
                    stage = Stage::Solving;
                    Some(error.to_string())
                }
                PipelineError::StageFailed { stage: failed, reason } => {
                    stage = failed;
                    Some(reason)
                }
                other => Some(other.to_string()),
            };

            match reason {
                None => tracing::info!(run_id = %run_id, stage = %stage, "pipeline stopped after cancellation"),
                Some(reason) => {
                    tracing::error!(run_id = %run_id, stage = %stage, reason = %reason, "run failed");
                    let transition = RunTransition::Fail { stage, reason };
                    match self.stores.runs.transition(run_id, &transition).await {
                        Ok(true) => {}
                        Ok(false) => tracing::info!(run_id = %run_id, "run already terminal, failure not recorded"),
                        Err(e) => tracing::error!(run_id = %run_id, error = %e, "failed to record run failure"),
                    }
                }
            }
        }

        let status = match self.stores.runs.get(run_id).await {
            Ok(Some(run)) => run.status,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(run_id = %run_id, error = %e, "failed to read final run status");
                return;
            }
        };
        self.log_costs(run_id, status).await;
        self.emit(RunEvent::Finished { run_id, status });
    }

    async fn log_costs(&self, run_id: Uuid, status: RunStatus) {
        match self.stores.costs.list_by_run(run_id).await {
            Ok(entries) => {
                let mut summary = CostSummary::default();
                for entry in &entries {
                    summary.add(entry);
                }
                tracing::info!(run_id = %run_id, status = status.as_str(), "{}", summary.format_summary());
            }
            Err(e) => tracing::warn!(run_id = %run_id, error = %e, "failed to summarize run costs"),
        }
    }

    /// Stop if the run was cancelled, here or in another process.
    async fn ensure_active(&self, run_id: Uuid, cancelled: &AtomicBool) -> PipelineResult<()> {
        if cancelled.load(Ordering::SeqCst) {
            return Err(PipelineError::Cancelled);
        }
        match self.stores.runs.get(run_id).await? {
            Some(run) if run.status == RunStatus::Running => Ok(()),
            Some(_) => Err(PipelineError::Cancelled),
            None => Err(DomainError::RunNotFound(run_id).into()),
        }
    }

    async fn begin_stage(
        &self,
        run_id: Uuid,
        stage: Stage,
        estimate_nanos: i64,
        cancelled: &AtomicBool,
    ) -> PipelineResult<()> {
        self.ensure_active(run_id, cancelled).await?;
        let headroom = self.ledger.check_headroom(run_id, estimate_nanos).await?;
        if !headroom.is_sufficient() {
            return Err(PipelineError::BudgetExceeded(headroom.describe()));
        }
        tracing::debug!(run_id = %run_id, stage = %stage, estimate_nanos, "stage started");
        self.emit(RunEvent::PhaseStarted { run_id, stage });
        Ok(())
    }

    async fn pipeline(
        &self,
        run_id: Uuid,
        goal: &str,
        lane: &LaneConfig,
        cancelled: &AtomicBool,
        stage: &mut Stage,
    ) -> PipelineResult<()> {
        *stage = Stage::Planning;
        self.begin_stage(run_id, *stage, self.planner.estimate_nanos(goal, lane), cancelled)
            .await?;
        let plan = self.planner.plan(run_id, goal, lane).await?;
        self.emit(RunEvent::PhaseCompleted { run_id, stage: *stage });

        let evidence = if plan.requires_evidence {
            *stage = Stage::Evidence;
            self.begin_stage(run_id, *stage, 0, cancelled).await?;
            let evidence = self.gatherer.gather(run_id, goal, lane).await?;
            self.emit(RunEvent::PhaseCompleted { run_id, stage: *stage });
            evidence
        } else {
            EvidenceSet::default()
        };

        *stage = Stage::Solving;
        let ctx = SolveContext {
            run_id,
            goal: goal.to_string(),
            plan: plan.clone(),
            evidence: evidence.clone(),
            lane: lane.clone(),
        };
        self.begin_stage(run_id, *stage, self.solvers.estimate_nanos(&ctx), cancelled)
            .await?;
        let outcomes = self
            .solvers
            .solve(ctx, |outcome| {
                self.emit(RunEvent::CandidateSettled {
                    run_id,
                    candidate_index: outcome.pass().candidate_index,
                    succeeded: outcome.is_succeeded(),
                })
            })
            .await?;
        self.emit(RunEvent::PhaseCompleted { run_id, stage: *stage });

        let total = outcomes.len();
        let candidates: Vec<VerifiedCandidate> = outcomes
            .into_iter()
            .filter_map(|outcome| match outcome {
                PassOutcome::Succeeded { pass, value } => Some(VerifiedCandidate { pass, output: value }),
                PassOutcome::Failed { .. } => None,
            })
            .collect();
        if candidates.is_empty() {
            return Err(PipelineError::NoViableCandidates);
        }

        *stage = Stage::Verification;
        let input = VerificationInput {
            run_id,
            goal: goal.to_string(),
            lane: lane.clone(),
            evidence,
            evidence_required: plan.requires_evidence,
            failed_candidates: total - candidates.len(),
            candidates,
        };
        self.begin_stage(run_id, *stage, self.verifier.estimate_nanos(&input), cancelled)
            .await?;
        let verification = self
            .verifier
            .verify(&input)
            .await?
            .ok_or(PipelineError::NoViableCandidates)?;
        self.emit(RunEvent::PhaseCompleted { run_id, stage: *stage });

        // No model call here, so no headroom check.
        *stage = Stage::Assembly;
        self.ensure_active(run_id, cancelled).await?;
        tracing::debug!(run_id = %run_id, stage = %stage, "stage started");
        self.emit(RunEvent::PhaseStarted { run_id, stage: *stage });
        let output = FinalOutput {
            answer: verification.winner.output.answer.clone(),
            citations: used_citations(&verification.winner.output, &input.evidence),
            residual_risk: verification.residual_risk.clone(),
        };
        let applied = self
            .stores
            .runs
            .transition(
                run_id,
                &RunTransition::Succeed {
                    output,
                    verify_score: verification.selection.verify_score,
                    winner_pass_id: verification.winner.pass.id,
                },
            )
            .await?;
        if !applied {
            return Err(PipelineError::Cancelled);
        }
        self.emit(RunEvent::PhaseCompleted { run_id, stage: *stage });
        tracing::info!(
            run_id = %run_id,
            verify_score = verification.selection.verify_score,
            "run succeeded"
        );
        Ok(())
    }
}

/// Evidence the answer actually cites, in citation order, without repeats.
fn used_citations(candidate: &CandidateOutput, evidence: &EvidenceSet) -> Vec<Citation> {
    let mut seen: Vec<&str> = Vec::new();
    let mut citations = Vec::new();
    for ref_id in &candidate.citations {
        if seen.contains(&ref_id.as_str()) {
            continue;
        }
        if let Some(artifact) = evidence.get(ref_id) {
            seen.push(ref_id);
            citations.push(Citation {
                ref_id: artifact.ref_id.clone(),
                source_uri: artifact.source_uri.clone(),
                snippet: artifact.snippet.clone(),
            });
        }
    }
    citations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::providers::{ScriptedProvider, ScriptedResponse};
    use crate::adapters::sqlite::create_migrated_test_pool;

    async fn orchestrator(provider: ScriptedProvider) -> RunOrchestrator {
        let pool = create_migrated_test_pool().await.unwrap();
        RunOrchestrator::new(
            SqliteRepositories::new(pool).into(),
            Arc::new(provider),
            Vec::new(),
            &Config::default(),
        )
    }

    #[test]
    fn test_used_citations_dedups_and_drops_unknown() {
        let evidence = EvidenceSet {
            artifacts: vec![Artifact {
                id: Uuid::new_v4(),
                run_id: Uuid::nil(),
                ref_id: "R1".to_string(),
                source_type: crate::domain::models::SourceType::Web,
                source_uri: "https://a".to_string(),
                content_hash: "h".to_string(),
                snippet: "s".to_string(),
                location: None,
                relevance: 1.0,
                created_at: chrono::Utc::now(),
            }],
            errors: Vec::new(),
        };
        let candidate = CandidateOutput {
            answer: "a".to_string(),
            citations: vec!["R1".to_string(), "R7".to_string(), "R1".to_string()],
            well_formed: true,
        };
        let citations = used_citations(&candidate, &evidence);
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].source_uri, "https://a");
    }

    #[tokio::test]
    async fn test_submit_rejects_empty_goal() {
        let orchestrator = orchestrator(ScriptedProvider::offline()).await;
        let err = orchestrator
            .submit("   ", LaneConfig::new("standard"), "user-1")
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn test_offline_run_succeeds_and_streams_events() {
        let orchestrator = orchestrator(ScriptedProvider::offline()).await;
        let mut events = orchestrator.subscribe();

        let mut lane = LaneConfig::new("quick");
        lane.candidate_count = 0;
        let run_id = orchestrator.submit("Explain B-trees", lane, "user-1").await.unwrap();
        let run = orchestrator.wait(run_id).await.unwrap();

        assert_eq!(run.status, RunStatus::Success);
        assert!(run.final_output.is_some());

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(matches!(seen.first(), Some(RunEvent::Submitted { .. })));
        assert!(matches!(seen.last(), Some(RunEvent::Finished { status: RunStatus::Success, .. })));
        // candidate_count 0 is clamped to a single candidate
        assert_eq!(
            seen.iter().filter(|e| matches!(e, RunEvent::CandidateSettled { .. })).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_cancel_semantics() {
        let plan = r#"{"goal_restatement":"g","approach":"a","key_considerations":[],"estimated_steps":1,"requires_evidence":false}"#;
        let provider = ScriptedProvider::new().on(
            "goal_restatement",
            ScriptedResponse::success(plan).with_delay(std::time::Duration::from_millis(200)),
        );
        let orchestrator = orchestrator(provider).await;
        let run_id = orchestrator
            .submit("Slow goal", LaneConfig::new("standard"), "user-1")
            .await
            .unwrap();

        orchestrator.cancel(run_id).await.unwrap();
        orchestrator.cancel(run_id).await.unwrap();
        let run = orchestrator.wait(run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);

        let snapshot = orchestrator.get_run(run_id).await.unwrap();
        assert!(snapshot.candidates.is_empty());
    }

    #[tokio::test]
    async fn test_cannot_cancel_finished_run() {
        let orchestrator = orchestrator(ScriptedProvider::offline()).await;
        let run_id = orchestrator
            .submit("Explain tries", LaneConfig::new("quick"), "user-1")
            .await
            .unwrap();
        orchestrator.wait(run_id).await.unwrap();

        let err = orchestrator.cancel(run_id).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
        assert!(matches!(
            orchestrator.cancel(Uuid::new_v4()).await.unwrap_err(),
            DomainError::RunNotFound(_)
        ));
    }
}
