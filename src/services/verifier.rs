//! Verification stage: deterministic checks, optional model judgment and
//! winner selection.
//!
//! Winner selection is a pure function of the persisted [`Check`] records,
//! so re-running it over the same checks always picks the same candidate.

use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    CandidateOutput, Check, CheckKind, CheckStatus, ExecutionParams, Judgment, LaneConfig, Pass,
    PassOutput, PassType,
};
use crate::domain::ports::{CheckRepository, PassRepository};
use crate::services::errors::PassError;
use crate::services::evidence_gatherer::EvidenceSet;
use crate::services::extract_json_from_response;
use crate::services::pass_runner::{PassOutcome, PassRequest, PassRunner};

/// Multiplier applied when no candidate passed every deterministic check.
pub const SHORTFALL_PENALTY: f64 = 0.4;
/// Scores below this are reported as low confidence.
pub const LOW_CONFIDENCE_THRESHOLD: f64 = 0.5;
/// Multiplier applied when evidence was required but none was found.
pub const EVIDENCE_GAP_PENALTY: f64 = 0.8;
/// Score assigned when model judgment could not be obtained.
pub const UNJUDGED_SCORE: f64 = 0.5;

pub const CHECK_STRUCTURE: &str = "structure";
pub const CHECK_REQUIRED_FIELDS: &str = "required_fields";
pub const CHECK_CITATION_INTEGRITY: &str = "citation_integrity";
pub const CHECK_EVIDENCE_GROUNDING: &str = "evidence_grounding";

const DETERMINISTIC_MODEL: &str = "deterministic";

const JUDGE_SYSTEM: &str = "You are the judge in a multi-pass reasoning pipeline. Score one \
candidate answer for correctness, coherence and use of evidence. Respond with JSON only.";

const JUDGE_STRICT_REMINDER: &str = "Your previous reply could not be parsed. Reply with exactly \
one JSON object with a numeric score between 0 and 1 and a non-empty reasoning string.";

/// Per-candidate verdict rebuilt from checks.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateVerdict {
    pub candidate_pass_id: Uuid,
    pub candidate_index: u32,
    pub deterministic_passed: bool,
    pub failed_checks: Vec<String>,
    pub score: f64,
    /// A model judgment was attempted but could not be obtained.
    pub judgment_skipped: bool,
    pub judge_reasoning: Option<String>,
}

/// The chosen candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub candidate_pass_id: Uuid,
    pub candidate_index: u32,
    pub verify_score: f64,
    /// No candidate passed every deterministic check.
    pub shortfall: bool,
}

/// Deterministic checks for one candidate.
pub fn deterministic_checks(
    run_id: Uuid,
    verifier_pass_id: Uuid,
    candidate_pass_id: Uuid,
    candidate: &CandidateOutput,
    evidence: &EvidenceSet,
) -> Vec<Check> {
    let check = |name: &str, status: CheckStatus, reasoning: String| {
        Check::deterministic(run_id, verifier_pass_id, candidate_pass_id, name, status, reasoning)
    };
    let mut checks = Vec::with_capacity(4);

    checks.push(if candidate.well_formed {
        check(CHECK_STRUCTURE, CheckStatus::Pass, "output is the requested JSON object".to_string())
    } else {
        check(CHECK_STRUCTURE, CheckStatus::Fail, "output was not the requested JSON object".to_string())
    });

    checks.push(if candidate.answer.trim().is_empty() {
        check(CHECK_REQUIRED_FIELDS, CheckStatus::Fail, "answer is empty".to_string())
    } else {
        check(CHECK_REQUIRED_FIELDS, CheckStatus::Pass, "answer is present".to_string())
    });

    let unknown: Vec<&str> = candidate
        .citations
        .iter()
        .filter(|c| evidence.get(c).is_none())
        .map(String::as_str)
        .collect();
    checks.push(if unknown.is_empty() {
        check(
            CHECK_CITATION_INTEGRITY,
            CheckStatus::Pass,
            format!("{} citation(s) resolve to evidence", candidate.citations.len()),
        )
    } else {
        check(
            CHECK_CITATION_INTEGRITY,
            CheckStatus::Fail,
            format!("unknown evidence references: {}", unknown.join(", ")),
        )
    });

    let grounded = candidate.citations.iter().any(|c| evidence.get(c).is_some());
    checks.push(if evidence.is_empty() {
        check(CHECK_EVIDENCE_GROUNDING, CheckStatus::Skip, "no evidence available".to_string())
    } else if grounded {
        check(CHECK_EVIDENCE_GROUNDING, CheckStatus::Pass, "answer cites evidence".to_string())
    } else {
        check(CHECK_EVIDENCE_GROUNDING, CheckStatus::Fail, "answer cites no evidence".to_string())
    });

    checks
}

/// Rebuild verdicts from check records. `candidates` maps each settled
/// successful solver pass id to its candidate index.
pub fn build_verdicts(candidates: &[(Uuid, u32)], checks: &[Check]) -> Vec<CandidateVerdict> {
    candidates
        .iter()
        .map(|&(pass_id, candidate_index)| {
            let mine: Vec<&Check> = checks.iter().filter(|c| c.candidate_pass_id == pass_id).collect();
            let deterministic: Vec<&&Check> = mine.iter().filter(|c| c.kind == CheckKind::Deterministic).collect();

            let failed_checks: Vec<String> = deterministic
                .iter()
                .filter(|c| c.status == CheckStatus::Fail)
                .map(|c| c.name.clone())
                .collect();
            let applicable = deterministic.iter().filter(|c| c.status != CheckStatus::Skip).count();
            let passed = deterministic.iter().filter(|c| c.status == CheckStatus::Pass).count();
            let pass_ratio = if applicable == 0 {
                1.0
            } else {
                passed as f64 / applicable as f64
            };

            let judgment = mine.iter().find(|c| c.kind == CheckKind::ModelBased);
            let score = judgment
                .and_then(|j| j.score)
                .unwrap_or(pass_ratio)
                .clamp(0.0, 1.0);

            CandidateVerdict {
                candidate_pass_id: pass_id,
                candidate_index,
                deterministic_passed: failed_checks.is_empty(),
                failed_checks,
                score,
                judgment_skipped: judgment.is_some_and(|j| j.status == CheckStatus::Skip),
                judge_reasoning: judgment
                    .filter(|j| j.status == CheckStatus::Pass)
                    .map(|j| j.reasoning.clone()),
            }
        })
        .collect()
}

/// Pick the winner: highest score among candidates that passed every
/// deterministic check, lowest index on ties. If none passed, the highest
/// score overall wins with a penalized verify score.
pub fn select_winner(verdicts: &[CandidateVerdict], evidence_gap: bool) -> Option<Selection> {
    let any_passed = verdicts.iter().any(|v| v.deterministic_passed);
    let mut pool: Vec<&CandidateVerdict> = verdicts
        .iter()
        .filter(|v| v.deterministic_passed || !any_passed)
        .collect();
    pool.sort_by_key(|v| v.candidate_index);

    let mut best: Option<&CandidateVerdict> = None;
    for verdict in pool {
        match best {
            Some(b) if verdict.score <= b.score => {}
            _ => best = Some(verdict),
        }
    }
    let best = best?;

    let mut verify_score = best.score;
    if !any_passed {
        verify_score *= SHORTFALL_PENALTY;
    }
    if evidence_gap {
        verify_score *= EVIDENCE_GAP_PENALTY;
    }

    Some(Selection {
        candidate_pass_id: best.candidate_pass_id,
        candidate_index: best.candidate_index,
        verify_score: verify_score.clamp(0.0, 1.0),
        shortfall: !any_passed,
    })
}

/// Residual-risk note for the selected answer. Never empty.
pub fn residual_risk(
    selection: &Selection,
    verdicts: &[CandidateVerdict],
    failed_candidates: usize,
    evidence_gap: bool,
) -> String {
    let winner = verdicts
        .iter()
        .find(|v| v.candidate_pass_id == selection.candidate_pass_id);
    let total = verdicts.len() + failed_candidates;
    let mut notes: Vec<String> = Vec::new();

    if selection.shortfall {
        let failed = winner.map(|w| w.failed_checks.join(", ")).unwrap_or_default();
        notes.push(format!(
            "No candidate passed all deterministic checks; the selected answer failed: {}.",
            failed
        ));
    }
    if evidence_gap {
        notes.push("Evidence was required but none was found; the answer is not grounded in retrieved sources.".to_string());
    }
    if failed_candidates > 0 {
        notes.push(format!(
            "{} of {} candidates failed to produce an answer.",
            failed_candidates, total
        ));
    }
    if let Some(winner) = winner {
        if winner.judgment_skipped {
            notes.push("Model judgment was unavailable for the selected answer; its score is a neutral default.".to_string());
        }
        if selection.verify_score < 1.0 {
            if let Some(reasoning) = &winner.judge_reasoning {
                notes.push(format!("Judge notes: {}", reasoning.trim()));
            }
        }
    }
    if selection.verify_score < LOW_CONFIDENCE_THRESHOLD {
        notes.push(format!("Confidence is low (verify score {:.2}).", selection.verify_score));
    }

    if notes.is_empty() {
        if selection.verify_score >= 1.0 {
            return "No residual risks identified.".to_string();
        }
        return format!(
            "Verification score {:.2} indicates partial confidence.",
            selection.verify_score
        );
    }
    notes.join(" ")
}

/// Validate raw judge text.
pub fn parse_judgment(text: &str) -> Result<Judgment, String> {
    let judgment: Judgment = serde_json::from_str(extract_json_from_response(text))
        .map_err(|e| format!("judgment is not valid JSON of the expected shape: {}", e))?;
    judgment.validate()?;
    Ok(judgment)
}

/// A successful solver candidate handed to the verifier.
#[derive(Debug, Clone)]
pub struct VerifiedCandidate {
    pub pass: Pass,
    pub output: CandidateOutput,
}

/// Everything the verifier needs for one run.
#[derive(Debug, Clone)]
pub struct VerificationInput {
    pub run_id: Uuid,
    pub goal: String,
    pub lane: LaneConfig,
    pub evidence: EvidenceSet,
    pub evidence_required: bool,
    pub candidates: Vec<VerifiedCandidate>,
    pub failed_candidates: usize,
}

impl VerificationInput {
    pub fn evidence_gap(&self) -> bool {
        self.evidence_required && self.evidence.is_empty()
    }
}

/// Result of verification.
#[derive(Debug, Clone)]
pub struct VerificationOutcome {
    pub selection: Selection,
    pub winner: VerifiedCandidate,
    pub verdicts: Vec<CandidateVerdict>,
    pub residual_risk: String,
}

#[derive(Clone)]
pub struct Verifier {
    runner: PassRunner,
    passes: Arc<dyn PassRepository>,
    checks: Arc<dyn CheckRepository>,
}

impl Verifier {
    pub fn new(runner: PassRunner, passes: Arc<dyn PassRepository>, checks: Arc<dyn CheckRepository>) -> Self {
        Self { runner, passes, checks }
    }

    fn judge_params(lane: &LaneConfig) -> ExecutionParams {
        ExecutionParams {
            max_tokens: lane.judge_max_tokens,
            temperature: Some(0.0),
            seed: None,
            timeout_secs: lane.call_timeout_secs,
        }
    }

    fn judge_prompt(input: &VerificationInput, candidate: &CandidateOutput, strict: bool) -> String {
        let mut prompt = format!("Goal:\n{}\n\nCandidate answer:\n{}\n", input.goal.trim(), candidate.answer);
        if !candidate.citations.is_empty() {
            prompt.push_str("\nCited evidence:\n");
            for ref_id in &candidate.citations {
                if let Some(artifact) = input.evidence.get(ref_id) {
                    prompt.push_str(&format!("[{}] {}\n", ref_id, artifact.snippet));
                }
            }
        }
        prompt.push_str("\nReply with a JSON object: {\"score\": number between 0 and 1, \"reasoning\": string}.");
        if strict {
            prompt.push('\n');
            prompt.push_str(JUDGE_STRICT_REMINDER);
        }
        prompt
    }

    /// Worst-case cost of judging every candidate once.
    pub fn estimate_nanos(&self, input: &VerificationInput) -> i64 {
        let Some(judge_model) = &input.lane.judge_model else {
            return 0;
        };
        let pricing = self.runner.ledger().pricing();
        input
            .candidates
            .iter()
            .map(|c| {
                let chars = JUDGE_SYSTEM.len() + Self::judge_prompt(input, &c.output, true).len();
                pricing.estimate_call_nanos(judge_model, chars, input.lane.judge_max_tokens)
            })
            .sum()
    }

    /// Check every candidate, judge the eligible ones and select a winner.
    /// Returns `None` only when there are no candidates.
    pub async fn verify(&self, input: &VerificationInput) -> DomainResult<Option<VerificationOutcome>> {
        if input.candidates.is_empty() {
            return Ok(None);
        }

        let verifier_pass_id = Uuid::new_v4();
        let mut checks: Vec<Check> = Vec::new();
        let mut fully_passing: Vec<u32> = Vec::new();
        for candidate in &input.candidates {
            let candidate_checks = deterministic_checks(
                input.run_id,
                verifier_pass_id,
                candidate.pass.id,
                &candidate.output,
                &input.evidence,
            );
            if candidate_checks.iter().all(|c| c.status != CheckStatus::Fail) {
                fully_passing.push(candidate.pass.candidate_index);
            }
            checks.extend(candidate_checks);
        }

        let verifier_pass = Pass::new(verifier_pass_id, input.run_id, PassType::VerifierDeterministic, DETERMINISTIC_MODEL)
            .with_input(json!({ "candidates": input.candidates.len(), "evidence": input.evidence.artifacts.len() }))
            .succeeded(PassOutput::DeterministicChecks {
                candidates_checked: input.candidates.len(),
                fully_passing: fully_passing.clone(),
            });
        self.passes.insert(&verifier_pass).await?;
        self.checks.insert_batch(&checks).await?;

        if input.lane.judge_model.is_some() {
            let eligible = input
                .candidates
                .iter()
                .filter(|c| fully_passing.contains(&c.pass.candidate_index));
            let judgments = join_all(eligible.map(|c| self.judge(input, c))).await;
            let mut model_checks = Vec::new();
            for judgment in judgments {
                model_checks.push(judgment?);
            }
            self.checks.insert_batch(&model_checks).await?;
            checks.extend(model_checks);
        }

        let index: Vec<(Uuid, u32)> = input
            .candidates
            .iter()
            .map(|c| (c.pass.id, c.pass.candidate_index))
            .collect();
        let verdicts = build_verdicts(&index, &checks);
        let Some(selection) = select_winner(&verdicts, input.evidence_gap()) else {
            return Ok(None);
        };
        let risk = residual_risk(&selection, &verdicts, input.failed_candidates, input.evidence_gap());

        let Some(winner) = input
            .candidates
            .iter()
            .find(|c| c.pass.id == selection.candidate_pass_id)
            .cloned()
        else {
            return Ok(None);
        };

        tracing::info!(
            run_id = %input.run_id,
            candidate_index = selection.candidate_index,
            verify_score = selection.verify_score,
            shortfall = selection.shortfall,
            "winner selected"
        );

        Ok(Some(VerificationOutcome {
            selection,
            winner,
            verdicts,
            residual_risk: risk,
        }))
    }

    /// One judgment with a single corrective retry. A judgment that cannot
    /// be obtained becomes a `skip` check scored [`UNJUDGED_SCORE`].
    async fn judge(&self, input: &VerificationInput, candidate: &VerifiedCandidate) -> DomainResult<Check> {
        let judge_model = input.lane.judge_model.clone().unwrap_or_default();
        let cache_input = format!(
            "{}\n{}\n{}\n{}",
            input.goal,
            candidate.output.answer,
            candidate.output.citations.join(","),
            input.evidence.fingerprint()
        );
        let mut last_pass_id = None;
        let mut last_error = String::new();

        for attempt in 1..=2u32 {
            let request = PassRequest::new(
                input.run_id,
                PassType::VerifierModel,
                judge_model.clone(),
                JUDGE_SYSTEM,
                Self::judge_prompt(input, &candidate.output, attempt > 1),
                Self::judge_params(&input.lane),
            )
            .with_candidate_index(candidate.pass.candidate_index)
            .with_snapshot(json!({ "candidate_pass_id": candidate.pass.id, "attempt": attempt }))
            .cached_by(cache_input.clone());

            match self.runner.run(request, parse_judgment).await? {
                PassOutcome::Succeeded { pass, value } => {
                    return Ok(Check::model_based(
                        input.run_id,
                        pass.id,
                        candidate.pass.id,
                        CheckStatus::Pass,
                        Some(value.score),
                        value.reasoning,
                    ));
                }
                PassOutcome::Failed { pass, error } => {
                    last_pass_id = Some(pass.id);
                    last_error = error.to_string();
                    if !matches!(error, PassError::Schema(_)) {
                        break;
                    }
                }
            }
        }

        tracing::warn!(
            run_id = %input.run_id,
            candidate_index = candidate.pass.candidate_index,
            error = %last_error,
            "model judgment unavailable"
        );
        Ok(Check::model_based(
            input.run_id,
            last_pass_id.unwrap_or(candidate.pass.id),
            candidate.pass.id,
            CheckStatus::Skip,
            Some(UNJUDGED_SCORE),
            format!("judgment unavailable: {}", last_error),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Artifact, SourceType};
    use chrono::Utc;
    use proptest::prelude::*;

    fn evidence(refs: &[&str]) -> EvidenceSet {
        EvidenceSet {
            artifacts: refs
                .iter()
                .map(|r| Artifact {
                    id: Uuid::new_v4(),
                    run_id: Uuid::nil(),
                    ref_id: r.to_string(),
                    source_type: SourceType::Web,
                    source_uri: format!("https://example.com/{}", r),
                    content_hash: r.to_string(),
                    snippet: format!("snippet {}", r),
                    location: None,
                    relevance: 1.0,
                    created_at: Utc::now(),
                })
                .collect(),
            errors: Vec::new(),
        }
    }

    fn candidate(answer: &str, citations: &[&str], well_formed: bool) -> CandidateOutput {
        CandidateOutput {
            answer: answer.to_string(),
            citations: citations.iter().map(|c| c.to_string()).collect(),
            well_formed,
        }
    }

    fn verdict(index: u32, passed: bool, score: f64) -> CandidateVerdict {
        CandidateVerdict {
            candidate_pass_id: Uuid::from_u128(u128::from(index) + 1),
            candidate_index: index,
            deterministic_passed: passed,
            failed_checks: if passed { vec![] } else { vec![CHECK_STRUCTURE.to_string()] },
            score,
            judgment_skipped: false,
            judge_reasoning: None,
        }
    }

    fn statuses(checks: &[Check]) -> Vec<(String, CheckStatus)> {
        checks.iter().map(|c| (c.name.clone(), c.status)).collect()
    }

    #[test]
    fn test_checks_for_grounded_candidate() {
        let checks = deterministic_checks(Uuid::nil(), Uuid::nil(), Uuid::nil(), &candidate("a", &["R1"], true), &evidence(&["R1", "R2"]));
        assert!(checks.iter().all(|c| c.status == CheckStatus::Pass));
    }

    #[test]
    fn test_checks_flag_unknown_citation() {
        let checks = deterministic_checks(Uuid::nil(), Uuid::nil(), Uuid::nil(), &candidate("a", &["R9"], true), &evidence(&["R1"]));
        let s = statuses(&checks);
        assert!(s.contains(&(CHECK_CITATION_INTEGRITY.to_string(), CheckStatus::Fail)));
        assert!(s.contains(&(CHECK_EVIDENCE_GROUNDING.to_string(), CheckStatus::Fail)));
    }

    #[test]
    fn test_grounding_skipped_without_evidence() {
        let checks = deterministic_checks(Uuid::nil(), Uuid::nil(), Uuid::nil(), &candidate("a", &[], true), &EvidenceSet::default());
        let s = statuses(&checks);
        assert!(s.contains(&(CHECK_EVIDENCE_GROUNDING.to_string(), CheckStatus::Skip)));
        assert!(!s.iter().any(|(_, st)| *st == CheckStatus::Fail));
    }

    #[test]
    fn test_winner_prefers_passing_candidates() {
        let verdicts = vec![verdict(0, false, 0.99), verdict(1, true, 0.6), verdict(2, true, 0.7)];
        let selection = select_winner(&verdicts, false).unwrap();
        assert_eq!(selection.candidate_index, 2);
        assert!(!selection.shortfall);
        assert_eq!(selection.verify_score, 0.7);
    }

    #[test]
    fn test_ties_go_to_lowest_index() {
        let verdicts = vec![verdict(2, true, 0.8), verdict(0, true, 0.8), verdict(1, true, 0.8)];
        assert_eq!(select_winner(&verdicts, false).unwrap().candidate_index, 0);
    }

    #[test]
    fn test_shortfall_is_penalized_below_threshold() {
        let verdicts = vec![verdict(0, false, 0.75), verdict(1, false, 1.0)];
        let selection = select_winner(&verdicts, false).unwrap();
        assert_eq!(selection.candidate_index, 1);
        assert!(selection.shortfall);
        assert!(selection.verify_score < LOW_CONFIDENCE_THRESHOLD);

        let risk = residual_risk(&selection, &verdicts, 0, false);
        assert!(risk.contains("No candidate passed all deterministic checks"));
        assert!(risk.contains(CHECK_STRUCTURE));
    }

    #[test]
    fn test_evidence_gap_penalty_and_note() {
        let verdicts = vec![verdict(0, true, 1.0)];
        let selection = select_winner(&verdicts, true).unwrap();
        assert!((selection.verify_score - EVIDENCE_GAP_PENALTY).abs() < f64::EPSILON);
        assert!(residual_risk(&selection, &verdicts, 0, true).contains("Evidence was required"));
    }

    #[test]
    fn test_full_confidence_risk_note() {
        let verdicts = vec![verdict(0, true, 1.0)];
        let selection = select_winner(&verdicts, false).unwrap();
        assert_eq!(residual_risk(&selection, &verdicts, 0, false), "No residual risks identified.");
        assert!(residual_risk(&selection, &verdicts, 2, false).contains("2 of 3 candidates failed"));
    }

    #[test]
    fn test_verdicts_rebuilt_from_checks() {
        let pass_a = Uuid::from_u128(1);
        let pass_b = Uuid::from_u128(2);
        let vp = Uuid::from_u128(99);
        let mut checks = deterministic_checks(Uuid::nil(), vp, pass_a, &candidate("a", &[], true), &EvidenceSet::default());
        checks.extend(deterministic_checks(Uuid::nil(), vp, pass_b, &candidate("b", &[], false), &EvidenceSet::default()));
        checks.push(Check::model_based(Uuid::nil(), vp, pass_a, CheckStatus::Pass, Some(0.9), "good"));

        let verdicts = build_verdicts(&[(pass_a, 0), (pass_b, 1)], &checks);
        assert!(verdicts[0].deterministic_passed);
        assert_eq!(verdicts[0].score, 0.9);
        assert!(!verdicts[1].deterministic_passed);
        // structure failed, required_fields and citation_integrity passed, grounding skipped
        assert!((verdicts[1].score - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_judgment_range() {
        assert!(parse_judgment(r#"{"score": 0.4, "reasoning": "ok"}"#).is_ok());
        assert!(parse_judgment(r#"{"score": 1.4, "reasoning": "ok"}"#).is_err());
        assert!(parse_judgment("great answer").is_err());
    }

    proptest! {
        #[test]
        fn prop_selection_is_deterministic_and_order_independent(
            entries in prop::collection::vec((any::<bool>(), 0u32..=10), 1..8)
        ) {
            let verdicts: Vec<CandidateVerdict> = entries
                .iter()
                .enumerate()
                .map(|(i, (passed, score))| verdict(i as u32, *passed, f64::from(*score) / 10.0))
                .collect();
            let mut reversed = verdicts.clone();
            reversed.reverse();

            let a = select_winner(&verdicts, false);
            let b = select_winner(&reversed, false);
            prop_assert_eq!(a.clone(), b);
            let a = a.unwrap();
            prop_assert!(a.verify_score <= 1.0);
            if a.shortfall {
                prop_assert!(a.verify_score < LOW_CONFIDENCE_THRESHOLD);
            }
        }
    }
}
