//! Candidate scoring, ranking and selection.
//!
//! Everything here is a pure function of its inputs: no clocks, no
//! randomness, no hash-map iteration. Ties always break on `candidate_id`.

use codex_core::{reason_codes, Violation, ViolationCode};
use codex_integrity::{IntegrityEvaluation, IntegrityEvaluationA};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Anything the router can rank: a verdict plus its violations.
pub trait Assessment {
    fn is_valid(&self) -> bool;
    fn violations(&self) -> &[Violation];

    fn codes(&self) -> Vec<ViolationCode> {
        reason_codes(self.violations())
    }
}

impl Assessment for IntegrityEvaluation {
    fn is_valid(&self) -> bool {
        self.valid
    }

    fn violations(&self) -> &[Violation] {
        &self.violations
    }
}

impl Assessment for IntegrityEvaluationA {
    fn is_valid(&self) -> bool {
        self.valid_a
    }

    fn violations(&self) -> &[Violation] {
        &self.violations
    }
}

fn code_weight(code: ViolationCode) -> u64 {
    match code {
        ViolationCode::Tamper => 1000,
        ViolationCode::ProofInvalid => 500,
        ViolationCode::ViolationOfVow => 200,
        ViolationCode::Entropy => 100,
        _ => 150,
    }
}

/// 0 for a valid evaluation; otherwise the weight of each distinct code plus
/// 5 per violation. Lower is better.
pub fn score_evaluation<E: Assessment>(evaluation: &E) -> u64 {
    if evaluation.is_valid() {
        return 0;
    }
    let weights: u64 = evaluation.codes().into_iter().map(code_weight).sum();
    weights + 5 * evaluation.violations().len() as u64
}

/// Ordinal for stage-A ordering: valid 0, then tamper, vow, entropy, other.
/// A code set takes the class of its most severe member.
pub fn severity_class<E: Assessment>(evaluation: &E) -> u8 {
    if evaluation.is_valid() {
        return 0;
    }
    evaluation
        .codes()
        .into_iter()
        .map(|code| match code {
            ViolationCode::Tamper => 1,
            ViolationCode::ViolationOfVow => 2,
            ViolationCode::Entropy => 3,
            _ => 4,
        })
        .min()
        .unwrap_or(4)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidateResult<E> {
    pub candidate_id: String,
    pub evaluation: E,
    pub score: u64,
    /// 1-based.
    pub rank: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStatus {
    Selected,
    NoAdmissibleCandidate,
}

impl SelectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Selected => "selected",
            Self::NoAdmissibleCandidate => "no_admissible_candidate",
        }
    }
}

impl std::fmt::Display for SelectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn ranked<E, F>(results: &[(String, E)], order: F) -> Vec<CandidateResult<E>>
where
    E: Assessment + Clone,
    F: Fn(&CandidateResult<E>, &CandidateResult<E>) -> Ordering,
{
    let mut scored: Vec<CandidateResult<E>> = results
        .iter()
        .map(|(id, evaluation)| CandidateResult {
            candidate_id: id.clone(),
            score: score_evaluation(evaluation),
            evaluation: evaluation.clone(),
            rank: 0,
        })
        .collect();
    scored.sort_by(|a, b| order(a, b));
    for (i, result) in scored.iter_mut().enumerate() {
        result.rank = i + 1;
    }
    scored
}

/// Sort by `(invalid, score, candidate_id)`.
pub fn rank_candidates<E: Assessment + Clone>(results: &[(String, E)]) -> Vec<CandidateResult<E>> {
    ranked(results, |a, b| {
        (!a.evaluation.is_valid(), a.score, &a.candidate_id).cmp(&(
            !b.evaluation.is_valid(),
            b.score,
            &b.candidate_id,
        ))
    })
}

/// Sort by `(invalid, severity_class, violation_count, candidate_id)`.
pub fn rank_stage_a<E: Assessment + Clone>(results: &[(String, E)]) -> Vec<CandidateResult<E>> {
    let key = |r: &CandidateResult<E>| {
        (
            !r.evaluation.is_valid(),
            severity_class(&r.evaluation),
            r.evaluation.violations().len(),
        )
    };
    ranked(results, |a, b| {
        key(a)
            .cmp(&key(b))
            .then_with(|| a.candidate_id.cmp(&b.candidate_id))
    })
}

/// Best-ranked candidate and whether it is admissible. `None` for no candidates.
pub fn choose_candidate<E: Assessment + Clone>(
    results: &[(String, E)],
) -> Option<(CandidateResult<E>, SelectionStatus)> {
    let best = rank_candidates(results).into_iter().next()?;
    let status = if best.evaluation.is_valid() {
        SelectionStatus::Selected
    } else {
        SelectionStatus::NoAdmissibleCandidate
    };
    Some((best, status))
}

/// Up to `m` ids for stage B: the valid ones when any exist, else the best failures.
pub fn promote_candidates<E: Assessment + Clone>(results: &[(String, E)], m: usize) -> Vec<String> {
    let ranked = rank_stage_a(results);
    let any_valid = ranked.iter().any(|r| r.evaluation.is_valid());
    ranked
        .into_iter()
        .filter(|r| !any_valid || r.evaluation.is_valid())
        .take(m)
        .map(|r| r.candidate_id)
        .collect()
}

/// Routing telemetry attached to selected proposals and audit lines.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterTelemetry {
    pub k: usize,
    pub m: usize,
    pub escalated: bool,
    pub stage_a_evaluations: usize,
    pub stage_b_evaluations: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub k: usize,
    pub m: usize,
    pub max_k: usize,
    pub escalate_on_all_fail_a: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            k: 3,
            m: 2,
            max_k: 9,
            escalate_on_all_fail_a: true,
        }
    }
}

impl RouterConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from a key lookup, so tests can supply values without touching the environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self::default().with_overrides(lookup)
    }

    /// Replace the fields whose variables are set; unset ones keep their value.
    pub fn with_overrides(self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            k: env_usize(&lookup, "SENTIENTOS_ROUTER_K", self.k).max(1),
            m: env_usize(&lookup, "SENTIENTOS_ROUTER_M", self.m).max(1),
            max_k: env_usize(&lookup, "SENTIENTOS_ROUTER_MAX_K", self.max_k).max(1),
            escalate_on_all_fail_a: lookup("SENTIENTOS_ROUTER_ESCALATE_ON_ALL_FAIL_A")
                .map(|v| flag_enabled(&v))
                .unwrap_or(self.escalate_on_all_fail_a),
        }
    }

    /// Doubles `k` (capped at `max_k`) when every stage-A result failed.
    pub fn maybe_escalate_k<E: Assessment>(&self, k: usize, results: &[(String, E)]) -> (usize, bool) {
        let all_failed = !results.is_empty() && results.iter().all(|(_, e)| !e.is_valid());
        if !(self.escalate_on_all_fail_a && all_failed) {
            return (k, false);
        }
        let escalated = (k * 2).min(self.max_k);
        if escalated > k {
            (escalated, true)
        } else {
            (k, false)
        }
    }
}

/// Anything other than `0`, `false` or `False` enables a flag.
pub fn flag_enabled(value: &str) -> bool {
    !matches!(value, "0" | "false" | "False")
}

/// Numeric variable from `lookup`; unset or unparsable values yield `default`.
pub fn env_usize(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: usize) -> usize {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring non-numeric {}={:?}", key, raw);
            default
        }),
    }
}
