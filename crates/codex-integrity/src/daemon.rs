//! Integrity daemon: the covenant gate every amendment passes through.
//!
//! Stage A (probe, covenant codes, proof) is pure and cheap, used to screen
//! routing candidates. Stage B adds the lineage ancestry check and persists
//! the verdict: one ledger line per evaluation plus a quarantine record for
//! every failure, written before any error is returned.

use crate::config::VowConfig;
use crate::probe::{self, ProbeReport};
use crate::proof::{ProofInput, ProofReport, ProofVerifier};
use chrono::{DateTime, Utc};
use codex_core::store::{append_jsonl, write_json_atomic};
use codex_core::{
    reason_codes, AmendmentProposal, Clock, IntegrityViolation, Result, Violation, ViolationCode,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// In-memory stage-A verdict. Never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntegrityEvaluationA {
    pub valid_a: bool,
    pub reason_codes: Vec<ViolationCode>,
    pub violations: Vec<Violation>,
    pub probe: ProbeReport,
    pub proof_report: Option<ProofReport>,
}

/// Persisted stage-B verdict.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntegrityEvaluation {
    pub valid: bool,
    pub reason_codes: Vec<ViolationCode>,
    pub violations: Vec<Violation>,
    pub probe: ProbeReport,
    pub proof_report: Option<ProofReport>,
    pub timestamp: DateTime<Utc>,
    /// Ledger file the verdict was appended to.
    pub ledger_entry: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Idle,
    Stable,
    Watch,
    Alert,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LastViolation {
    pub proposal_id: String,
    pub spec_id: String,
    pub reason_codes: Vec<ViolationCode>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrityHealth {
    pub passed: u64,
    pub quarantined: u64,
    pub last_scan: Option<DateTime<Utc>>,
    pub status: HealthStatus,
    pub last_violation: Option<LastViolation>,
}

impl IntegrityHealth {
    fn record_pass(&mut self, at: DateTime<Utc>) {
        self.last_scan = Some(at);
        self.passed += 1;
        self.status = if self.quarantined > 0 {
            HealthStatus::Watch
        } else {
            HealthStatus::Stable
        };
        self.last_violation = None;
    }

    fn record_failure(&mut self, proposal: &AmendmentProposal, codes: &[ViolationCode], at: DateTime<Utc>) {
        self.last_scan = Some(at);
        self.quarantined += 1;
        self.status = HealthStatus::Alert;
        self.last_violation = Some(LastViolation {
            proposal_id: proposal.proposal_id.clone(),
            spec_id: proposal.spec_id.clone(),
            reason_codes: codes.to_vec(),
            timestamp: at,
        });
    }
}

/// Point-in-time view served by the integrity endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub daemon: String,
    #[serde(flatten)]
    pub health: IntegrityHealth,
    pub timestamp: DateTime<Utc>,
}

pub struct IntegrityDaemon {
    daemon_root: PathBuf,
    quarantine_dir: PathBuf,
    ledger_path: PathBuf,
    conditions_path: PathBuf,
    verifier: ProofVerifier,
    config: VowConfig,
    clock: Arc<dyn Clock>,
    health: Arc<RwLock<IntegrityHealth>>,
}

impl IntegrityDaemon {
    /// Daemon rooted at `root`, reading `root/vow/` for its catalogue and config.
    pub fn new(root: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self> {
        let root = root.as_ref();
        let vow_dir = root.join("vow");
        let config = VowConfig::load(&vow_dir.join("config.yaml"));
        Self::with_parts(root, ProofVerifier::new(&vow_dir), config, clock)
    }

    pub fn with_parts(
        root: &Path,
        verifier: ProofVerifier,
        config: VowConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let daemon_root = root.join("daemon").join("integrity");
        let quarantine_dir = daemon_root.join("quarantine");
        std::fs::create_dir_all(&quarantine_dir)?;
        Ok(Self {
            ledger_path: daemon_root.join("ledger.jsonl"),
            conditions_path: daemon_root.join("proof_conditions.json"),
            daemon_root,
            quarantine_dir,
            verifier,
            config,
            clock,
            health: Arc::new(RwLock::new(IntegrityHealth::default())),
        })
    }

    pub fn ledger_path(&self) -> &Path {
        &self.ledger_path
    }

    pub fn quarantine_dir(&self) -> &Path {
        &self.quarantine_dir
    }

    pub fn daemon_root(&self) -> &Path {
        &self.daemon_root
    }

    pub fn verifier(&self) -> &ProofVerifier {
        &self.verifier
    }

    pub fn config(&self) -> &VowConfig {
        &self.config
    }

    /// Shared handle for readers that outlive a borrow of the daemon.
    pub fn health_handle(&self) -> Arc<RwLock<IntegrityHealth>> {
        Arc::clone(&self.health)
    }

    pub fn health(&self) -> HealthSnapshot {
        let health = self.health.read().unwrap_or_else(|e| e.into_inner()).clone();
        HealthSnapshot {
            daemon: "IntegrityDaemon".to_string(),
            health,
            timestamp: self.clock.now(),
        }
    }

    /// Full evaluation; fails with the violation after persisting it.
    pub fn evaluate(&self, proposal: &AmendmentProposal) -> Result<IntegrityEvaluation> {
        let evaluation = self.evaluate_stage_b(proposal)?;
        if !evaluation.valid {
            return Err(IntegrityViolation::new(
                &proposal.proposal_id,
                &proposal.spec_id,
                evaluation.violations,
            )
            .into());
        }
        Ok(evaluation)
    }

    pub fn evaluate_stage_a(&self, proposal: &AmendmentProposal) -> IntegrityEvaluationA {
        let probe = ProbeReport::run(proposal);
        let mut violations = probe.covenant_violations();
        let proof_report = self.run_proof(proposal, &mut violations);
        IntegrityEvaluationA {
            valid_a: violations.is_empty(),
            reason_codes: reason_codes(&violations),
            violations,
            probe,
            proof_report,
        }
    }

    pub fn evaluate_stage_b(&self, proposal: &AmendmentProposal) -> Result<IntegrityEvaluation> {
        let stage_a = self.evaluate_stage_a(proposal);
        let mut violations = stage_a.violations;
        violations.extend(probe::lineage_overwrites(proposal));
        self.persist(proposal, violations, stage_a.probe, stage_a.proof_report)
    }

    /// Quarantine a stage-A candidate without running stage B, tagging it
    /// `diagnostics_only_mode`. Returns the violation for the caller to raise.
    pub fn quarantine_diagnostics(
        &self,
        proposal: &AmendmentProposal,
        stage_a: &IntegrityEvaluationA,
    ) -> Result<IntegrityViolation> {
        let mut violations = stage_a.violations.clone();
        violations.push(Violation::new(
            ViolationCode::DiagnosticsOnlyMode,
            "diagnostics-only budget: candidate quarantined without stage B",
        ));
        let evaluation = self.persist(
            proposal,
            violations,
            stage_a.probe.clone(),
            stage_a.proof_report.clone(),
        )?;
        Ok(IntegrityViolation::new(
            &proposal.proposal_id,
            &proposal.spec_id,
            evaluation.violations,
        ))
    }

    /// Export the invariant catalogue with proposal context to `proof_conditions.json`.
    pub fn generate_proof_conditions(&self, proposal: &AmendmentProposal) -> Result<Value> {
        let invariants = self.verifier.describe_invariants();
        let document = json!({
            "generated_at": self.clock.now(),
            "proposal_id": proposal.proposal_id,
            "spec_id": proposal.spec_id,
            "summary": proposal.summary,
            "context": proposal.context,
            "required_fields": codex_core::spec::REQUIRED_FIELDS,
            "invariants": invariants,
            "proof_verification": self.config.proof_verification,
        });
        write_json_atomic(&self.conditions_path, &document)?;
        tracing::info!(
            proposal_id = %proposal.proposal_id,
            "Wrote proof conditions to {}",
            self.conditions_path.display()
        );
        Ok(document)
    }

    fn run_proof(
        &self,
        proposal: &AmendmentProposal,
        violations: &mut Vec<Violation>,
    ) -> Option<ProofReport> {
        let settings = self.config.proof_verification;
        if !settings.enabled {
            return None;
        }
        let removed = probe::removed_ledger_keys(&proposal.original_spec, &proposal.proposed_spec)
            .into_iter()
            .map(Value::String)
            .collect();
        let input = ProofInput::from_proposal(proposal).with_ledger_removed(removed);
        let report = self.verifier.evaluate(&input);
        if !report.valid && settings.fail_on_invalid {
            for failure in &report.violations {
                violations.push(
                    Violation::new(ViolationCode::ProofInvalid, failure.detail.clone())
                        .with_invariant(failure.invariant.clone()),
                );
            }
        }
        Some(report)
    }

    fn persist(
        &self,
        proposal: &AmendmentProposal,
        violations: Vec<Violation>,
        probe: ProbeReport,
        proof_report: Option<ProofReport>,
    ) -> Result<IntegrityEvaluation> {
        let timestamp = self.clock.now();
        let codes = reason_codes(&violations);
        let valid = violations.is_empty();
        let status = if valid { "VALID" } else { "QUARANTINED" };

        append_jsonl(
            &self.ledger_path,
            &json!({
                "timestamp": timestamp,
                "proposal_id": proposal.proposal_id,
                "spec_id": proposal.spec_id,
                "summary": proposal.summary,
                "status": status,
                "reason_codes": codes,
                "violations": violations,
                "probe": probe,
                "proof_report": proof_report,
            }),
        )?;

        {
            let mut health = self.health.write().unwrap_or_else(|e| e.into_inner());
            if valid {
                health.record_pass(timestamp);
            } else {
                health.record_failure(proposal, &codes, timestamp);
            }
        }

        if valid {
            tracing::debug!(proposal_id = %proposal.proposal_id, "Integrity check passed");
        } else {
            let path = self.quarantine_dir.join(format!("{}.json", proposal.proposal_id));
            write_json_atomic(
                &path,
                &json!({
                    "timestamp": timestamp,
                    "proposal": proposal,
                    "violations": violations,
                    "probe": probe,
                    "proof_report": proof_report,
                }),
            )?;
            tracing::warn!(
                proposal_id = %proposal.proposal_id,
                spec_id = %proposal.spec_id,
                codes = ?codes,
                "Amendment quarantined"
            );
        }

        Ok(IntegrityEvaluation {
            valid,
            reason_codes: codes,
            violations,
            probe,
            proof_report,
            timestamp,
            ledger_entry: Some(self.ledger_path.display().to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codex_core::{ProposalKind, ProposalStatus, SteppingClock};
    use serde_json::json;

    fn daemon(root: &Path) -> IntegrityDaemon {
        IntegrityDaemon::new(root, Arc::new(SteppingClock::one_second())).unwrap()
    }

    fn proposal(id: &str, proposed: Value) -> AmendmentProposal {
        let at = Utc::now();
        AmendmentProposal {
            proposal_id: id.into(),
            spec_id: "spec-alpha".into(),
            kind: ProposalKind::Amendment,
            status: ProposalStatus::Pending,
            summary: "Amend".into(),
            deltas: json!({"objective": "changed"}).as_object().cloned().unwrap(),
            context: Default::default(),
            original_spec: json!({
                "objective": "Observe",
                "directives": ["a"],
                "testing_requirements": ["t"],
            })
            .as_object()
            .cloned()
            .unwrap(),
            proposed_spec: proposed.as_object().cloned().unwrap(),
            created_at: at,
            updated_at: at,
            ledger_entry: None,
            operator_notes: Vec::new(),
            lineage: None,
        }
    }

    #[test]
    fn stage_a_is_side_effect_free() {
        let dir = tempfile::tempdir().unwrap();
        let d = daemon(dir.path());
        let p = proposal("p-1", json!({"directives": ["a"], "testing_requirements": ["t"]}));
        let eval = d.evaluate_stage_a(&p);
        assert!(!eval.valid_a);
        assert!(!d.ledger_path().exists());
        assert_eq!(d.health().health.status, HealthStatus::Idle);
    }

    #[test]
    fn proof_can_be_reported_without_failing() {
        let dir = tempfile::tempdir().unwrap();
        let vow = dir.path().join("vow");
        std::fs::create_dir_all(&vow).unwrap();
        std::fs::write(vow.join("config.yaml"), "proof_verification:\n  fail_on_invalid: false\n").unwrap();
        let d = daemon(dir.path());
        // Missing from both sides: the probe sees no removal, the proof does.
        let mut p = proposal("p-2", json!({"objective": "Observe", "directives": ["a"]}));
        p.original_spec.remove("testing_requirements");
        let eval = d.evaluate_stage_a(&p);
        assert!(eval.valid_a);
        assert!(!eval.proof_report.unwrap().valid);
    }

    #[test]
    fn disabled_proof_has_no_report() {
        let dir = tempfile::tempdir().unwrap();
        let vow = dir.path().join("vow");
        std::fs::create_dir_all(&vow).unwrap();
        std::fs::write(vow.join("config.yaml"), "proof_verification:\n  enabled: false\n").unwrap();
        let d = daemon(dir.path());
        let p = proposal("p-3", json!({"objective": "Observe", "directives": ["a"], "testing_requirements": ["t"]}));
        assert!(d.evaluate_stage_a(&p).proof_report.is_none());
    }
}
