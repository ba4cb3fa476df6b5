//! Spec amender: turns recurring telemetry into amendment proposals.
//!
//! Every proposal, whether drafted from signals, submitted by hand or
//! produced by regeneration, goes through `create_proposal`: the governor
//! sets the budget, variants are screened in stage A, the best are promoted
//! to the integrity daemon's stage B, and only an admissible winner is
//! written to disk.

use crate::config::GovernanceConfig;
use crate::layout::Layout;
use crate::state::{AmenderState, SignalEntry};
use crate::variants::{self, Draft};
use codex_core::spec::{self, Spec};
use codex_core::store::{append_jsonl, read_json, write_json_atomic};
use codex_core::{
    AmendmentProposal, Clock, Error, IntegrityViolation, ProposalKind, ProposalStatus, Result,
    Violation,
};
use codex_integrity::{HealthSnapshot, IntegrityDaemon, IntegrityEvaluation, IntegrityEvaluationA};
use codex_router::{
    choose_candidate, decide_budget, governor_event, promote_candidates, rank_stage_a,
    update_pressure_state, Assessment, BudgetDecision, BudgetMode, CandidateResult, GovernorConfig,
    PressureState, PressureStore, PressureWrite, RouterTelemetry, RunContext, SelectionStatus,
};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

const PIPELINE: &str = "codex_amendments";
const SYSTEM_OPERATOR: &str = "codex";

/// Operator edit of a pending proposal. `None` leaves a field unchanged.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProposalEdit {
    pub summary: Option<String>,
    pub deltas: Option<Map<String, Value>>,
    pub proposed_spec: Option<Spec>,
}

impl ProposalEdit {
    pub fn is_empty(&self) -> bool {
        self.summary.is_none() && self.deltas.is_none() && self.proposed_spec.is_none()
    }

    fn requested_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.summary.is_some() {
            fields.push("summary");
        }
        if self.deltas.is_some() {
            fields.push("deltas");
        }
        if self.proposed_spec.is_some() {
            fields.push("proposed_spec");
        }
        fields
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReviewOutcome {
    Approved,
    Rejected,
}

/// A drafted candidate and its verdict from either stage.
#[derive(Clone, Debug)]
struct Candidate<E> {
    proposal: AmendmentProposal,
    evaluation: E,
}

impl<E: Assessment> Assessment for Candidate<E> {
    fn is_valid(&self) -> bool {
        self.evaluation.is_valid()
    }

    fn violations(&self) -> &[Violation] {
        self.evaluation.violations()
    }
}

type StageA = Vec<(String, Candidate<IntegrityEvaluationA>)>;

/// Everything one routing run decided, for audit lines and pressure updates.
struct RoutingRun {
    governor: GovernorConfig,
    decision: BudgetDecision,
    run_context: RunContext,
    prior: PressureState,
    telemetry: RouterTelemetry,
}

struct Inner {
    state: AmenderState,
}

pub struct SpecAmender {
    layout: Layout,
    config: GovernanceConfig,
    daemon: IntegrityDaemon,
    pressure: PressureStore,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl SpecAmender {
    /// Amender rooted at `config.paths.root`, with its own integrity daemon.
    pub fn new(config: GovernanceConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let daemon = IntegrityDaemon::new(&config.paths.root, Arc::clone(&clock))?;
        Self::with_daemon(config, daemon, clock)
    }

    pub fn with_daemon(
        config: GovernanceConfig,
        daemon: IntegrityDaemon,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let layout = Layout::new(&config.paths.root);
        layout.ensure()?;
        let state = AmenderState::load(&layout.state_path());
        tracing::info!("Spec amender ready at {}", layout.root().display());
        Ok(Self {
            pressure: PressureStore::new(layout.pressure_state_path()),
            layout,
            config,
            daemon,
            clock,
            inner: Mutex::new(Inner { state }),
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    pub fn daemon(&self) -> &IntegrityDaemon {
        &self.daemon
    }

    pub fn pressure_store(&self) -> &PressureStore {
        &self.pressure
    }

    pub(crate) fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the persisted amender state.
    pub fn state(&self) -> AmenderState {
        self.lock().state.clone()
    }

    // ============================================================
    // Signals
    // ============================================================

    /// Record one telemetry signal. Returns a proposal once the signal's
    /// count reaches its threshold; `None` while below it or while the spec
    /// already has an active amendment.
    pub fn record_signal(
        &self,
        spec_id: &str,
        signal_type: &str,
        metadata: Map<String, Value>,
        current_spec: &Spec,
    ) -> Result<Option<AmendmentProposal>> {
        if self.has_active_amendment(spec_id)? {
            tracing::debug!(spec_id, signal_type, "Active amendment present, signal ignored");
            return Ok(None);
        }

        let entry = SignalEntry {
            kind: signal_type.to_string(),
            metadata,
            timestamp: self.now(),
        };
        let signals = {
            let mut inner = self.lock();
            let count = inner
                .state
                .open_buckets
                .entry(spec_id.to_string())
                .or_default()
                .push(entry.clone());
            inner
                .state
                .signal_history
                .entry(spec_id.to_string())
                .or_default()
                .push(entry);
            inner.state.save(&self.layout.state_path())?;

            let threshold = inner
                .state
                .threshold_for(signal_type, self.config.amendments.default_threshold);
            if count < threshold {
                return Ok(None);
            }
            inner
                .state
                .open_buckets
                .get(spec_id)
                .map(|b| b.signals.clone())
                .unwrap_or_default()
        };

        let proposal = self.draft_amendment(spec_id, &signals, current_spec, signal_type)?;
        let mut inner = self.lock();
        inner.state.open_buckets.remove(spec_id);
        inner.state.save(&self.layout.state_path())?;
        Ok(Some(proposal))
    }

    pub fn set_threshold(&self, signal_type: &str, threshold: u32) -> Result<()> {
        let mut inner = self.lock();
        inner
            .state
            .thresholds
            .insert(signal_type.to_string(), threshold.max(1));
        inner.state.save(&self.layout.state_path())
    }

    /// Update the approval counters for the proposal's dominant signal.
    pub fn record_outcome(&self, proposal: &AmendmentProposal, outcome: ReviewOutcome) -> Result<()> {
        let Some(signal) = proposal.dominant_signal() else {
            return Ok(());
        };
        let mut inner = self.lock();
        let preference = inner.state.preferences.entry(signal.to_string()).or_default();
        match outcome {
            ReviewOutcome::Approved => preference.approved += 1,
            ReviewOutcome::Rejected => preference.rejected += 1,
        }
        inner.state.save(&self.layout.state_path())
    }

    // ============================================================
    // Drafting
    // ============================================================

    /// Draft and route an amendment covering the accumulated signals.
    pub fn draft_amendment(
        &self,
        spec_id: &str,
        signals: &[SignalEntry],
        current_spec: &Spec,
        dominant_signal: &str,
    ) -> Result<AmendmentProposal> {
        let favoured = self.lock().state.favours(dominant_signal);
        let draft = amendment_draft(spec_id, signals, current_spec, dominant_signal, favoured)?;
        self.create_proposal(draft)
    }

    /// Route a pre-computed draft.
    pub fn propose_manual(&self, draft: Draft) -> Result<AmendmentProposal> {
        self.create_proposal(draft)
    }

    /// Propose the next version of a spec, archiving the current one.
    pub fn regenerate_spec(
        &self,
        spec_id: &str,
        operator: &str,
        reason: &str,
        current_spec: &Spec,
    ) -> Result<AmendmentProposal> {
        let current_version = match spec::text_of(current_spec, "version") {
            v if v.is_empty() => "v1".to_string(),
            v => v,
        };
        let next_version = spec::next_version(&current_version);

        let mut proposed = current_spec.clone();
        proposed.insert("version".into(), json!(next_version));
        proposed.insert("status".into(), json!("regenerated"));

        let mut draft = Draft::amendment(
            spec_id,
            format!("Regenerate {spec_id} to recover from structural failure"),
        );
        draft.kind = ProposalKind::Regeneration;
        draft.deltas = object(json!({
            "version": {"before": current_version, "after": next_version},
            "status": {"before": current_spec.get("status"), "after": "regenerated"},
        }));
        draft.context = object(json!({"reason": reason, "operator": operator}));
        draft.original_spec = current_spec.clone();
        draft.proposed_spec = proposed;
        draft.lineage = Some(object(json!({
            "from_version": current_version,
            "to_version": next_version,
            "operator": operator,
            "reason": reason,
        })));

        let mut proposal = self.create_proposal(draft)?;

        let archive = self
            .layout
            .archive_originals_dir()
            .join(format!("{spec_id}_{current_version}.json"));
        write_json_atomic(&archive, current_spec)?;
        self.append_spec_log(
            "regenerated",
            spec_id,
            Some(json!({
                "from_version": current_version,
                "to_version": next_version,
                "proposal_id": proposal.proposal_id,
                "reason": reason,
            })),
        )?;
        proposal.add_note(operator, "regenerated", Some(object(json!({"reason": reason}))), self.now());
        self.persist(&proposal)?;
        tracing::info!(spec_id, from = %current_version, to = %next_version, "Spec regeneration proposed");
        Ok(proposal)
    }

    /// Route a draft through the governor, both integrity stages and the
    /// router. Nothing is written to the proposal directories unless a
    /// candidate is admissible.
    pub fn create_proposal(&self, draft: Draft) -> Result<AmendmentProposal> {
        let governor = self.config.governor_config();
        let run_context = RunContext::new(PIPELINE, draft.spec_id.as_str());
        let prior = self.pressure.load();
        let decision = decide_budget(&governor, &prior, &run_context);
        let now = self.now();
        let bucket = variants::minute_bucket(now);

        let mut k = decision.k_effective;
        let mut candidates = self.stage_a(&draft, k, bucket, now)?;
        let mut stage_a_evaluations = candidates.len();
        let mut escalated = false;
        if decision.allow_escalation {
            let (next_k, escalate) = self.config.router.maybe_escalate_k(k, &candidates);
            if escalate && variants::capacity(&draft) > candidates.len() {
                tracing::debug!(spec_id = %draft.spec_id, from = k, to = next_k, "Escalating k");
                // A short redraft keeps the first pool so the failure is still audited.
                match self.stage_a(&draft, next_k, bucket, now) {
                    Ok(redrafted) => {
                        k = next_k;
                        escalated = true;
                        stage_a_evaluations += redrafted.len();
                        candidates = redrafted;
                    }
                    Err(Error::VariantExhaustion { requested, drafted }) => {
                        tracing::warn!(
                            spec_id = %draft.spec_id,
                            requested,
                            drafted,
                            "Escalated redraft fell short, keeping first pool"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let mut run = RoutingRun {
            telemetry: RouterTelemetry {
                k,
                m: decision.m_effective,
                escalated,
                stage_a_evaluations,
                stage_b_evaluations: 0,
            },
            governor,
            decision,
            run_context,
            prior,
        };

        if run.decision.mode == BudgetMode::DiagnosticsOnly {
            let best = rank_stage_a(&candidates)
                .into_iter()
                .next()
                .ok_or_else(|| Error::invalid_input("no candidates drafted"))?;
            let violation = self
                .daemon
                .quarantine_diagnostics(&best.evaluation.proposal, &best.evaluation.evaluation)?;
            return Err(self.fail_routing(&draft, &run, violation)?);
        }

        let promoted = promote_candidates(&candidates, run.decision.m_effective.max(1));
        let mut finalists = Vec::with_capacity(promoted.len());
        for (id, candidate) in candidates.iter().filter(|(id, _)| promoted.contains(id)) {
            let evaluation = self.daemon.evaluate_stage_b(&candidate.proposal)?;
            finalists.push((
                id.clone(),
                Candidate {
                    proposal: candidate.proposal.clone(),
                    evaluation,
                },
            ));
        }
        run.telemetry.stage_b_evaluations = finalists.len();

        match choose_candidate(&finalists) {
            Some((best, SelectionStatus::Selected)) => self.accept(best, &run),
            Some((best, SelectionStatus::NoAdmissibleCandidate)) => {
                let violation = IntegrityViolation::new(
                    &best.candidate_id,
                    &draft.spec_id,
                    best.evaluation.evaluation.violations,
                );
                Err(self.fail_routing(&draft, &run, violation)?)
            }
            None => {
                let violations = rank_stage_a(&candidates)
                    .into_iter()
                    .next()
                    .map(|best| best.evaluation.evaluation.violations)
                    .unwrap_or_default();
                let violation = IntegrityViolation::new(&draft.spec_id, &draft.spec_id, violations);
                Err(self.fail_routing(&draft, &run, violation)?)
            }
        }
    }

    fn stage_a(
        &self,
        draft: &Draft,
        k: usize,
        bucket: i64,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<StageA> {
        let drafted = variants::draft_variants(draft, k, bucket)?;
        Ok(drafted
            .into_iter()
            .map(|variant| {
                let proposal = variant.draft.to_proposal(&variant.candidate_id, now);
                let evaluation = self.daemon.evaluate_stage_a(&proposal);
                (variant.candidate_id, Candidate { proposal, evaluation })
            })
            .collect())
    }

    fn accept(
        &self,
        best: CandidateResult<Candidate<IntegrityEvaluation>>,
        run: &RoutingRun,
    ) -> Result<AmendmentProposal> {
        let mut proposal = best.evaluation.proposal;
        let suffix = Uuid::new_v4().simple().to_string();
        proposal.proposal_id = format!("{}-{}", proposal.spec_id, &suffix[..8]);
        proposal.status = ProposalStatus::Pending;
        proposal.context.insert(
            "router".into(),
            json!({
                "candidate_id": best.candidate_id,
                "k": run.telemetry.k,
                "m": run.telemetry.m,
                "escalated": run.telemetry.escalated,
                "stage_a_evaluations": run.telemetry.stage_a_evaluations,
                "stage_b_evaluations": run.telemetry.stage_b_evaluations,
                "rank": best.rank,
                "score": best.score,
                "mode": run.decision.mode,
            }),
        );
        self.persist(&proposal)?;
        self.supersede_others(&proposal)?;

        let write = self.record_pressure(run, SelectionStatus::Selected)?;
        self.append_amendment_log(
            "proposed",
            &proposal.spec_id,
            &proposal.proposal_id,
            Some(json!({
                "kind": proposal.kind,
                "summary": proposal.summary,
                "candidate_id": best.candidate_id,
                "provenance_hash": self.config.provenance.run_hash,
            })),
        )?;
        self.log_governor(&proposal.spec_id, &proposal.proposal_id, run, Some(&write))?;
        self.append_amendment_log(
            "proof_budget",
            &proposal.spec_id,
            &proposal.proposal_id,
            Some(json!({
                "mode": run.decision.mode,
                "k": run.telemetry.k,
                "m": run.telemetry.m,
                "escalated": run.telemetry.escalated,
                "stage_a_evaluations": run.telemetry.stage_a_evaluations,
                "stage_b_evaluations": run.telemetry.stage_b_evaluations,
            })),
        )?;

        tracing::info!(
            proposal_id = %proposal.proposal_id,
            spec_id = %proposal.spec_id,
            kind = %proposal.kind,
            "Amendment proposed"
        );
        Ok(proposal)
    }

    /// Audit and pressure bookkeeping for a run with no admissible candidate.
    fn fail_routing(
        &self,
        draft: &Draft,
        run: &RoutingRun,
        violation: IntegrityViolation,
    ) -> Result<Error> {
        let write = self.record_pressure(run, SelectionStatus::NoAdmissibleCandidate)?;
        self.append_amendment_log(
            "routing-failed",
            &draft.spec_id,
            &violation.proposal_id,
            Some(json!({
                "kind": draft.kind,
                "summary": draft.summary,
                "reason_codes": violation.reason_codes,
                "mode": run.decision.mode,
                "router": run.telemetry,
            })),
        )?;
        self.log_governor(&draft.spec_id, &violation.proposal_id, run, Some(&write))?;
        tracing::warn!(
            spec_id = %draft.spec_id,
            candidate_id = %violation.proposal_id,
            codes = ?violation.reason_codes,
            "No admissible amendment candidate"
        );
        Ok(violation.into())
    }

    fn record_pressure(&self, run: &RoutingRun, status: SelectionStatus) -> Result<PressureWrite> {
        let mut next = update_pressure_state(
            &run.prior,
            &run.decision,
            &run.telemetry,
            status,
            &run.run_context,
            &run.governor,
        );
        self.pressure.save(&mut next, self.now())
    }

    fn log_governor(
        &self,
        spec_id: &str,
        proposal_id: &str,
        run: &RoutingRun,
        write: Option<&PressureWrite>,
    ) -> Result<()> {
        let event = governor_event(&run.decision, &run.governor, &run.run_context, &run.telemetry, write);
        self.append_amendment_log("proof_budget_governor", spec_id, proposal_id, Some(event))
    }

    /// Archive every other active proposal for the same spec.
    fn supersede_others(&self, winner: &AmendmentProposal) -> Result<()> {
        let mut active = read_proposals(&self.layout.pending_dir())?;
        active.extend(read_proposals(&self.layout.approved_dir())?);
        for mut other in active {
            if other.spec_id != winner.spec_id || other.proposal_id == winner.proposal_id {
                continue;
            }
            let now = self.now();
            let previous = other.status;
            other.status = ProposalStatus::Archived;
            other.updated_at = now;
            other.add_note(
                SYSTEM_OPERATOR,
                "superseded",
                Some(object(json!({"superseded_by": winner.proposal_id, "previous_status": previous}))),
                now,
            );
            self.persist(&other)?;
            self.append_amendment_log(
                "superseded",
                &other.spec_id,
                &other.proposal_id,
                Some(json!({"superseded_by": winner.proposal_id, "previous_status": previous})),
            )?;
            tracing::info!(proposal_id = %other.proposal_id, by = %winner.proposal_id, "Amendment superseded");
        }
        Ok(())
    }

    // ============================================================
    // Queries
    // ============================================================

    pub fn load_proposal(&self, proposal_id: &str) -> Result<AmendmentProposal> {
        for dir in self.layout.proposal_dirs() {
            let path = dir.join(format!("{proposal_id}.json"));
            if path.exists() {
                return read_json(&path);
            }
        }
        Err(Error::ProposalNotFound(proposal_id.to_string()))
    }

    pub fn list_pending(&self) -> Result<Vec<AmendmentProposal>> {
        read_proposals(&self.layout.pending_dir())
    }

    /// Approved proposals, optionally for one spec.
    pub fn active_amendments(&self, spec_id: Option<&str>) -> Result<Vec<AmendmentProposal>> {
        let approved = read_proposals(&self.layout.approved_dir())?;
        Ok(match spec_id {
            None => approved,
            Some(id) => approved.into_iter().filter(|p| p.spec_id == id).collect(),
        })
    }

    /// Whether a pending or approved proposal exists for the spec.
    pub fn has_active_amendment(&self, spec_id: &str) -> Result<bool> {
        for dir in [self.layout.pending_dir(), self.layout.approved_dir()] {
            if read_proposals(&dir)?.iter().any(|p| p.spec_id == spec_id) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Payload for the "Spec Amendments" dashboard panel.
    pub fn dashboard_state(&self) -> Result<Value> {
        let mut proposals = self.list_pending()?;
        proposals.extend(self.active_amendments(None)?);
        let items: Vec<Value> = proposals
            .iter()
            .map(|p| {
                json!({
                    "proposal_id": p.proposal_id,
                    "spec_id": p.spec_id,
                    "status": p.status,
                    "kind": p.kind,
                    "summary": p.summary,
                    "diff": p.deltas,
                    "context": p.context,
                    "ledger_entry": p.ledger_entry,
                })
            })
            .collect();
        let with_status = |status: &str| -> Vec<Value> {
            items
                .iter()
                .filter(|item| item["status"] == status)
                .cloned()
                .collect()
        };
        Ok(json!({
            "panel": "Spec Amendments",
            "pending": with_status("pending"),
            "approved": with_status("approved"),
            "items": items,
        }))
    }

    pub fn integrity_endpoint(&self) -> HealthSnapshot {
        self.daemon.health()
    }

    /// Stored pressure state plus the budget the governor would grant a
    /// proposal for `spec_id` right now.
    pub fn governor_status(&self, spec_id: &str) -> Value {
        let governor = self.config.governor_config();
        let pressure = self.pressure.load();
        let decision = decide_budget(&governor, &pressure, &RunContext::new(PIPELINE, spec_id));
        json!({
            "state": pressure,
            "state_hash": pressure.state_hash,
            "prev_state_hash": pressure.prev_state_hash,
            "decision": decision,
        })
    }

    /// Clear the governor's failure pressure after an operator has dealt with
    /// the cause. Recorded in the amendment log.
    pub fn reset_pressure(&self, operator: &str) -> Result<PressureWrite> {
        let cleared = self.pressure.load().consecutive_no_admissible;
        let write = self.pressure.reset(self.now())?;
        append_jsonl(
            &self.layout.amendment_log(),
            &json!({
                "timestamp": self.now(),
                "event": "pressure_reset",
                "operator": operator,
                "cleared_consecutive_no_admissible": cleared,
                "prev_state_hash": write.prev_hash,
                "state_hash": write.new_hash,
            }),
        )?;
        tracing::info!(operator, cleared, "Governor pressure reset");
        Ok(write)
    }

    // ============================================================
    // Mutation
    // ============================================================

    /// Apply an operator edit. Only pending proposals change; on any other
    /// status the request is recorded as an `edit-annotated` note.
    pub fn edit_proposal(
        &self,
        proposal_id: &str,
        operator: &str,
        edit: ProposalEdit,
    ) -> Result<AmendmentProposal> {
        let mut proposal = self.load_proposal(proposal_id)?;
        if edit.is_empty() {
            return Ok(proposal);
        }
        let now = self.now();

        if proposal.status != ProposalStatus::Pending {
            let metadata = json!({
                "requested": edit.requested_fields(),
                "status": proposal.status,
            });
            proposal.add_note(operator, "edit-annotated", Some(object(metadata.clone())), now);
            self.persist(&proposal)?;
            self.append_amendment_log(
                "edit-annotated",
                &proposal.spec_id,
                &proposal.proposal_id,
                Some(json!({"operator": operator, "request": metadata})),
            )?;
            tracing::info!(proposal_id, status = %proposal.status, "Edit recorded as annotation");
            return Ok(proposal);
        }

        let mut changes = Map::new();
        if let Some(summary) = edit.summary.filter(|s| *s != proposal.summary) {
            changes.insert("summary".into(), json!(summary));
            proposal.summary = summary;
        }
        if let Some(deltas) = edit.deltas.filter(|d| *d != proposal.deltas) {
            changes.insert("deltas".into(), Value::Object(deltas.clone()));
            proposal.deltas = deltas;
        }
        if let Some(spec) = edit.proposed_spec.filter(|s| *s != proposal.proposed_spec) {
            changes.insert("proposed_spec".into(), Value::Object(spec.clone()));
            proposal.proposed_spec = spec;
        }
        if changes.is_empty() {
            return Ok(proposal);
        }

        proposal.updated_at = now;
        proposal.add_note(
            operator,
            "edited",
            Some(object(json!({"changes": changes}))),
            now,
        );
        self.persist(&proposal)?;
        self.append_amendment_log(
            "edited",
            &proposal.spec_id,
            &proposal.proposal_id,
            Some(json!({"operator": operator, "changes": changes})),
        )?;
        tracing::info!(proposal_id, "Amendment edited");
        Ok(proposal)
    }

    /// Merge lineage (and optionally context) into a proposal that has not
    /// been approved.
    pub fn annotate_lineage(
        &self,
        proposal_id: &str,
        lineage: Map<String, Value>,
        context: Option<Map<String, Value>>,
    ) -> Result<AmendmentProposal> {
        let mut proposal = self.load_proposal(proposal_id)?;
        if proposal.status == ProposalStatus::Approved {
            return Err(Error::invalid_input(format!(
                "amendment {proposal_id} is approved and cannot be annotated"
            )));
        }

        let mut merged = proposal.lineage.take().unwrap_or_default();
        merged.extend(lineage);
        proposal.lineage = Some(merged.clone());
        let context = context.unwrap_or_default();
        proposal.context.extend(context.clone());
        proposal.updated_at = self.now();

        self.persist(&proposal)?;
        self.append_amendment_log(
            "annotated",
            &proposal.spec_id,
            &proposal.proposal_id,
            Some(json!({"lineage": merged, "context": context})),
        )?;
        Ok(proposal)
    }

    // ============================================================
    // Persistence
    // ============================================================

    /// Write the proposal into its status directory and drop same-id files
    /// elsewhere. Callers own `updated_at`.
    pub(crate) fn persist(&self, proposal: &AmendmentProposal) -> Result<PathBuf> {
        let path = self
            .layout
            .proposal_path(proposal.status, &proposal.proposal_id);
        write_json_atomic(&path, proposal)?;
        for dir in self.layout.proposal_dirs() {
            let other = dir.join(format!("{}.json", proposal.proposal_id));
            if other != path && other.exists() {
                std::fs::remove_file(&other)?;
            }
        }
        Ok(path)
    }

    pub(crate) fn append_amendment_log(
        &self,
        event: &str,
        spec_id: &str,
        proposal_id: &str,
        metadata: Option<Value>,
    ) -> Result<()> {
        let mut line = json!({
            "timestamp": self.now(),
            "event": event,
            "spec_id": spec_id,
            "proposal_id": proposal_id,
        });
        if let Some(metadata) = metadata.filter(spec::is_truthy) {
            line["metadata"] = metadata;
        }
        append_jsonl(&self.layout.amendment_log(), &line)
    }

    pub(crate) fn append_spec_log(
        &self,
        event: &str,
        spec_id: &str,
        details: Option<Value>,
    ) -> Result<()> {
        let mut line = json!({
            "timestamp": self.now(),
            "event": event,
            "spec_id": spec_id,
        });
        if let Some(details) = details.filter(spec::is_truthy) {
            line["details"] = details;
        }
        append_jsonl(&self.layout.spec_log(), &line)
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Proposals in `dir`, ordered by file name. A missing directory is empty.
fn read_proposals(dir: &Path) -> Result<Vec<AmendmentProposal>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().map_or(false, |ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();
    paths.iter().map(|p| read_json(p)).collect()
}

/// Amendment draft for `dominant_signal`: a sharpened objective plus two
/// added directives and two added testing requirements.
fn amendment_draft(
    spec_id: &str,
    signals: &[SignalEntry],
    current_spec: &Spec,
    dominant_signal: &str,
    favoured: bool,
) -> Result<Draft> {
    let objective_before = spec::text_of(current_spec, "objective");
    let directives_before = spec::list_of(current_spec.get("directives"));
    let testing_before = spec::list_of(current_spec.get("testing_requirements"));

    let mut descriptions: Vec<String> = Vec::new();
    for entry in signals {
        let detail = entry
            .metadata
            .get("detail")
            .filter(|v| spec::is_truthy(v))
            .or_else(|| entry.metadata.get("reason").filter(|v| spec::is_truthy(v)));
        let Some(detail) = detail else { continue };
        let text = match detail {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if !descriptions.contains(&text) {
            descriptions.push(text);
        }
    }
    if descriptions.is_empty() {
        descriptions.push(format!("recurring {dominant_signal} signals"));
    }

    let verb = if favoured { "Reinforce" } else { "Tighten" };
    let target = if objective_before.is_empty() {
        "the existing objective"
    } else {
        objective_before.as_str()
    };
    let objective = format!("{verb} {target} to cover {dominant_signal} gaps.");
    let added_directives = vec![
        format!(
            "Document remediation for {dominant_signal} contexts: {}.",
            descriptions.join(", ")
        ),
        "Add coverage analysis checkpoints before activation to prevent silent drift.".to_string(),
    ];
    let added_testing = vec![
        format!("Replay {dominant_signal} telemetry until amendment clears the recurrence queue."),
        "Ensure ledger approval is required before the amendment becomes active.".to_string(),
    ];

    let mut proposed = current_spec.clone();
    proposed.insert("objective".into(), json!(objective));
    let mut directives = directives_before.clone();
    directives.extend(added_directives.iter().map(|d| json!(d)));
    proposed.insert("directives".into(), Value::Array(directives));
    let mut testing = testing_before.clone();
    testing.extend(added_testing.iter().map(|t| json!(t)));
    proposed.insert("testing_requirements".into(), Value::Array(testing));

    let mut counts: BTreeMap<&str, u32> = BTreeMap::new();
    for entry in signals {
        *counts.entry(entry.kind.as_str()).or_insert(0) += 1;
    }

    let mut draft = Draft::amendment(
        spec_id,
        format!("Amend {spec_id} for {dominant_signal} coverage gaps"),
    );
    draft.deltas = object(json!({
        "objective": {"before": objective_before, "after": objective},
        "directives": {"before": directives_before, "added": added_directives},
        "testing_requirements": {"before": testing_before, "added": added_testing},
    }));
    draft.context = object(json!({
        "signals": serde_json::to_value(signals)?,
        "counts": counts,
        "dominant_signal": dominant_signal,
    }));
    draft.original_spec = current_spec.clone();
    draft.proposed_spec = proposed;
    Ok(draft)
}
