//! Tests for codex-amendments: signal drafting, routing, persistence and review

use codex_amendments::*;
use codex_core::store::read_jsonl;
use codex_core::{
    Error, PrivilegeReport, ProposalKind, ProposalStatus, Spec, SteppingClock, ViolationCode,
};
use codex_integrity::HealthStatus;
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::Arc;

fn base_spec() -> Spec {
    object(json!({
        "objective": "Keep the covenant ledger consistent",
        "directives": ["Record every amendment", "Preserve lineage"],
        "testing_requirements": ["Replay the ledger"],
        "ledger_required": true,
        "status": "active",
        "version": "v1",
    }))
}

fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

fn config(root: &Path) -> GovernanceConfig {
    let mut config = GovernanceConfig::default();
    config.paths.root = root.to_path_buf();
    config
}

fn amender_with(config: GovernanceConfig) -> Arc<SpecAmender> {
    Arc::new(SpecAmender::new(config, Arc::new(SteppingClock::one_second())).unwrap())
}

fn amender(root: &Path) -> Arc<SpecAmender> {
    amender_with(config(root))
}

fn board(engine: &Arc<SpecAmender>) -> AmendmentReviewBoard {
    AmendmentReviewBoard::new(Arc::clone(engine), Box::new(PermissiveHook))
}

fn benign_draft(spec_id: &str) -> Draft {
    let mut proposed = base_spec();
    proposed["directives"] = json!(["Record every amendment", "Preserve lineage", "Audit weekly"]);
    let mut draft = Draft::amendment(spec_id, "Add a weekly audit directive");
    draft.deltas = object(json!({"directives": {"added": ["Audit weekly"]}}));
    draft.context = object(json!({"reason": "operator request"}));
    draft.original_spec = base_spec();
    draft.proposed_spec = proposed;
    draft
}

fn hostile_draft(spec_id: &str) -> Draft {
    let mut proposed = base_spec();
    proposed.remove("objective");
    proposed.remove("ledger_required");
    let mut draft = Draft::amendment(spec_id, "Simplify the spec");
    draft.deltas = object(json!({"objective": {"removed": true}}));
    draft.original_spec = base_spec();
    draft.proposed_spec = proposed;
    draft
}

fn events(path: &Path) -> Vec<String> {
    read_jsonl(path)
        .unwrap()
        .iter()
        .map(|line| line["event"].as_str().unwrap().to_string())
        .collect()
}

fn json_files(dir: &Path) -> usize {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map_or(false, |x| x == "json"))
            .count(),
        Err(_) => 0,
    }
}

fn signal_metadata(detail: &str) -> Map<String, Value> {
    object(json!({"detail": detail}))
}

fn record_until_proposal(engine: &SpecAmender, spec_id: &str) -> codex_core::AmendmentProposal {
    let spec = base_spec();
    assert!(engine
        .record_signal(spec_id, "coverage_gap", signal_metadata("missing audit"), &spec)
        .unwrap()
        .is_none());
    assert!(engine
        .record_signal(spec_id, "coverage_gap", signal_metadata("stale ledger"), &spec)
        .unwrap()
        .is_none());
    engine
        .record_signal(spec_id, "coverage_gap", signal_metadata("missing audit"), &spec)
        .unwrap()
        .expect("third signal drafts an amendment")
}

// ===========================================================================
// Signals and drafting
// ===========================================================================

#[test]
fn coverage_gap_signals_draft_an_amendment() {
    let dir = tempfile::tempdir().unwrap();
    let engine = amender(dir.path());
    let proposal = record_until_proposal(&engine, "spec-a");

    assert_eq!(proposal.status, ProposalStatus::Pending);
    assert_eq!(proposal.kind, ProposalKind::Amendment);
    assert_eq!(proposal.summary, "Amend spec-a for coverage_gap coverage gaps");
    assert_eq!(proposal.context["counts"]["coverage_gap"], 3);
    assert_eq!(proposal.context["dominant_signal"], "coverage_gap");
    assert!(!proposal.deltas["directives"]["added"].as_array().unwrap().is_empty());
    assert!(proposal.proposal_id.starts_with("spec-a-"));
    assert_eq!(proposal.proposal_id.len(), "spec-a-".len() + 8);
    assert!(proposal.context["router"]["candidate_id"]
        .as_str()
        .unwrap()
        .starts_with("spec-a-cand"));

    let layout = engine.layout();
    assert!(layout
        .proposal_path(ProposalStatus::Pending, &proposal.proposal_id)
        .exists());
    let log = events(&layout.amendment_log());
    assert_eq!(log, vec!["proposed", "proof_budget_governor", "proof_budget"]);
    assert_eq!(engine.state().signal_history["spec-a"].len(), 3);
}

#[test]
fn active_amendment_blocks_new_signals() {
    let dir = tempfile::tempdir().unwrap();
    let engine = amender(dir.path());
    record_until_proposal(&engine, "spec-a");

    let again = engine
        .record_signal("spec-a", "coverage_gap", Map::new(), &base_spec())
        .unwrap();
    assert!(again.is_none());
    assert_eq!(engine.state().signal_history["spec-a"].len(), 3);
    assert!(engine.has_active_amendment("spec-a").unwrap());
    assert!(!engine.has_active_amendment("spec-b").unwrap());
}

#[test]
fn threshold_override_applies_per_signal() {
    let dir = tempfile::tempdir().unwrap();
    let engine = amender(dir.path());
    engine.set_threshold("drift", 1).unwrap();
    let proposal = engine
        .record_signal("spec-a", "drift", Map::new(), &base_spec())
        .unwrap()
        .expect("threshold of one drafts immediately");
    assert_eq!(proposal.context["counts"]["drift"], 1);

    let reloaded = amender(dir.path());
    assert_eq!(reloaded.state().thresholds["drift"], 1);
}

#[test]
fn open_signals_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let spec = base_spec();
    for detail in ["missing audit", "stale ledger"] {
        let engine = amender(dir.path());
        assert!(engine
            .record_signal("spec-a", "coverage_gap", signal_metadata(detail), &spec)
            .unwrap()
            .is_none());
    }
    assert_eq!(amender(dir.path()).state().open_buckets["spec-a"].signals.len(), 2);

    let engine = amender(dir.path());
    let proposal = engine
        .record_signal("spec-a", "coverage_gap", signal_metadata("missing audit"), &spec)
        .unwrap()
        .expect("third signal across restarts drafts an amendment");
    assert_eq!(proposal.context["counts"]["coverage_gap"], 3);
    assert!(!amender(dir.path()).state().open_buckets.contains_key("spec-a"));
}

#[test]
fn failed_draft_keeps_open_signals() {
    let dir = tempfile::tempdir().unwrap();
    let engine = amender(dir.path());
    engine.set_threshold("drift", 1).unwrap();
    let mut spec = base_spec();
    spec.insert("recursion".into(), json!("halt"));

    let err = engine
        .record_signal("spec-a", "drift", Map::new(), &spec)
        .unwrap_err();
    assert!(matches!(err, Error::Integrity(_)));
    assert_eq!(amender(dir.path()).state().open_buckets["spec-a"].signals.len(), 1);
}

#[test]
fn variants_are_deterministic() {
    let draft = benign_draft("spec-a");
    let first = draft_variants(&draft, 3, 29_000_000).unwrap();
    let second = draft_variants(&draft, 3, 29_000_000).unwrap();
    assert_eq!(first, second);
    assert_eq!(first[0].draft, draft);
}

// ===========================================================================
// Routing failures
// ===========================================================================

#[test]
fn hostile_manual_proposal_is_quarantined() {
    let dir = tempfile::tempdir().unwrap();
    let engine = amender(dir.path());

    let err = engine.propose_manual(hostile_draft("spec-a")).unwrap_err();
    let violation = err.as_integrity().expect("integrity violation");
    assert!(violation.has_code(ViolationCode::Tamper));
    assert!(violation.has_code(ViolationCode::ViolationOfVow));

    let layout = engine.layout();
    assert_eq!(json_files(&layout.pending_dir()), 0);
    assert!(json_files(engine.daemon().quarantine_dir()) > 0);
    let log = events(&layout.amendment_log());
    assert_eq!(log, vec!["routing-failed", "proof_budget_governor"]);

    let health = engine.integrity_endpoint();
    assert_eq!(health.health.status, HealthStatus::Alert);
    assert_eq!(health.health.last_violation.unwrap().spec_id, "spec-a");
}

fn routing_failed_telemetry(engine: &SpecAmender) -> Value {
    let lines = read_jsonl(&engine.layout().amendment_log()).unwrap();
    assert_eq!(lines[0]["event"], "routing-failed");
    lines[0]["metadata"]["router"].clone()
}

#[test]
fn all_failing_stage_a_escalates_once() {
    let dir = tempfile::tempdir().unwrap();
    let engine = amender(dir.path());

    // Two distinct directives and one testing requirement: six variants.
    assert!(engine.propose_manual(hostile_draft("spec-a")).unwrap_err().as_integrity().is_some());
    let router = routing_failed_telemetry(&engine);
    assert_eq!(router["escalated"], true);
    assert_eq!(router["k"], 6);
    assert_eq!(router["stage_a_evaluations"], 3 + 6);
    assert_eq!(router["stage_b_evaluations"], 2);
    assert_eq!(engine.pressure_store().load().consecutive_no_admissible, 1);
}

#[test]
fn repeated_directives_fail_without_escalation() {
    let dir = tempfile::tempdir().unwrap();
    let engine = amender(dir.path());
    let mut draft = hostile_draft("spec-a");
    draft.proposed_spec["directives"] = json!(["same", "same"]);

    let err = engine.propose_manual(draft).unwrap_err();
    assert!(err.as_integrity().unwrap().has_code(ViolationCode::Tamper));
    let router = routing_failed_telemetry(&engine);
    assert_eq!(router["escalated"], false);
    assert_eq!(router["k"], 3);
    assert_eq!(router["stage_a_evaluations"], 3);
    assert_eq!(
        events(&engine.layout().amendment_log()),
        vec!["routing-failed", "proof_budget_governor"]
    );
    assert_eq!(engine.pressure_store().load().consecutive_no_admissible, 1);
}

#[test]
fn forced_diagnostics_mode_quarantines_without_stage_b() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.governor.mode = "diagnostics_only".into();
    let engine = amender_with(config);

    let err = engine.propose_manual(benign_draft("spec-a")).unwrap_err();
    let violation = err.as_integrity().unwrap();
    assert_eq!(violation.reason_codes, vec![ViolationCode::DiagnosticsOnlyMode]);
    assert_eq!(json_files(&engine.layout().pending_dir()), 0);
    assert_eq!(engine.pressure_store().load().consecutive_no_admissible, 1);
}

#[test]
fn repeated_failures_collapse_into_diagnostics() {
    let dir = tempfile::tempdir().unwrap();
    let engine = amender(dir.path());
    for _ in 0..3 {
        assert!(engine.propose_manual(hostile_draft("spec-a")).is_err());
    }
    let err = engine.propose_manual(benign_draft("spec-a")).unwrap_err();
    assert!(err
        .as_integrity()
        .unwrap()
        .has_code(ViolationCode::DiagnosticsOnlyMode));
    assert_eq!(engine.pressure_store().load().consecutive_no_admissible, 4);
}

#[test]
fn pressure_reset_lifts_diagnostics_mode() {
    let dir = tempfile::tempdir().unwrap();
    let engine = amender(dir.path());
    for _ in 0..3 {
        assert!(engine.propose_manual(hostile_draft("spec-a")).is_err());
    }
    assert_eq!(engine.governor_status("spec-b")["decision"]["mode"], "diagnostics_only");

    let write = engine.reset_pressure("aurora").unwrap();
    assert!(write.prev_hash.is_some());
    assert_eq!(engine.governor_status("spec-b")["decision"]["mode"], "normal");
    assert_eq!(events(&engine.layout().amendment_log()).last().unwrap(), "pressure_reset");

    let proposal = engine.propose_manual(benign_draft("spec-b")).unwrap();
    assert_eq!(proposal.status, ProposalStatus::Pending);
}

// ===========================================================================
// Review board
// ===========================================================================

struct DenyHook;

impl ReviewBoardHook for DenyHook {
    fn enforce(&self, _spec_id: &str, _proposal_id: &str) -> PrivilegeReport {
        PrivilegeReport::violation(vec!["spec.rs:1: missing privilege banner".into()])
    }
}

#[test]
fn approval_requires_ledger_entry() {
    let dir = tempfile::tempdir().unwrap();
    let engine = amender(dir.path());
    let proposal = engine.propose_manual(benign_draft("spec-a")).unwrap();

    for ledger in [None, Some(""), Some("   ")] {
        let err = board(&engine)
            .approve(&proposal.proposal_id, "aurora", ledger)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
    let reloaded = engine.load_proposal(&proposal.proposal_id).unwrap();
    assert_eq!(reloaded.status, ProposalStatus::Pending);
}

#[test]
fn approval_with_ledger_activates() {
    let dir = tempfile::tempdir().unwrap();
    let engine = amender(dir.path());
    let proposal = record_until_proposal(&engine, "spec-a");

    let approved = board(&engine)
        .approve(&proposal.proposal_id, "aurora", Some("ledger://x"))
        .unwrap();
    assert_eq!(approved.status, ProposalStatus::Approved);
    assert_eq!(approved.ledger_entry.as_deref(), Some("ledger://x"));
    assert_eq!(approved.operator_notes.last().unwrap().action, "approved");

    let active = engine.active_amendments(Some("spec-a")).unwrap();
    assert_eq!(active.len(), 1);
    assert!(engine.list_pending().unwrap().is_empty());
    assert_eq!(engine.state().preferences["coverage_gap"].approved, 1);
    assert!(events(&engine.layout().amendment_log()).contains(&"approved".to_string()));

    let err = board(&engine)
        .approve(&proposal.proposal_id, "aurora", Some("ledger://y"))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[test]
fn privilege_block_quarantines() {
    let dir = tempfile::tempdir().unwrap();
    let engine = amender(dir.path());
    let proposal = engine.propose_manual(benign_draft("spec-a")).unwrap();

    let board = AmendmentReviewBoard::new(Arc::clone(&engine), Box::new(DenyHook));
    let err = board
        .approve(&proposal.proposal_id, "aurora", Some("ledger://x"))
        .unwrap_err();
    match err {
        Error::Privilege(v) => {
            assert_eq!(v.proposal_id, proposal.proposal_id);
            assert_eq!(v.report.issues.len(), 1);
        }
        other => panic!("expected privilege violation, got {other}"),
    }

    let stored = engine.load_proposal(&proposal.proposal_id).unwrap();
    assert_eq!(stored.status, ProposalStatus::Quarantined);
    assert!(engine
        .layout()
        .proposal_path(ProposalStatus::Quarantined, &proposal.proposal_id)
        .exists());
    assert!(!engine.has_active_amendment("spec-a").unwrap());
    assert!(events(&engine.layout().amendment_log()).contains(&"privilege-blocked".to_string()));
}

#[test]
fn rejection_lands_in_rejected_specs() {
    let dir = tempfile::tempdir().unwrap();
    let engine = amender(dir.path());
    let proposal = record_until_proposal(&engine, "spec-a");

    board(&engine)
        .reject(&proposal.proposal_id, "aurora", Some("too broad"))
        .unwrap();
    let path = dir
        .path()
        .join("rejected_specs")
        .join(format!("{}.json", proposal.proposal_id));
    assert!(path.exists());
    assert!(engine.list_pending().unwrap().is_empty());
    assert_eq!(engine.state().preferences["coverage_gap"].rejected, 1);
}

#[test]
fn regeneration_archives_original() {
    let dir = tempfile::tempdir().unwrap();
    let engine = amender(dir.path());
    let mut current = base_spec();
    current.insert("version".into(), json!("v3"));

    let proposal = board(&engine)
        .regenerate("spec-a", "aurora", "structural failure", &current)
        .unwrap();
    assert_eq!(proposal.kind, ProposalKind::Regeneration);
    assert_eq!(proposal.proposed_spec["version"], "v4");
    assert_eq!(proposal.proposed_spec["status"], "regenerated");
    assert_eq!(proposal.lineage.as_ref().unwrap()["from_version"], "v3");
    assert_eq!(proposal.operator_notes.last().unwrap().action, "regenerated");

    let archived = engine.layout().archive_originals_dir().join("spec-a_v3.json");
    let stored: Value = serde_json::from_str(&std::fs::read_to_string(archived).unwrap()).unwrap();
    assert_eq!(stored["version"], "v3");

    let spec_log = read_jsonl(&engine.layout().spec_log()).unwrap();
    assert_eq!(spec_log.len(), 1);
    assert_eq!(spec_log[0]["event"], "regenerated");
    assert_eq!(spec_log[0]["details"]["from_version"], "v3");
    assert_eq!(spec_log[0]["details"]["to_version"], "v4");
    assert_eq!(spec_log[0]["details"]["proposal_id"], proposal.proposal_id.as_str());
}

#[test]
fn new_proposal_supersedes_active_one() {
    let dir = tempfile::tempdir().unwrap();
    let engine = amender(dir.path());
    let first = engine.propose_manual(benign_draft("spec-a")).unwrap();
    let second = engine
        .regenerate_spec("spec-a", "aurora", "structural failure", &base_spec())
        .unwrap();

    let old = engine.load_proposal(&first.proposal_id).unwrap();
    assert_eq!(old.status, ProposalStatus::Archived);
    assert_eq!(old.operator_notes.last().unwrap().action, "superseded");
    let pending = engine.list_pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].proposal_id, second.proposal_id);
}

// ===========================================================================
// Edits, lineage and queries
// ===========================================================================

#[test]
fn edits_change_pending_and_annotate_approved() {
    let dir = tempfile::tempdir().unwrap();
    let engine = amender(dir.path());
    let proposal = engine.propose_manual(benign_draft("spec-a")).unwrap();

    let edited = board(&engine)
        .edit(
            &proposal.proposal_id,
            "aurora",
            ProposalEdit {
                summary: Some("Add a weekly and monthly audit".into()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(edited.summary, "Add a weekly and monthly audit");
    let note = edited.operator_notes.last().unwrap();
    assert_eq!(note.action, "edited");
    assert_eq!(
        note.metadata.as_ref().unwrap()["changes"]["summary"],
        "Add a weekly and monthly audit"
    );

    board(&engine)
        .approve(&proposal.proposal_id, "aurora", Some("ledger://x"))
        .unwrap();
    let annotated = engine
        .edit_proposal(
            &proposal.proposal_id,
            "aurora",
            ProposalEdit {
                summary: Some("Rewrite after approval".into()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(annotated.summary, "Add a weekly and monthly audit");
    assert_eq!(annotated.status, ProposalStatus::Approved);
    assert_eq!(annotated.operator_notes.last().unwrap().action, "edit-annotated");
    assert!(events(&engine.layout().amendment_log()).contains(&"edit-annotated".to_string()));
}

#[test]
fn lineage_annotation_merges_until_approved() {
    let dir = tempfile::tempdir().unwrap();
    let engine = amender(dir.path());
    let proposal = engine.propose_manual(benign_draft("spec-a")).unwrap();

    let annotated = engine
        .annotate_lineage(
            &proposal.proposal_id,
            object(json!({"parent": "spec-a-v1"})),
            Some(object(json!({"ticket": "GOV-7"}))),
        )
        .unwrap();
    assert_eq!(annotated.lineage.as_ref().unwrap()["parent"], "spec-a-v1");
    assert_eq!(annotated.context["ticket"], "GOV-7");
    assert_eq!(annotated.context["reason"], "operator request");

    board(&engine)
        .approve(&proposal.proposal_id, "aurora", Some("ledger://x"))
        .unwrap();
    let err = engine
        .annotate_lineage(&proposal.proposal_id, object(json!({"parent": "other"})), None)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[test]
fn unknown_proposal_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let engine = amender(dir.path());
    let err = engine.load_proposal("spec-z-deadbeef").unwrap_err();
    assert_eq!(err.to_string(), "amendment spec-z-deadbeef not found");
}

#[test]
fn dashboard_lists_pending_and_approved() {
    let dir = tempfile::tempdir().unwrap();
    let engine = amender(dir.path());
    let a = engine.propose_manual(benign_draft("spec-a")).unwrap();
    engine.propose_manual(benign_draft("spec-b")).unwrap();
    board(&engine)
        .approve(&a.proposal_id, "aurora", Some("ledger://a"))
        .unwrap();

    let dashboard = engine.dashboard_state().unwrap();
    assert_eq!(dashboard["panel"], "Spec Amendments");
    assert_eq!(dashboard["pending"].as_array().unwrap().len(), 1);
    assert_eq!(dashboard["approved"].as_array().unwrap().len(), 1);
    assert_eq!(dashboard["items"].as_array().unwrap().len(), 2);
    assert_eq!(dashboard["approved"][0]["ledger_entry"], "ledger://a");
    assert_eq!(
        dashboard["pending"][0]["diff"]["directives"]["added"][0],
        "Audit weekly"
    );
}

#[test]
fn health_endpoint_tracks_daemon() {
    let dir = tempfile::tempdir().unwrap();
    let engine = amender(dir.path());
    assert_eq!(engine.integrity_endpoint().health.status, HealthStatus::Idle);

    engine.propose_manual(benign_draft("spec-a")).unwrap();
    let snapshot = engine.integrity_endpoint();
    assert_eq!(snapshot.daemon, "IntegrityDaemon");
    assert_eq!(snapshot.health.status, HealthStatus::Stable);
    assert!(snapshot.health.passed >= 1);
}
