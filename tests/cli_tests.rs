//! End-to-end tests for the `codex` command line

use clap::{CommandFactory, Parser};
use sentientos_codex::{execute, Cli};
use serde_json::{json, Value};
use std::path::Path;

fn run(root: &Path, args: &[&str]) -> anyhow::Result<String> {
    let root = root.to_str().unwrap();
    let config = format!("{root}/codex.toml");
    let mut argv = vec!["codex", "--root", root, "--config", config.as_str()];
    argv.extend_from_slice(args);
    let cli = Cli::try_parse_from(argv)?;
    let mut out = Vec::new();
    execute(&cli, &mut out)?;
    Ok(String::from_utf8(out)?)
}

fn write_json(path: &Path, value: &Value) -> String {
    std::fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    path.to_str().unwrap().to_string()
}

fn spec() -> Value {
    json!({
        "objective": "Keep the covenant ledger consistent",
        "directives": ["Record every amendment"],
        "testing_requirements": ["Replay the ledger"],
        "version": "v1",
    })
}

fn propose(root: &Path) -> String {
    let original = write_json(&root.join("original.json"), &spec());
    let mut proposed = spec();
    proposed["directives"] = json!(["Record every amendment", "Audit weekly"]);
    let proposed = write_json(&root.join("proposed.json"), &proposed);
    let out = run(
        root,
        &[
            "propose",
            "--spec-id",
            "spec-a",
            "--summary",
            "Add a weekly audit",
            "--original",
            &original,
            "--proposed",
            &proposed,
            "--deltas",
            r#"{"directives": {"added": ["Audit weekly"]}}"#,
        ],
    )
    .unwrap();
    let proposal: Value = serde_json::from_str(&out).unwrap();
    proposal["proposal_id"].as_str().unwrap().to_string()
}

#[test]
fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn version_prints_package_version() {
    let dir = tempfile::tempdir().unwrap();
    let out = run(dir.path(), &["version"]).unwrap();
    assert_eq!(out.trim(), format!("codex v{}", env!("CARGO_PKG_VERSION")));
}

#[test]
fn propose_then_approve() {
    let dir = tempfile::tempdir().unwrap();
    let id = propose(dir.path());

    let pending: Value = serde_json::from_str(&run(dir.path(), &["pending"]).unwrap()).unwrap();
    assert_eq!(pending.as_array().unwrap().len(), 1);

    let err = run(dir.path(), &["approve", &id, "--operator", "aurora"]).unwrap_err();
    assert!(err.to_string().contains("ledger entry required"));

    run(
        dir.path(),
        &["approve", &id, "--operator", "aurora", "--ledger-entry", "ledger://x"],
    )
    .unwrap();
    let active: Value =
        serde_json::from_str(&run(dir.path(), &["active", "--spec-id", "spec-a"]).unwrap()).unwrap();
    assert_eq!(active[0]["proposal_id"], id.as_str());
    assert_eq!(active[0]["ledger_entry"], "ledger://x");
}

#[test]
fn signals_accumulate_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let spec_path = write_json(&dir.path().join("spec.json"), &spec());
    let args = [
        "signal",
        "--spec-id",
        "spec-a",
        "--type",
        "coverage_gap",
        "--spec",
        spec_path.as_str(),
    ];

    for _ in 0..2 {
        assert_eq!(run(dir.path(), &args).unwrap().trim(), "No amendment drafted for spec-a");
    }
    let proposal: Value = serde_json::from_str(&run(dir.path(), &args).unwrap()).unwrap();
    assert_eq!(proposal["context"]["counts"]["coverage_gap"], 3);
    assert_eq!(proposal["status"], "pending");

    // The drafted amendment is active, so later signals are ignored.
    assert_eq!(run(dir.path(), &args).unwrap().trim(), "No amendment drafted for spec-a");
}

#[test]
fn threshold_override_drafts_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let spec_path = write_json(&dir.path().join("spec.json"), &spec());
    let out = run(dir.path(), &["threshold", "drift", "0"]).unwrap();
    assert_eq!(out.trim(), "Threshold for drift set to 1");

    let args = [
        "signal",
        "--spec-id",
        "spec-a",
        "--type",
        "drift",
        "--spec",
        spec_path.as_str(),
    ];
    let proposal: Value = serde_json::from_str(&run(dir.path(), &args).unwrap()).unwrap();
    assert_eq!(proposal["context"]["counts"]["drift"], 1);
}

#[test]
fn verify_reports_forbidden_status() {
    let dir = tempfile::tempdir().unwrap();
    let mut payload = spec();
    payload["status"] = json!("retired");
    let path = write_json(&dir.path().join("payload.json"), &json!({"spec": payload}));
    let out = run(dir.path(), &["verify", &path]).unwrap();
    assert!(out.contains("\"invariant\": \"forbidden_status\""));
    assert!(out.trim_end().ends_with("status = QUARANTINED."));
}

fn propose_hostile(root: &Path) -> anyhow::Error {
    let original = write_json(&root.join("original.json"), &spec());
    let proposed = write_json(
        &root.join("hostile.json"),
        &json!({"directives": [], "testing_requirements": ["Replay the ledger"]}),
    );
    run(
        root,
        &[
            "propose", "--spec-id", "spec-a", "--summary", "Strip", "--original", &original,
            "--proposed", &proposed, "--deltas", r#"{"objective": null}"#,
        ],
    )
    .unwrap_err()
}

#[test]
fn hostile_proposal_fails_with_codes() {
    let dir = tempfile::tempdir().unwrap();
    let err = propose_hostile(dir.path());
    assert!(err.to_string().contains("tamper"));

    let health: Value = serde_json::from_str(&run(dir.path(), &["health"]).unwrap()).unwrap();
    assert_eq!(health["daemon"], "IntegrityDaemon");
}

#[test]
fn governor_reset_recovers_from_collapse() {
    let dir = tempfile::tempdir().unwrap();
    for _ in 0..3 {
        propose_hostile(dir.path());
    }
    let status: Value =
        serde_json::from_str(&run(dir.path(), &["governor", "show"]).unwrap()).unwrap();
    assert_eq!(status["state"]["consecutive_no_admissible"], 3);
    assert_eq!(status["decision"]["mode"], "diagnostics_only");

    let out = run(dir.path(), &["governor", "reset", "--operator", "aurora"]).unwrap();
    assert!(out.starts_with("Governor pressure reset"));

    let status: Value =
        serde_json::from_str(&run(dir.path(), &["governor", "show"]).unwrap()).unwrap();
    assert_eq!(status["state"]["consecutive_no_admissible"], 0);
    assert_eq!(status["decision"]["mode"], "normal");
    propose(dir.path());
}

#[test]
fn config_reflects_root_override() {
    let dir = tempfile::tempdir().unwrap();
    let out = run(dir.path(), &["config"]).unwrap();
    assert!(out.contains("[router]"));
    assert!(out.contains(dir.path().to_str().unwrap()));
}

#[test]
fn unknown_proposal_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let err = run(dir.path(), &["show", "spec-a-00000000"]).unwrap_err();
    assert_eq!(err.to_string(), "amendment spec-a-00000000 not found");
}
