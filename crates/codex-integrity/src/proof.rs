//! Proof-of-validity verifier: evaluates the invariant catalogue against a
//! proposal and returns a machine-readable verdict with a full trace.

use crate::catalogue::{Catalogue, InvariantSpec};
use codex_core::spec::{self, Spec, FORBIDDEN_STATUSES, REQUIRED_FIELDS};
use codex_core::AmendmentProposal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Inputs to one verification. Build it from a proposal or from a loose JSON mapping.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProofInput {
    pub spec: Spec,
    pub original_spec: Spec,
    /// `ledger_diff.removed`: ledger entries dropped by the change.
    pub ledger_removed: Vec<Value>,
    pub required_fields: Option<Vec<String>>,
    /// Payload-level status, consulted when the spec carries none.
    pub status: Option<String>,
    pub recursion_break: bool,
}

impl ProofInput {
    pub fn from_proposal(proposal: &AmendmentProposal) -> Self {
        Self {
            spec: proposal.proposed_spec.clone(),
            original_spec: proposal.original_spec.clone(),
            ..Self::default()
        }
    }

    /// Accepts `proposed_spec` or `spec`, `original_spec`, `ledger_diff`,
    /// `required_fields`, `status` and `recursion_break`.
    pub fn from_value(payload: &Value) -> Self {
        let get = |key: &str| payload.get(key).filter(|v| spec::is_truthy(v));
        let spec = spec::object_of(get("proposed_spec").or_else(|| get("spec")));
        let ledger_diff = spec::object_of(get("ledger_diff"));
        let required_fields = match payload.get("required_fields") {
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                    .collect(),
            ),
            _ => None,
        };
        Self {
            spec,
            original_spec: spec::object_of(get("original_spec")),
            ledger_removed: spec::list_of(ledger_diff.get("removed")),
            required_fields,
            status: payload.get("status").map(value_text),
            recursion_break: payload.get("recursion_break").map(spec::is_truthy).unwrap_or(false),
        }
    }

    pub fn with_ledger_removed(mut self, removed: Vec<Value>) -> Self {
        self.ledger_removed = removed;
        self
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Derived view every invariant check reads from.
struct Normalised<'a> {
    required_fields: BTreeSet<String>,
    spec_fields: BTreeSet<String>,
    ledger_removed: &'a [Value],
    status: String,
    status_normalised: String,
    recursion_break: bool,
}

impl<'a> Normalised<'a> {
    fn new(input: &'a ProofInput) -> Self {
        let required_fields = match &input.required_fields {
            Some(fields) => fields.iter().cloned().collect(),
            None => REQUIRED_FIELDS.iter().map(|f| f.to_string()).collect(),
        };
        let status = match input.spec.get("status") {
            Some(v) => value_text(v),
            None => input.status.clone().unwrap_or_default(),
        };
        let recursion_break = input.recursion_break
            || input.spec.get("recursion_break").map(spec::is_truthy).unwrap_or(false)
            || crate::probe::recursion_break(&input.spec);
        Self {
            required_fields,
            spec_fields: input.spec.keys().cloned().collect(),
            ledger_removed: &input.ledger_removed,
            status_normalised: status.trim().to_lowercase(),
            status,
            recursion_break,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProofViolation {
    pub invariant: String,
    pub rule: String,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_hint: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub invariant: String,
    pub rule: String,
    pub passed: bool,
    pub context: Map<String, Value>,
}

/// Verdict of one verification. `valid` holds exactly when `violations` is empty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProofReport {
    pub valid: bool,
    pub violations: Vec<ProofViolation>,
    pub trace: Vec<TraceEntry>,
}

impl ProofReport {
    pub fn summary(&self) -> String {
        let total = self.trace.len();
        let failures = self.violations.len();
        let passed = total.saturating_sub(failures);
        let status = if self.valid { "VALID" } else { "QUARANTINED" };
        format!(
            "Amendment validated: {passed} invariants passed, {failures} violations detected, status = {status}."
        )
    }
}

struct Outcome {
    passed: bool,
    context: Map<String, Value>,
    detail: Option<String>,
}

impl Outcome {
    fn trivial() -> Self {
        Self {
            passed: true,
            context: Map::new(),
            detail: None,
        }
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

pub struct ProofVerifier {
    catalogue_path: PathBuf,
    catalogue: OnceLock<Catalogue>,
}

impl ProofVerifier {
    /// Verifier reading `<vow_dir>/invariants.yaml` on first use.
    pub fn new(vow_dir: impl AsRef<Path>) -> Self {
        Self::with_catalogue_path(vow_dir.as_ref().join("invariants.yaml"))
    }

    pub fn with_catalogue_path(path: impl Into<PathBuf>) -> Self {
        Self {
            catalogue_path: path.into(),
            catalogue: OnceLock::new(),
        }
    }

    pub fn with_catalogue(catalogue: Catalogue) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(catalogue);
        Self {
            catalogue_path: PathBuf::new(),
            catalogue: cell,
        }
    }

    fn catalogue(&self) -> &Catalogue {
        self.catalogue
            .get_or_init(|| Catalogue::load(&self.catalogue_path))
    }

    pub fn describe_invariants(&self) -> Vec<InvariantSpec> {
        self.catalogue().entries().to_vec()
    }

    pub fn evaluate(&self, input: &ProofInput) -> ProofReport {
        let payload = Normalised::new(input);
        let mut trace = Vec::new();
        let mut violations = Vec::new();

        for entry in self.catalogue().entries() {
            let outcome = evaluate_invariant(&entry.name, &payload);
            trace.push(TraceEntry {
                invariant: entry.name.clone(),
                rule: entry.rule.clone(),
                passed: outcome.passed,
                context: outcome.context,
            });
            if outcome.passed {
                continue;
            }
            violations.push(ProofViolation {
                invariant: entry.name.clone(),
                rule: entry.rule.clone(),
                detail: outcome.detail.unwrap_or_default(),
                description: Some(entry.description.clone()).filter(|d| !d.is_empty()),
                severity: entry.severity.clone().filter(|s| !s.is_empty()),
                proof_hint: entry.proof_hint.clone().filter(|h| !h.is_empty()),
            });
        }

        ProofReport {
            valid: violations.is_empty(),
            violations,
            trace,
        }
    }
}

fn evaluate_invariant(name: &str, payload: &Normalised<'_>) -> Outcome {
    match name {
        "structural_integrity" => structural_integrity(payload),
        "audit_continuity" => audit_continuity(payload),
        "forbidden_status" => forbidden_status(payload),
        "recursion_guard" => recursion_guard(payload),
        // Unknown invariants are informational.
        _ => Outcome::trivial(),
    }
}

fn structural_integrity(payload: &Normalised<'_>) -> Outcome {
    let missing: Vec<&String> = payload
        .required_fields
        .difference(&payload.spec_fields)
        .collect();
    let detail = (!missing.is_empty()).then(|| {
        let names: Vec<&str> = missing.iter().map(|s| s.as_str()).collect();
        format!("Missing required fields: {}", names.join(", "))
    });
    Outcome {
        passed: missing.is_empty(),
        context: object(json!({
            "required_fields": payload.required_fields,
            "spec_fields": payload.spec_fields,
            "missing": missing,
        })),
        detail,
    }
}

fn audit_continuity(payload: &Normalised<'_>) -> Outcome {
    let passed = payload.ledger_removed.is_empty();
    Outcome {
        passed,
        context: object(json!({ "removed": payload.ledger_removed })),
        detail: (!passed).then(|| "Ledger entries were removed".to_string()),
    }
}

fn forbidden_status(payload: &Normalised<'_>) -> Outcome {
    let passed = !FORBIDDEN_STATUSES.contains(&payload.status_normalised.as_str());
    let mut forbidden: Vec<&str> = FORBIDDEN_STATUSES.to_vec();
    forbidden.sort_unstable();
    Outcome {
        passed,
        context: object(json!({
            "status": payload.status,
            "forbidden_statuses": forbidden,
        })),
        detail: (!passed).then(|| format!("Status '{}' violates forbidden list", payload.status)),
    }
}

fn recursion_guard(payload: &Normalised<'_>) -> Outcome {
    let passed = !payload.recursion_break;
    Outcome {
        passed,
        context: object(json!({ "recursion_break": payload.recursion_break })),
        detail: (!passed).then(|| "Recursion break flag detected".to_string()),
    }
}
