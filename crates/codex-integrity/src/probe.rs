//! Hostile-delta probe: diffs a proposal's original and proposed specs.

use codex_core::spec::{self, Spec, LEDGER_KEYS, LIST_FIELDS, REQUIRED_FIELDS};
use codex_core::{AmendmentProposal, Violation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub removed_keys: Vec<String>,
    pub truncated_lists: Vec<String>,
    pub lineage_missing: bool,
    pub ledger_removed: bool,
    pub forbidden_status: Option<String>,
    pub summary_blank: bool,
    pub deltas_empty: bool,
    pub recursion_break: bool,
}

impl ProbeReport {
    pub fn run(proposal: &AmendmentProposal) -> Self {
        let original = &proposal.original_spec;
        let proposed = &proposal.proposed_spec;

        // Map keys iterate sorted.
        let removed_keys = original
            .keys()
            .filter(|k| !proposed.contains_key(*k))
            .cloned()
            .collect();

        let truncated_lists = LIST_FIELDS
            .iter()
            .filter(|field| list_lossy(original, proposed, field))
            .map(|field| field.to_string())
            .collect();

        let lineage_missing = original.contains_key("lineage")
            && !proposed.get("lineage").map(spec::is_truthy).unwrap_or(false);

        let forbidden_status = proposed
            .get("status")
            .and_then(Value::as_str)
            .map(str::to_lowercase)
            .filter(|s| spec::is_forbidden_status(s));

        Self {
            removed_keys,
            truncated_lists,
            lineage_missing,
            ledger_removed: ledger_removed(original, proposed),
            forbidden_status,
            summary_blank: proposal.summary.trim().is_empty(),
            deltas_empty: proposal.deltas.is_empty(),
            recursion_break: recursion_break(proposed),
        }
    }

    /// Covenant violations implied by this probe, in a fixed order.
    pub fn covenant_violations(&self) -> Vec<Violation> {
        let mut violations = Vec::new();
        for field in REQUIRED_FIELDS {
            if self.removed_keys.iter().any(|k| k == field) {
                violations.push(Violation::tamper(format!("required field '{field}' removed")));
            }
        }
        for field in &self.truncated_lists {
            violations.push(Violation::tamper(format!("list field '{field}' truncated")));
        }
        if self.lineage_missing {
            violations.push(Violation::vow("lineage removed from proposed spec"));
        }
        if self.ledger_removed {
            violations.push(Violation::vow("ledger requirement removed"));
        }
        if let Some(status) = &self.forbidden_status {
            violations.push(Violation::tamper(format!(
                "status change to '{status}' is forbidden"
            )));
        }
        if self.summary_blank {
            violations.push(Violation::entropy("proposal summary missing"));
        }
        if self.deltas_empty {
            violations.push(Violation::entropy("proposal contains no deltas"));
        }
        if self.recursion_break {
            violations.push(Violation::tamper("recursion break detected"));
        }
        violations
    }
}

/// Every key present in both lineages must keep its original value.
pub fn lineage_overwrites(proposal: &AmendmentProposal) -> Vec<Violation> {
    let original = spec::object_of(proposal.original_spec.get("lineage"));
    let proposed = spec::object_of(proposal.proposed_spec.get("lineage"));
    if original.is_empty() || proposed.is_empty() {
        return Vec::new();
    }
    original
        .iter()
        .filter(|(key, value)| proposed.get(*key) != Some(*value))
        .map(|(key, _)| Violation::vow(format!("lineage field '{key}' overwritten")))
        .collect()
}

/// Ledger keys present in the original spec and absent from the proposal.
pub fn removed_ledger_keys(original: &Spec, proposed: &Spec) -> Vec<String> {
    LEDGER_KEYS
        .iter()
        .filter(|k| original.contains_key(**k) && !proposed.contains_key(**k))
        .map(|k| k.to_string())
        .collect()
}

/// `recursion: break|halt` (any case) on the proposed spec.
pub fn recursion_break(proposed: &Spec) -> bool {
    proposed
        .get("recursion")
        .and_then(Value::as_str)
        .map(|r| matches!(r.trim().to_lowercase().as_str(), "break" | "halt"))
        .unwrap_or(false)
}

fn list_lossy(original: &Spec, proposed: &Spec, field: &str) -> bool {
    let before = spec::list_of(original.get(field));
    if before.is_empty() {
        return false;
    }
    let after = spec::list_of(proposed.get(field));
    after.len() < before.len() || before.iter().any(|item| !after.contains(item))
}

fn ledger_removed(original: &Spec, proposed: &Spec) -> bool {
    if !removed_ledger_keys(original, proposed).is_empty() {
        return true;
    }
    // A missing flag counts as required.
    let required = |s: &Spec| s.get("ledger_required").map(spec::is_truthy).unwrap_or(true);
    required(original) && !required(proposed)
}
