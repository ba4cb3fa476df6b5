//! Violation taxonomy shared by the integrity daemon and the router.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Reason code attached to every integrity violation.
///
/// Codes order by wire name, which is the sorted order used in ledger records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCode {
    DiagnosticsOnlyMode,
    Entropy,
    ProofInvalid,
    Tamper,
    ViolationOfVow,
    #[serde(other)]
    Unknown,
}

impl ViolationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DiagnosticsOnlyMode => "diagnostics_only_mode",
            Self::Entropy => "entropy",
            Self::ProofInvalid => "proof_invalid",
            Self::Tamper => "tamper",
            Self::ViolationOfVow => "violation_of_vow",
            Self::Unknown => "unknown",
        }
    }
}

impl Ord for ViolationCode {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl PartialOrd for ViolationCode {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for ViolationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single covenant violation: `{code, detail}` plus the failing invariant
/// when the violation was folded in from a proof report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub code: ViolationCode,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invariant: Option<String>,
}

impl Violation {
    pub fn new(code: ViolationCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
            invariant: None,
        }
    }

    pub fn tamper(detail: impl Into<String>) -> Self {
        Self::new(ViolationCode::Tamper, detail)
    }

    pub fn vow(detail: impl Into<String>) -> Self {
        Self::new(ViolationCode::ViolationOfVow, detail)
    }

    pub fn entropy(detail: impl Into<String>) -> Self {
        Self::new(ViolationCode::Entropy, detail)
    }

    pub fn with_invariant(mut self, invariant: impl Into<String>) -> Self {
        self.invariant = Some(invariant.into());
        self
    }
}

/// Sorted, deduplicated reason codes for a violation list.
pub fn reason_codes(violations: &[Violation]) -> Vec<ViolationCode> {
    violations
        .iter()
        .map(|v| v.code)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
