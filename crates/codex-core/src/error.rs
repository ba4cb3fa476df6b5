//! Error types for the amendment pipeline

use crate::violation::{reason_codes, Violation, ViolationCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raised when a proposal fails covenant checks. The ledger and quarantine
/// records are always written before this is returned.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error(
    "amendment proposal rejected by integrity daemon: {proposal_id} ({})",
    join_codes(.reason_codes)
)]
pub struct IntegrityViolation {
    pub proposal_id: String,
    pub spec_id: String,
    pub reason_codes: Vec<ViolationCode>,
    pub violations: Vec<Violation>,
}

impl IntegrityViolation {
    pub fn new(
        proposal_id: impl Into<String>,
        spec_id: impl Into<String>,
        violations: Vec<Violation>,
    ) -> Self {
        Self {
            proposal_id: proposal_id.into(),
            spec_id: spec_id.into(),
            reason_codes: reason_codes(&violations),
            violations,
        }
    }

    pub fn has_code(&self, code: ViolationCode) -> bool {
        self.reason_codes.contains(&code)
    }
}

fn join_codes(codes: &[ViolationCode]) -> String {
    codes
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Verdict returned by a privilege-lint hook.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivilegeReport {
    pub passed: bool,
    #[serde(default)]
    pub issues: Vec<String>,
}

impl PrivilegeReport {
    pub fn clean() -> Self {
        Self {
            passed: true,
            issues: Vec::new(),
        }
    }

    pub fn violation(issues: Vec<String>) -> Self {
        Self {
            passed: false,
            issues,
        }
    }
}

/// Raised by the review board when the privilege lint blocks an approval.
#[derive(Error, Debug, Clone, PartialEq)]
#[error(
    "privilege lint blocked approval of {proposal_id}: {} issue(s)",
    .report.issues.len()
)]
pub struct PrivilegeViolation {
    pub proposal_id: String,
    pub spec_id: String,
    pub report: PrivilegeReport,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Integrity(#[from] IntegrityViolation),

    #[error(transparent)]
    Privilege(#[from] PrivilegeViolation),

    #[error("amendment {0} not found")]
    ProposalNotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unable to draft {requested} amendment variants (drafted {drafted})")]
    VariantExhaustion { requested: usize, drafted: usize },

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// The integrity violation carried by this error, if any.
    pub fn as_integrity(&self) -> Option<&IntegrityViolation> {
        match self {
            Self::Integrity(v) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_violation_display_lists_codes() {
        let err = IntegrityViolation::new(
            "spec-a-1234",
            "spec-a",
            vec![
                Violation::vow("ledger requirement removed"),
                Violation::tamper("recursion break detected"),
            ],
        );
        assert_eq!(
            err.to_string(),
            "amendment proposal rejected by integrity daemon: spec-a-1234 (tamper, violation_of_vow)"
        );
        assert!(err.has_code(ViolationCode::Tamper));
        assert!(!err.has_code(ViolationCode::Entropy));
    }

    #[test]
    fn privilege_violation_display_counts_issues() {
        let err = PrivilegeViolation {
            proposal_id: "p-1".into(),
            spec_id: "s".into(),
            report: PrivilegeReport::violation(vec!["spec.py:1: missing banner".into()]),
        };
        assert_eq!(err.to_string(), "privilege lint blocked approval of p-1: 1 issue(s)");
    }

    #[test]
    fn error_wraps_violations_transparently() {
        let v = IntegrityViolation::new("p", "s", vec![Violation::entropy("proposal summary missing")]);
        let err: Error = v.clone().into();
        assert_eq!(err.to_string(), v.to_string());
        assert_eq!(err.as_integrity(), Some(&v));
    }

    #[test]
    fn variant_exhaustion_display() {
        let err = Error::VariantExhaustion { requested: 6, drafted: 2 };
        assert_eq!(err.to_string(), "unable to draft 6 amendment variants (drafted 2)");
    }
}
