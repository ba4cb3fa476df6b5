//! Amendment proposals and their lifecycle states.

use crate::spec::Spec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalKind {
    Amendment,
    Regeneration,
}

impl std::fmt::Display for ProposalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Amendment => write!(f, "amendment"),
            Self::Regeneration => write!(f, "regeneration"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
    Quarantined,
    Archived,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Quarantined => "quarantined",
            Self::Archived => "archived",
        }
    }

    /// Pending and approved proposals count against the one-active-per-spec rule.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Approved)
    }
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only operator annotation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OperatorNote {
    pub operator: String,
    pub action: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

/// One candidate change to a spec.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AmendmentProposal {
    pub proposal_id: String,
    pub spec_id: String,
    pub kind: ProposalKind,
    pub status: ProposalStatus,
    pub summary: String,
    #[serde(default)]
    pub deltas: Map<String, Value>,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default)]
    pub original_spec: Spec,
    #[serde(default)]
    pub proposed_spec: Spec,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub ledger_entry: Option<String>,
    #[serde(default)]
    pub operator_notes: Vec<OperatorNote>,
    #[serde(default, skip_serializing_if = "lineage_is_empty")]
    pub lineage: Option<Map<String, Value>>,
}

fn lineage_is_empty(lineage: &Option<Map<String, Value>>) -> bool {
    lineage.as_ref().map_or(true, |l| l.is_empty())
}

impl AmendmentProposal {
    pub fn add_note(
        &mut self,
        operator: impl Into<String>,
        action: impl Into<String>,
        metadata: Option<Map<String, Value>>,
        at: DateTime<Utc>,
    ) {
        self.operator_notes.push(OperatorNote {
            operator: operator.into(),
            action: action.into(),
            timestamp: at,
            metadata: metadata.filter(|m| !m.is_empty()),
        });
    }

    /// The telemetry signal that drove this proposal, used for preference tracking.
    pub fn dominant_signal(&self) -> Option<&str> {
        self.context
            .get("dominant_signal")
            .or_else(|| self.context.get("reason"))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    /// Key-sorted JSON document, the form written to disk and to quarantine records.
    pub fn to_document(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}
