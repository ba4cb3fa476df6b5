//! Deterministic variant drafting.
//!
//! A draft expands into up to `k` candidates. Variant 0 is the draft itself;
//! the rest pick a combination of summary phrasing, directive rotation and
//! testing-requirement rotation from a seed derived from the spec id, the
//! dominant signal, the current minute and `k`. Identical inputs within one
//! minute always produce identical candidates.

use chrono::{DateTime, Utc};
use codex_core::spec::Spec;
use codex_core::{AmendmentProposal, Error, ProposalKind, ProposalStatus, Result};
use ring::digest;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

/// Proposal content before routing assigns an id.
#[derive(Clone, Debug, PartialEq)]
pub struct Draft {
    pub spec_id: String,
    pub kind: ProposalKind,
    pub summary: String,
    pub deltas: Map<String, Value>,
    pub context: Map<String, Value>,
    pub original_spec: Spec,
    pub proposed_spec: Spec,
    pub lineage: Option<Map<String, Value>>,
}

impl Draft {
    pub fn amendment(spec_id: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            spec_id: spec_id.into(),
            kind: ProposalKind::Amendment,
            summary: summary.into(),
            deltas: Map::new(),
            context: Map::new(),
            original_spec: Spec::new(),
            proposed_spec: Spec::new(),
            lineage: None,
        }
    }

    /// Signal used to seed variants: `dominant_signal`, else `reason`, else `manual`.
    pub fn dominant_signal(&self) -> &str {
        self.context
            .get("dominant_signal")
            .or_else(|| self.context.get("reason"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or("manual")
    }

    pub fn to_proposal(&self, proposal_id: impl Into<String>, at: DateTime<Utc>) -> AmendmentProposal {
        AmendmentProposal {
            proposal_id: proposal_id.into(),
            spec_id: self.spec_id.clone(),
            kind: self.kind,
            status: ProposalStatus::Pending,
            summary: self.summary.clone(),
            deltas: self.deltas.clone(),
            context: self.context.clone(),
            original_spec: self.original_spec.clone(),
            proposed_spec: self.proposed_spec.clone(),
            created_at: at,
            updated_at: at,
            ledger_entry: None,
            operator_notes: Vec::new(),
            lineage: self.lineage.clone().filter(|l| !l.is_empty()),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Variant {
    pub candidate_id: String,
    pub draft: Draft,
}

const PHRASINGS: usize = 3;

fn phrase(summary: &str, index: usize) -> String {
    match index {
        1 => format!("Proposed: {summary}"),
        2 => format!("Candidate revision: {summary}"),
        _ => summary.to_string(),
    }
}

/// Number of distinct left rotations of the list at `field`, i.e. its
/// smallest period. `["a", "a"]` has one, `["a", "b", "a", "b"]` two.
fn distinct_rotations(spec: &Spec, field: &str) -> usize {
    let Some(items) = spec.get(field).and_then(Value::as_array) else {
        return 1;
    };
    let n = items.len();
    (1..=n)
        .find(|r| n % r == 0 && (0..n).all(|i| items[i] == items[(i + r) % n]))
        .unwrap_or(1)
}

/// Axis sizes `(phrasings, directive rotations, testing rotations)`. Every
/// combination within these bounds yields different content.
fn axes(draft: &Draft) -> (usize, usize, usize) {
    let p = if draft.summary.trim().is_empty() { 1 } else { PHRASINGS };
    let d = distinct_rotations(&draft.proposed_spec, "directives");
    let t = distinct_rotations(&draft.proposed_spec, "testing_requirements");
    (p, d, t)
}

/// Number of distinct combinations the scheme can produce for `draft`.
pub fn capacity(draft: &Draft) -> usize {
    let (p, d, t) = axes(draft);
    p * d * t
}

fn sha256(bytes: &[u8]) -> digest::Digest {
    digest::digest(&digest::SHA256, bytes)
}

/// First 8 bytes of SHA-256 over `spec_id|signal|minute_bucket|k`.
pub fn variant_seed(spec_id: &str, signal: &str, minute_bucket: i64, k: usize) -> u64 {
    let material = format!("{spec_id}|{signal}|{minute_bucket}|{k}");
    let digest = sha256(material.as_bytes());
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest.as_ref()[..8]);
    u64::from_be_bytes(seed)
}

/// Minute bucket for `at`, the time component of the seed.
pub fn minute_bucket(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(60)
}

fn rotate(spec: &mut Spec, field: &str, by: usize) {
    if let Some(Value::Array(items)) = spec.get_mut(field) {
        if !items.is_empty() {
            let by = by % items.len();
            items.rotate_left(by);
        }
    }
}

fn apply_combo(draft: &Draft, combo: usize) -> Draft {
    let (p, d, _) = axes(draft);
    let mut variant = draft.clone();
    variant.summary = phrase(&draft.summary, combo % p);
    rotate(&mut variant.proposed_spec, "directives", (combo / p) % d);
    rotate(&mut variant.proposed_spec, "testing_requirements", combo / (p * d));
    variant
}

fn signature(draft: &Draft) -> String {
    let material = json!({
        "summary": draft.summary,
        "proposed_spec": draft.proposed_spec,
        "deltas": draft.deltas,
    });
    sha256(material.to_string().as_bytes())
        .as_ref()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Draft up to `k` distinct variants of `draft`.
///
/// `k` is clamped to the scheme's capacity. Attempts are bounded at `5k`;
/// falling short of the clamped count is `Error::VariantExhaustion`.
pub fn draft_variants(draft: &Draft, k: usize, minute_bucket: i64) -> Result<Vec<Variant>> {
    let cap = capacity(draft);
    let requested = k.max(1).min(cap);
    if requested < k {
        tracing::debug!(spec_id = %draft.spec_id, k, cap, "Clamped variant count to capacity");
    }

    let seed = variant_seed(&draft.spec_id, draft.dominant_signal(), minute_bucket, requested);
    let base = (seed % cap as u64) as usize;

    let mut seen = BTreeSet::new();
    let mut variants = Vec::with_capacity(requested);
    let mut push = |candidate: Draft, variants: &mut Vec<Variant>| {
        let sig = signature(&candidate);
        if seen.insert(sig.clone()) {
            variants.push(Variant {
                candidate_id: format!("{}-cand{}-{}", draft.spec_id, variants.len(), &sig[..8]),
                draft: candidate,
            });
        }
    };

    push(draft.clone(), &mut variants);
    for attempt in 1..=requested * 5 {
        if variants.len() >= requested {
            break;
        }
        push(apply_combo(draft, (base + attempt) % cap), &mut variants);
    }

    if variants.len() < requested {
        return Err(Error::VariantExhaustion {
            requested,
            drafted: variants.len(),
        });
    }
    Ok(variants)
}
