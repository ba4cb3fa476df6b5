//! Proof budget governor.
//!
//! Decides how many candidates to draft (`k`) and how many to promote to
//! stage B (`m`) from the recent routing history kept in the pressure state.
//! Sustained routing failures push the budget toward diagnostics-only mode;
//! a successful selection resets the failure counter.

use crate::router::{env_usize, flag_enabled, RouterTelemetry, SelectionStatus};
use chrono::{DateTime, Utc};
use codex_core::store::write_json_atomic;
use codex_core::Result;
use ring::digest;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

pub const GOVERNOR_VERSION: &str = "v1";
pub const GENESIS_PREV_STATE_HASH: &str = "GENESIS";
pub const HASH_ALGO: &str = "sha256";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetMode {
    Normal,
    Constrained,
    DiagnosticsOnly,
}

impl BudgetMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Constrained => "constrained",
            Self::DiagnosticsOnly => "diagnostics_only",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetDecision {
    pub k_effective: usize,
    pub m_effective: usize,
    pub allow_escalation: bool,
    pub mode: BudgetMode,
    /// Sorted and unique.
    pub decision_reasons: Vec<String>,
    pub governor_version: String,
}

impl BudgetDecision {
    pub fn has_reason(&self, reason: &str) -> bool {
        self.decision_reasons.iter().any(|r| r == reason)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernorConfig {
    pub configured_k: usize,
    pub configured_m: usize,
    pub max_k: usize,
    pub escalation_enabled: bool,
    /// `auto`, `normal`, `constrained` or `diagnostics_only`.
    pub mode: String,
    pub admissible_collapse_runs: u32,
    pub min_m: usize,
    pub diagnostics_k: usize,
    pub pressure_window: usize,
    pub proof_burn_spike_runs: usize,
    pub escalation_cluster_runs: usize,
}

impl GovernorConfig {
    pub fn new(configured_k: usize, configured_m: usize) -> Self {
        Self {
            configured_k: configured_k.max(1),
            configured_m: configured_m.max(1),
            max_k: 9,
            escalation_enabled: true,
            mode: "auto".to_string(),
            admissible_collapse_runs: 3,
            min_m: 1,
            diagnostics_k: 4,
            pressure_window: 6,
            proof_burn_spike_runs: 2,
            escalation_cluster_runs: 2,
        }
    }

    pub fn from_env(configured_k: usize, configured_m: usize) -> Self {
        Self::from_lookup(configured_k, configured_m, |key| std::env::var(key).ok())
    }

    pub fn from_lookup(
        configured_k: usize,
        configured_m: usize,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        Self::new(configured_k, configured_m).with_overrides(lookup)
    }

    /// Replace the fields whose variables are set.
    pub fn with_overrides(self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mode = lookup("SENTIENTOS_GOVERNOR_MODE")
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.mode.clone());
        Self {
            max_k: env_usize(&lookup, "SENTIENTOS_ROUTER_MAX_K", self.max_k).max(1),
            escalation_enabled: lookup("SENTIENTOS_ROUTER_ESCALATE_ON_ALL_FAIL_A")
                .map(|v| flag_enabled(&v))
                .unwrap_or(self.escalation_enabled),
            mode,
            admissible_collapse_runs: env_usize(
                &lookup,
                "SENTIENTOS_GOVERNOR_ADMISSIBLE_COLLAPSE_RUNS",
                self.admissible_collapse_runs as usize,
            )
            .max(1) as u32,
            min_m: env_usize(&lookup, "SENTIENTOS_GOVERNOR_MIN_M", self.min_m).max(1),
            diagnostics_k: env_usize(&lookup, "SENTIENTOS_GOVERNOR_DIAGNOSTICS_K", self.diagnostics_k)
                .max(1),
            ..self
        }
    }

    /// SHA-256 over the canonical JSON form of this config.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_value(self)
            .and_then(|v| serde_json::to_vec(&v))
            .unwrap_or_default();
        sha256_hex(&canonical)
    }
}

/// Identifies the routing run a decision belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    pub pipeline: String,
    pub capability: String,
    pub router_attempt: u32,
}

impl RunContext {
    pub fn new(pipeline: impl Into<String>, capability: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            capability: capability.into(),
            router_attempt: 1,
        }
    }
}

/// One routing outcome in the recent-run window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PressureRun {
    pub pipeline: String,
    pub capability: String,
    pub router_attempt: u32,
    pub router_status: SelectionStatus,
    pub mode: BudgetMode,
    pub proof_burn_spike: bool,
    pub escalated: bool,
    pub stage_b_evaluations: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PressureState {
    pub consecutive_no_admissible: u32,
    pub recent_runs: Vec<PressureRun>,
    #[serde(skip)]
    pub state_hash: Option<String>,
    #[serde(skip)]
    pub prev_state_hash: Option<String>,
}

impl PressureState {
    /// Lenient parse: unreadable runs are dropped, counters clamp at zero.
    fn from_value(value: &Value) -> Self {
        let consecutive_no_admissible = value
            .get("consecutive_no_admissible")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;
        let recent_runs = value
            .get("recent_runs")
            .and_then(Value::as_array)
            .map(|runs| {
                runs.iter()
                    .filter_map(|r| serde_json::from_value(r.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        Self {
            consecutive_no_admissible,
            recent_runs,
            state_hash: None,
            prev_state_hash: None,
        }
    }

    fn window(&self, size: usize) -> &[PressureRun] {
        let start = self.recent_runs.len().saturating_sub(size);
        &self.recent_runs[start..]
    }
}

pub fn decide_budget(
    config: &GovernorConfig,
    pressure: &PressureState,
    run_context: &RunContext,
) -> BudgetDecision {
    let mut reasons = BTreeSet::new();
    let mut k_effective = config.configured_k;
    let mut m_effective = config.configured_m;
    let mut allow_escalation = config.escalation_enabled;
    let mut mode = BudgetMode::Normal;

    let recent = pressure.window(config.pressure_window);
    let burn_spikes = recent.iter().filter(|r| r.proof_burn_spike).count();
    let escalations = recent.iter().filter(|r| r.escalated).count();

    let mut proof_burn_spike = burn_spikes >= config.proof_burn_spike_runs;
    let escalation_cluster = escalations >= config.escalation_cluster_runs;
    let mut admissible_collapse =
        pressure.consecutive_no_admissible >= config.admissible_collapse_runs;

    match config.mode.trim().to_lowercase().as_str() {
        "diagnostics_only" => {
            admissible_collapse = true;
            reasons.insert("forced_mode");
        }
        "constrained" => {
            proof_burn_spike = true;
            reasons.insert("forced_mode");
        }
        "auto" | "normal" | "" => {}
        other => {
            tracing::warn!("Unknown governor mode {:?}, using auto", other);
            reasons.insert("invalid_mode_fallback");
        }
    }

    if proof_burn_spike {
        m_effective = config.min_m.max(config.configured_m.saturating_sub(1));
        allow_escalation = false;
        mode = BudgetMode::Constrained;
        reasons.insert("proof_burn_spike");
    }

    if escalation_cluster {
        k_effective = k_effective.min(3);
        allow_escalation = false;
        if mode == BudgetMode::Normal {
            mode = BudgetMode::Constrained;
        }
        reasons.insert("escalation_cluster");
    }

    if admissible_collapse {
        k_effective = k_effective.max(config.max_k.min(config.diagnostics_k));
        m_effective = 0;
        allow_escalation = false;
        mode = BudgetMode::DiagnosticsOnly;
        reasons.insert("admissible_collapse");
    }

    let decision = BudgetDecision {
        k_effective: k_effective.min(config.max_k).max(1),
        m_effective,
        allow_escalation,
        mode,
        decision_reasons: reasons.into_iter().map(str::to_string).collect(),
        governor_version: GOVERNOR_VERSION.to_string(),
    };
    tracing::debug!(
        capability = %run_context.capability,
        mode = decision.mode.as_str(),
        k = decision.k_effective,
        m = decision.m_effective,
        "Proof budget decided"
    );
    decision
}

/// Fold one routing outcome into the pressure state.
pub fn update_pressure_state(
    prior: &PressureState,
    decision: &BudgetDecision,
    telemetry: &RouterTelemetry,
    status: SelectionStatus,
    run_context: &RunContext,
    config: &GovernorConfig,
) -> PressureState {
    let consecutive_no_admissible = match status {
        SelectionStatus::Selected => 0,
        SelectionStatus::NoAdmissibleCandidate => prior.consecutive_no_admissible + 1,
    };
    let mut recent_runs = prior
        .window(config.pressure_window.saturating_sub(1))
        .to_vec();
    recent_runs.push(PressureRun {
        pipeline: run_context.pipeline.clone(),
        capability: run_context.capability.clone(),
        router_attempt: run_context.router_attempt,
        router_status: status,
        mode: decision.mode,
        proof_burn_spike: decision.has_reason("proof_burn_spike"),
        escalated: telemetry.escalated,
        stage_b_evaluations: telemetry.stage_b_evaluations,
    });
    PressureState {
        consecutive_no_admissible,
        recent_runs,
        state_hash: None,
        prev_state_hash: None,
    }
}

/// Hashes of one pressure-state save.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PressureWrite {
    pub prev_hash: Option<String>,
    pub new_hash: String,
}

/// Pressure state persisted as a hash-chained JSON document.
pub struct PressureStore {
    path: PathBuf,
}

impl PressureStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or malformed files load as an empty state.
    pub fn load(&self) -> PressureState {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return PressureState::default(),
        };
        let doc: Value = match serde_json::from_str(&raw) {
            Ok(doc @ Value::Object(_)) => doc,
            Ok(_) | Err(_) => {
                tracing::warn!("Malformed pressure state at {}, starting fresh", self.path.display());
                return PressureState::default();
            }
        };
        match doc.get("state") {
            Some(state @ Value::Object(_)) => {
                let mut parsed = PressureState::from_value(state);
                parsed.state_hash = non_empty(doc.get("state_hash"));
                parsed.prev_state_hash = non_empty(doc.get("prev_state_hash"));
                parsed
            }
            _ => PressureState::from_value(&doc),
        }
    }

    /// Write `state`, chaining its hash to the previously stored one.
    pub fn save(&self, state: &mut PressureState, at: DateTime<Utc>) -> Result<PressureWrite> {
        let prior = self.load();
        let prev_hash = prior.state_hash;
        let mut document = json!({
            "state": state,
            "hash_algo": HASH_ALGO,
            "prev_state_hash": prev_hash.as_deref().unwrap_or(GENESIS_PREV_STATE_HASH),
            "governor_version": GOVERNOR_VERSION,
            "created_at": at,
        });
        let new_hash = state_hash(&document, prev_hash.as_deref())?;
        document["state_hash"] = Value::String(new_hash.clone());
        write_json_atomic(&self.path, &document)?;

        state.state_hash = Some(new_hash.clone());
        state.prev_state_hash = prev_hash.clone();
        Ok(PressureWrite { prev_hash, new_hash })
    }

    /// Clear the failure counter and run window. The reset is itself a link
    /// in the hash chain.
    pub fn reset(&self, at: DateTime<Utc>) -> Result<PressureWrite> {
        let mut cleared = PressureState::default();
        self.save(&mut cleared, at)
    }
}

fn non_empty(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// SHA-256 over `prev_marker \n canonical_json(document without state_hash)`.
pub fn state_hash(document: &Value, prev_hash: Option<&str>) -> Result<String> {
    let mut material = document.clone();
    if let Value::Object(map) = &mut material {
        map.remove("state_hash");
    }
    let mut bytes = prev_hash.unwrap_or(GENESIS_PREV_STATE_HASH).as_bytes().to_vec();
    bytes.push(b'\n');
    bytes.extend(serde_json::to_vec(&material)?);
    Ok(sha256_hex(&bytes))
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    digest::digest(&digest::SHA256, bytes)
        .as_ref()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Audit payload for the `proof_budget_governor` log line.
pub fn governor_event(
    decision: &BudgetDecision,
    config: &GovernorConfig,
    run_context: &RunContext,
    telemetry: &RouterTelemetry,
    write: Option<&PressureWrite>,
) -> Value {
    json!({
        "event_type": "proof_budget_governor",
        "pipeline": run_context.pipeline,
        "capability": run_context.capability,
        "router_attempt": run_context.router_attempt,
        "governor": {
            "mode": decision.mode,
            "k_effective": decision.k_effective,
            "m_effective": decision.m_effective,
            "allow_escalation": decision.allow_escalation,
            "reasons": decision.decision_reasons,
            "governor_version": decision.governor_version,
            "config_fingerprint": config.fingerprint(),
            "pressure_state_prev_hash": write.and_then(|w| w.prev_hash.clone()),
            "pressure_state_new_hash": write.map(|w| w.new_hash.clone()),
            "state_update_skipped": write.is_none(),
        },
        "router_telemetry": telemetry,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(spike: bool, escalated: bool) -> PressureRun {
        PressureRun {
            pipeline: "codex".into(),
            capability: "spec-a".into(),
            router_attempt: 1,
            router_status: SelectionStatus::Selected,
            mode: BudgetMode::Normal,
            proof_burn_spike: spike,
            escalated,
            stage_b_evaluations: 2,
        }
    }

    #[test]
    fn sha256_of_empty_input() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn window_keeps_tail() {
        let state = PressureState {
            recent_runs: vec![run(true, false), run(false, true), run(false, false)],
            ..Default::default()
        };
        assert_eq!(state.window(2).len(), 2);
        assert!(state.window(2)[0].escalated);
        assert_eq!(state.window(10).len(), 3);
    }

    #[test]
    fn escalation_cluster_caps_k() {
        let config = GovernorConfig::new(6, 2);
        let state = PressureState {
            recent_runs: vec![run(false, true), run(false, true)],
            ..Default::default()
        };
        let d = decide_budget(&config, &state, &RunContext::new("codex", "s"));
        assert_eq!(d.k_effective, 3);
        assert!(!d.allow_escalation);
        assert_eq!(d.mode, BudgetMode::Constrained);
        assert_eq!(d.decision_reasons, vec!["escalation_cluster"]);
    }

    #[test]
    fn fingerprint_is_stable_and_config_sensitive() {
        let a = GovernorConfig::new(3, 2);
        assert_eq!(a.fingerprint(), GovernorConfig::new(3, 2).fingerprint());
        assert_ne!(a.fingerprint(), GovernorConfig::new(4, 2).fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }
}
