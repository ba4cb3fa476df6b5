//! Governance configuration
//!
//! Loaded from `codex.toml` at startup, falling back to defaults if the file
//! is missing or malformed. Environment variables override router, governor
//! and provenance settings after the file is read.

use codex_router::{env_usize, GovernorConfig, RouterConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level governance configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Filesystem root for specs, logs and daemon state.
    pub paths: PathSettings,
    /// Signal thresholds.
    pub amendments: AmendmentSettings,
    /// Candidate routing (k, m, escalation).
    pub router: RouterConfig,
    /// Proof budget governor.
    pub governor: GovernorSettings,
    /// Approval privilege lint.
    pub review: ReviewSettings,
    pub provenance: ProvenanceSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmendmentSettings {
    /// Signals of one type needed before an amendment is drafted.
    pub default_threshold: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorSettings {
    /// `auto`, `normal`, `constrained` or `diagnostics_only`.
    pub mode: String,
    /// Consecutive routing failures before diagnostics-only mode.
    pub admissible_collapse_runs: u32,
    pub min_m: usize,
    /// Lower bound on k while in diagnostics-only mode.
    pub diagnostics_k: usize,
    /// Recent runs considered for spikes and clusters.
    pub pressure_window: usize,
    pub proof_burn_spike_runs: usize,
    pub escalation_cluster_runs: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewSettings {
    /// External privilege lint: program followed by its arguments. Empty
    /// means every approval passes the lint.
    pub lint_command: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvenanceSettings {
    /// Copied into `proposed` audit lines.
    pub run_hash: Option<String>,
}

// ============================================================
// Defaults
// ============================================================

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            paths: PathSettings::default(),
            amendments: AmendmentSettings::default(),
            router: RouterConfig::default(),
            governor: GovernorSettings::default(),
            review: ReviewSettings::default(),
            provenance: ProvenanceSettings::default(),
        }
    }
}

impl Default for PathSettings {
    fn default() -> Self {
        Self { root: PathBuf::from("integration") }
    }
}

impl Default for AmendmentSettings {
    fn default() -> Self {
        Self { default_threshold: 3 }
    }
}

impl Default for GovernorSettings {
    fn default() -> Self {
        let base = GovernorConfig::new(1, 1);
        Self {
            mode: base.mode,
            admissible_collapse_runs: base.admissible_collapse_runs,
            min_m: base.min_m,
            diagnostics_k: base.diagnostics_k,
            pressure_window: base.pressure_window,
            proof_burn_spike_runs: base.proof_burn_spike_runs,
            escalation_cluster_runs: base.escalation_cluster_runs,
        }
    }
}

// ============================================================
// Loading
// ============================================================

impl GovernanceConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}, using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("No config at {}, using defaults", path.display());
                Self::default()
            }
        }
    }

    /// `load` followed by the process environment.
    pub fn load_with_env(path: &Path) -> Self {
        Self::load(path).with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `SENTIENTOS_*` overrides from `lookup`.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        self.router = self.router.with_overrides(&lookup);

        let g = &mut self.governor;
        if let Some(mode) = lookup("SENTIENTOS_GOVERNOR_MODE").filter(|m| !m.is_empty()) {
            g.mode = mode;
        }
        g.admissible_collapse_runs = env_usize(
            &lookup,
            "SENTIENTOS_GOVERNOR_ADMISSIBLE_COLLAPSE_RUNS",
            g.admissible_collapse_runs as usize,
        )
        .max(1) as u32;
        g.min_m = env_usize(&lookup, "SENTIENTOS_GOVERNOR_MIN_M", g.min_m).max(1);
        g.diagnostics_k = env_usize(&lookup, "SENTIENTOS_GOVERNOR_DIAGNOSTICS_K", g.diagnostics_k).max(1);

        if let Some(hash) = lookup("SENTIENTOS_RUN_PROVENANCE_HASH").filter(|h| !h.is_empty()) {
            self.provenance.run_hash = Some(hash);
        }
        self
    }

    /// Governor config for the configured router budget.
    pub fn governor_config(&self) -> GovernorConfig {
        let g = &self.governor;
        GovernorConfig {
            configured_k: self.router.k.max(1),
            configured_m: self.router.m.max(1),
            max_k: self.router.max_k.max(1),
            escalation_enabled: self.router.escalate_on_all_fail_a,
            mode: g.mode.clone(),
            admissible_collapse_runs: g.admissible_collapse_runs.max(1),
            min_m: g.min_m.max(1),
            diagnostics_k: g.diagnostics_k.max(1),
            pressure_window: g.pressure_window.max(1),
            proof_burn_spike_runs: g.proof_burn_spike_runs.max(1),
            escalation_cluster_runs: g.escalation_cluster_runs.max(1),
        }
    }

    /// Write the current config as TOML (for generating a default config file).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}
