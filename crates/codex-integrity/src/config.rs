//! Vow configuration (`vow/config.yaml`).
//!
//! Only the `proof_verification` section is read. A missing or malformed file
//! leaves verification enabled and failing on invalid proofs.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VowConfig {
    pub proof_verification: ProofVerificationConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProofVerificationConfig {
    /// Run the proof verifier during integrity evaluation.
    pub enabled: bool,
    /// Turn failed invariants into `proof_invalid` violations.
    pub fail_on_invalid: bool,
}

impl Default for ProofVerificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fail_on_invalid: true,
        }
    }
}

impl VowConfig {
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_yaml::from_str::<Option<Self>>(&content) {
                Ok(config) => {
                    tracing::info!("Loaded vow config from {}", path.display());
                    config.unwrap_or_default()
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}, using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::debug!("No vow config at {}, using defaults", path.display());
                Self::default()
            }
        }
    }
}
