//! Amender state: signal thresholds, review preferences, signal history and
//! the open signal buckets, persisted together as `state.json`.

use chrono::{DateTime, Utc};
use codex_core::store::write_json_atomic;
use codex_core::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// One recorded telemetry signal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalEntry {
    pub kind: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

/// Review outcomes for proposals driven by one signal type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preference {
    pub approved: u32,
    pub rejected: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmenderState {
    pub thresholds: BTreeMap<String, u32>,
    pub preferences: BTreeMap<String, Preference>,
    pub signal_history: BTreeMap<String, Vec<SignalEntry>>,
    /// Signals per spec since its last successful draft.
    pub open_buckets: BTreeMap<String, SignalBucket>,
}

impl AmenderState {
    /// Missing or malformed files load as the empty state.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str(&raw) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!("Malformed amender state at {}: {}, starting fresh", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }

    pub fn threshold_for(&self, signal_type: &str, default: u32) -> u32 {
        self.thresholds.get(signal_type).copied().unwrap_or(default)
    }

    /// Reinforce when approvals for the signal outnumber rejections.
    pub fn favours(&self, signal_type: &str) -> bool {
        self.preferences
            .get(signal_type)
            .map_or(false, |p| p.approved > p.rejected)
    }
}

/// Signals accumulated for one spec since its last draft.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalBucket {
    pub signals: Vec<SignalEntry>,
    pub counts: BTreeMap<String, u32>,
}

impl SignalBucket {
    /// Add a signal and return the new count for its kind.
    pub fn push(&mut self, entry: SignalEntry) -> u32 {
        let count = self.counts.entry(entry.kind.clone()).or_insert(0);
        *count += 1;
        let current = *count;
        self.signals.push(entry);
        current
    }
}
