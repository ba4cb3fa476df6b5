//! Invariant catalogue: flat records loaded from `vow/invariants.yaml`.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Catalogue shipped with the crate, used when no override file exists.
pub const BUILTIN_CATALOGUE: &str = include_str!("../vow/invariants.yaml");

/// One declarative invariant. Evaluation is keyed on `name`; the other
/// fields are carried into reports verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvariantSpec {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub rule: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_hint: Option<String>,
}

fn default_name() -> String {
    "invariant".to_string()
}

#[derive(Deserialize)]
struct CatalogueDocument {
    invariants: Option<Vec<serde_yaml::Value>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Catalogue {
    entries: Vec<InvariantSpec>,
}

impl Catalogue {
    pub fn new(entries: Vec<InvariantSpec>) -> Self {
        Self { entries }
    }

    pub fn builtin() -> Self {
        Self::parse(BUILTIN_CATALOGUE)
    }

    /// Load from `path`. A missing or unreadable file yields the built-in catalogue.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => {
                let catalogue = Self::parse(&raw);
                tracing::info!(
                    "Loaded {} invariants from {}",
                    catalogue.len(),
                    path.display()
                );
                catalogue
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No invariant catalogue at {}, using built-in", path.display());
                Self::builtin()
            }
            Err(e) => {
                tracing::warn!("Failed to read {}: {}, using built-in", path.display(), e);
                Self::builtin()
            }
        }
    }

    /// Parse a catalogue document. Falls back to the flat record reader when
    /// the YAML is malformed or carries no `invariants` key.
    pub fn parse(raw: &str) -> Self {
        let invariants = match serde_yaml::from_str::<CatalogueDocument>(raw) {
            Ok(CatalogueDocument {
                invariants: Some(items),
            }) => items,
            _ => return Self::new(parse_flat(raw)),
        };
        let entries = invariants
            .into_iter()
            .filter(|item| item.is_mapping())
            .filter_map(|item| match serde_yaml::from_value::<InvariantSpec>(item) {
                Ok(spec) => Some(spec),
                Err(e) => {
                    tracing::warn!("Skipping malformed invariant entry: {}", e);
                    None
                }
            })
            .collect();
        Self::new(entries)
    }

    pub fn entries(&self) -> &[InvariantSpec] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Line-oriented reader for `- key: value` records. Comments, blank lines and
/// the `invariants:` header are skipped; surrounding double quotes are trimmed.
fn parse_flat(raw: &str) -> Vec<InvariantSpec> {
    let mut records: Vec<Vec<(String, String)>> = Vec::new();
    let mut current: Option<Vec<(String, String)>> = None;

    for line in raw.lines() {
        let mut stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') || stripped.starts_with("invariants") {
            continue;
        }
        if let Some(rest) = stripped.strip_prefix('-') {
            if let Some(done) = current.take() {
                records.push(done);
            }
            current = Some(Vec::new());
            stripped = rest.trim();
            if stripped.is_empty() {
                continue;
            }
        }
        let Some(record) = current.as_mut() else {
            continue;
        };
        let (key, value) = stripped.split_once(':').unwrap_or((stripped, ""));
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        record.push((key.to_string(), unquote(value)));
    }
    if let Some(done) = current {
        records.push(done);
    }

    records
        .into_iter()
        .filter(|r| !r.is_empty())
        .map(|record| {
            let mut spec = InvariantSpec {
                name: default_name(),
                rule: String::new(),
                description: String::new(),
                severity: None,
                proof_hint: None,
            };
            for (key, value) in record {
                match key.as_str() {
                    "name" => spec.name = value,
                    "rule" => spec.rule = value,
                    "description" => spec.description = value,
                    "severity" => spec.severity = Some(value).filter(|v| !v.is_empty()),
                    "proof_hint" => spec.proof_hint = Some(value).filter(|v| !v.is_empty()),
                    _ => {}
                }
            }
            spec
        })
        .collect()
}

fn unquote(value: &str) -> String {
    let text = value.trim();
    text.strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text)
        .to_string()
}
