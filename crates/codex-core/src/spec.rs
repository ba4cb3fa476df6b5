//! Spec documents and the field conventions every component agrees on.

use serde_json::{Map, Value};

/// A governed spec document. `serde_json::Map` keeps keys sorted, which the
/// on-disk formats rely on.
pub type Spec = Map<String, Value>;

/// Fields every spec must carry.
pub const REQUIRED_FIELDS: [&str; 3] = ["objective", "directives", "testing_requirements"];

/// Ordered list fields that may only grow or be reordered without loss.
pub const LIST_FIELDS: [&str; 2] = ["directives", "testing_requirements"];

/// Keys whose presence marks a ledger requirement.
pub const LEDGER_KEYS: [&str; 3] = ["ledger", "ledger_entry", "ledger_required"];

/// Status values a spec may never transition into.
pub const FORBIDDEN_STATUSES: [&str; 4] = ["reboot", "retired", "nullified", "decommissioned"];

pub fn is_forbidden_status(status: &str) -> bool {
    let normalised = status.trim().to_lowercase();
    FORBIDDEN_STATUSES.contains(&normalised.as_str())
}

/// Truthiness of a JSON value: null, false, zero, "" and empty containers are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Object view of an optional value; anything that is not an object is empty.
pub fn object_of(value: Option<&Value>) -> Spec {
    match value {
        Some(Value::Object(map)) => map.clone(),
        _ => Spec::new(),
    }
}

/// List view of an optional value: arrays as-is, null/absent as empty, scalars
/// as a single-element list.
pub fn list_of(value: Option<&Value>) -> Vec<Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(other) => vec![other.clone()],
    }
}

/// Text view of a spec field, empty when absent. Non-string values render as JSON.
pub fn text_of(spec: &Spec, field: &str) -> String {
    match spec.get(field) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// `vN` -> `vN+1`; anything else restarts at `v2`.
pub fn next_version(current: &str) -> String {
    match current.strip_prefix('v') {
        Some(digits) if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) => {
            match digits.parse::<u64>() {
                Ok(n) => format!("v{}", n + 1),
                Err(_) => "v2".to_string(),
            }
        }
        _ => "v2".to_string(),
    }
}
