//! File helpers: atomic JSON documents and append-only JSONL streams.
//!
//! Every full-file write goes through a sibling `.tmp` file and a rename so a
//! crash never leaves a half-written document behind.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Write `value` as 2-space indented, key-sorted JSON via temp file + rename.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    // Going through Value sorts struct fields alongside map keys.
    let doc = serde_json::to_value(value)?;
    let json = serde_json::to_string_pretty(&doc)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Append one key-sorted JSON line.
pub fn append_jsonl<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let doc = serde_json::to_value(value)?;
    let mut line = serde_json::to_string(&doc)?;
    line.push('\n');
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

/// Every non-blank line of a JSONL file; a missing file reads as empty.
pub fn read_jsonl(path: &Path) -> Result<Vec<Value>> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut entries = Vec::new();
    for line in data.lines().filter(|l| !l.trim().is_empty()) {
        entries.push(serde_json::from_str(line)?);
    }
    Ok(entries)
}
