//! Canonical JSON rendering and SHA-256 helpers.
//!
//! Every persisted artifact goes through this module so that object keys are
//! always sorted, independent of struct field order or map type.

use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Recursively rebuild a JSON value with object keys in ascending order.
pub fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.clone(), sort_keys(v));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Serialize to a sorted-key [`Value`].
pub fn to_sorted_value<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    Ok(sort_keys(&serde_json::to_value(value)?))
}

/// Compact single-line JSON with sorted keys (ledger rows, stderr payloads).
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(&to_sorted_value(value)?)?)
}

/// Pretty JSON with sorted keys and a trailing newline (report files, stdout).
pub fn to_sorted_pretty<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let mut out = serde_json::to_string_pretty(&to_sorted_value(value)?)?;
    out.push('\n');
    Ok(out)
}

/// Write `value` as sorted pretty JSON, creating parent directories.
pub fn write_json_file<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, to_sorted_pretty(value)?)?;
    Ok(())
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
