//! Repository content validation.
//!
//! Extends the structural registry checks with content checks over the
//! primitives schemas, contracts and event logs. Every problem is rendered
//! as a `CODE: detail` line; the final list is sorted.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

use crate::error::StewardError;
use crate::globs;
use crate::registry::{Registry, System};
use crate::timeutil::parse_iso_utc;

pub const VALIDATE_SCHEMA_VERSION: &str = "1.0";

/// Outcome of `validate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub schema_version: String,
    pub command: String,
    pub registry: String,
    pub ok: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn new(registry: &Path, mut errors: Vec<String>) -> Self {
        errors.sort();
        Self {
            schema_version: VALIDATE_SCHEMA_VERSION.to_string(),
            command: "validate".to_string(),
            registry: registry.display().to_string(),
            ok: errors.is_empty(),
            errors,
        }
    }

    pub fn status_line(&self) -> String {
        if self.ok {
            "VALIDATE_OK".to_string()
        } else {
            format!("VALIDATE_FAILED ({} error(s))", self.errors.len())
        }
    }
}

fn err(code: &str, detail: impl std::fmt::Display) -> String {
    format!("{code}: {detail}")
}

/// Validate the registry at `registry_path` and the repository content it
/// points to.
///
/// Structural registry failures are reported without content checks of
/// systems, since the system list is not trustworthy.
pub fn validate_repo(registry_path: &Path) -> Result<ValidationReport, StewardError> {
    let root = globs::registry_root(registry_path);
    let mut errors = check_schemas(&root.join("data").join("primitives").join("schemas"));

    let registry = match Registry::load(registry_path) {
        Ok(registry) => registry,
        Err(e @ StewardError::Registry { .. }) => {
            errors.extend(e.registry_lines());
            return Ok(ValidationReport::new(registry_path, errors));
        }
        Err(e) => return Err(e),
    };

    for system in registry.sorted_systems() {
        check_system(&registry, system, &mut errors);
    }
    Ok(ValidationReport::new(registry_path, errors))
}

fn check_schemas(dir: &Path) -> Vec<String> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file() && p.extension().map_or(false, |ext| ext == "json"))
                .collect()
        })
        .unwrap_or_default();
    files.sort();

    if files.is_empty() {
        return vec![err(
            "SCHEMA_MISSING_TYPE",
            format!("no schema files found under {}", dir.display()),
        )];
    }

    let mut errors = Vec::new();
    for path in files {
        match read_json(&path) {
            Err(detail) => errors.push(err("SCHEMA_PARSE_ERROR", format!("{}: {detail}", path.display()))),
            Ok(Value::Object(obj)) => {
                if !obj.contains_key("type") {
                    errors.push(err("SCHEMA_MISSING_TYPE", path.display()));
                }
            }
            Ok(_) => errors.push(err(
                "SCHEMA_PARSE_ERROR",
                format!("{}: schema must be JSON object", path.display()),
            )),
        }
    }
    errors
}

fn read_json(path: &Path) -> Result<Value, String> {
    let text = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&text).map_err(|e| e.to_string())
}

fn glob_or_report(
    registry: &Registry,
    system: &System,
    field: &str,
    pattern: &str,
    errors: &mut Vec<String>,
) -> Vec<PathBuf> {
    match globs::iter_glob(pattern, registry.path()) {
        Ok(paths) if !paths.is_empty() => paths,
        Ok(_) => {
            errors.push(err(
                "GLOB_NO_MATCH",
                format!("{}: {field} -> {pattern}", system.system_id),
            ));
            Vec::new()
        }
        Err(e) => {
            errors.push(err(
                "GLOB_NO_MATCH",
                format!("{}: {field} -> {pattern}: {e}", system.system_id),
            ));
            Vec::new()
        }
    }
}

fn check_system(registry: &Registry, system: &System, errors: &mut Vec<String>) {
    let contracts = glob_or_report(registry, system, "contracts_glob", &system.contracts_glob, errors);
    let events = glob_or_report(registry, system, "events_glob", &system.events_glob, errors);

    for path in contracts {
        check_contract(&path, errors);
    }
    for path in events {
        check_events(system, &path, errors);
    }
}

fn check_contract(path: &Path, errors: &mut Vec<String>) {
    let shown = path.display();
    let obj = match read_json(path) {
        Ok(Value::Object(obj)) => obj,
        Ok(_) => {
            errors.push(err("CONTRACT_PARSE_ERROR", format!("{shown}: contract must be JSON object")));
            return;
        }
        Err(detail) => {
            errors.push(err("CONTRACT_PARSE_ERROR", format!("{shown}: {detail}")));
            return;
        }
    };

    for key in ["contract_id", "system_id", "name"] {
        let present = match obj.get(key) {
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(Value::Null) | None => false,
            Some(_) => true,
        };
        if !present {
            errors.push(err("CONTRACT_MISSING_FIELD", format!("{shown}: {key}")));
        }
    }
    for key in ["primitives_used", "invariants"] {
        if !obj.get(key).map_or(false, Value::is_array) {
            errors.push(err("CONTRACT_MISSING_FIELD", format!("{shown}: {key}")));
        }
    }
}

fn check_events(system: &System, path: &Path, errors: &mut Vec<String>) {
    let shown = path.display();
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            errors.push(err("GLOB_NO_MATCH", format!("{}: {shown}: {e}", system.system_id)));
            return;
        }
    };
    for (idx, line) in text.lines().enumerate() {
        let lineno = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        let row: Value = match serde_json::from_str(line) {
            Ok(row) => row,
            Err(e) => {
                errors.push(err("EVENT_PARSE_ERROR", format!("{shown}:{lineno}: {e}")));
                continue;
            }
        };
        let Some(obj) = row.as_object() else {
            errors.push(err("EVENT_PARSE_ERROR", format!("{shown}:{lineno}: event must be JSON object")));
            continue;
        };
        let ts = match obj.get("ts") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        };
        match ts {
            None => errors.push(err("EVENT_TS_MISSING", format!("{shown}:{lineno}"))),
            Some(ts) if parse_iso_utc(&ts).is_none() => {
                errors.push(err("EVENT_TS_UNPARSABLE", format!("{shown}:{lineno}: {ts}")))
            }
            Some(_) => {}
        }
    }
}
