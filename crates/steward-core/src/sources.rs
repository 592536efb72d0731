//! File-resident discipline inputs: contracts, events and the primitives
//! catalog.
//!
//! Loading is tolerant: unreadable files and malformed rows are skipped here
//! and reported by [`crate::validate`] instead. Events are loaded without an
//! `as_of` cutoff; visibility is applied by the scorer so the same inputs can
//! be evaluated at several instants.

use std::path::Path;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::globs;
use crate::registry::{Registry, System};
use crate::timeutil::parse_iso_utc;

/// Declared discipline artifact of a system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    #[serde(default)]
    pub contract_id: String,
    #[serde(default)]
    pub system_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "list_or_empty")]
    pub primitives_used: Vec<Value>,
    #[serde(default, deserialize_with = "list_or_empty")]
    pub invariants: Vec<Value>,
}

fn list_or_empty<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items,
        _ => Vec::new(),
    })
}

/// Timestamped discipline signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub ts: DateTime<Utc>,
    pub system_id: Option<String>,
    pub event_type: Option<String>,
}

impl Event {
    pub fn new(ts: DateTime<Utc>) -> Self {
        Self {
            ts,
            system_id: None,
            event_type: None,
        }
    }

    /// Decode one JSONL row; rows without a parseable `ts` are rejected.
    pub fn from_value(row: &Value) -> Option<Event> {
        let obj = row.as_object()?;
        let ts = parse_iso_utc(obj.get("ts")?.as_str()?)?;
        let text = |key: &str| {
            obj.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Some(Event {
            ts,
            system_id: text("system_id"),
            event_type: text("event_type"),
        })
    }
}

/// Repository-wide primitives catalog counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PrimitivesCatalog {
    pub schema_count: usize,
    pub invariant_count: usize,
}

impl PrimitivesCatalog {
    /// Count `data/primitives/schemas/*.json` and the `- id:` entries of
    /// `data/primitives/invariants.yaml` under `root`.
    pub fn load(root: &Path) -> Self {
        let primitives = root.join("data").join("primitives");
        let schema_count = std::fs::read_dir(primitives.join("schemas"))
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
                    .count()
            })
            .unwrap_or(0);
        let invariant_count = std::fs::read_to_string(primitives.join("invariants.yaml"))
            .map(|text| count_invariant_ids(&text))
            .unwrap_or(0);
        Self {
            schema_count,
            invariant_count,
        }
    }
}

fn count_invariant_ids(text: &str) -> usize {
    match Regex::new(r"^\s*-\s+id:") {
        Ok(re) => text.lines().filter(|line| re.is_match(line)).count(),
        Err(_) => 0,
    }
}

/// Contracts and events belonging to one system.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemInputs {
    pub contracts: Vec<Contract>,
    pub events: Vec<Event>,
}

impl SystemInputs {
    /// Load a system's contracts (ordered by `contract_id`) and events
    /// (ordered by `ts`).
    pub fn load(registry: &Registry, system: &System) -> Self {
        Self {
            contracts: load_contracts(registry.path(), system),
            events: load_events(registry.path(), system),
        }
    }

    /// Latest event at or before `as_of`.
    pub fn last_event_at(&self, as_of: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.events
            .iter()
            .filter(|e| e.ts <= as_of)
            .map(|e| e.ts)
            .max()
    }
}

fn load_contracts(registry_path: &Path, system: &System) -> Vec<Contract> {
    let paths = globs::iter_glob(&system.contracts_glob, registry_path).unwrap_or_default();
    let mut out: Vec<Contract> = Vec::new();
    for path in paths {
        let Ok(text) = std::fs::read_to_string(&path) else {
            continue;
        };
        let Ok(contract) = serde_json::from_str::<Contract>(&text) else {
            continue;
        };
        if contract.system_id.trim() == system.system_id {
            out.push(contract);
        }
    }
    out.sort_by(|a, b| a.contract_id.cmp(&b.contract_id));
    out
}

fn load_events(registry_path: &Path, system: &System) -> Vec<Event> {
    let paths = globs::iter_glob(&system.events_glob, registry_path).unwrap_or_default();
    let mut out: Vec<Event> = Vec::new();
    for path in paths {
        let Ok(text) = std::fs::read_to_string(&path) else {
            continue;
        };
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Ok(row) = serde_json::from_str::<Value>(line) else {
                continue;
            };
            let Some(event) = Event::from_value(&row) else {
                continue;
            };
            match event.system_id.as_deref() {
                None => out.push(event),
                Some(sid) if sid == system.system_id => out.push(event),
                Some(_) => {}
            }
        }
    }
    out.sort_by(|a, b| {
        a.ts.cmp(&b.ts)
            .then_with(|| a.event_type.cmp(&b.event_type))
    });
    out
}
