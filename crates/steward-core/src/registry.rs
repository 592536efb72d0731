//! System registry loading and structural validation.
//!
//! A registry is accepted as a whole or rejected as a whole: every
//! structural defect is collected, sorted and returned together as
//! [`StewardError::Registry`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RegistryError, Result, StewardError};
use crate::globs;

// ---------------------------------------------------------------------------
// Tier
// ---------------------------------------------------------------------------

/// Severity class of a system.
///
/// Variants are declared alphabetically so the derived `Ord` matches the
/// order of their serialized names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Dev,
    Prod,
    Sample,
    Staging,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Prod, Tier::Staging, Tier::Dev, Tier::Sample];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Prod => "prod",
            Tier::Staging => "staging",
            Tier::Dev => "dev",
            Tier::Sample => "sample",
        }
    }

    pub fn parse(value: &str) -> Option<Tier> {
        match value {
            "prod" => Some(Tier::Prod),
            "staging" => Some(Tier::Staging),
            "dev" => Some(Tier::Dev),
            "sample" => Some(Tier::Sample),
            _ => None,
        }
    }

    /// Weight used when ordering impacted systems (higher is more severe).
    pub fn impact_weight(&self) -> u8 {
        match self {
            Tier::Prod => 3,
            Tier::Staging => 2,
            Tier::Dev => 1,
            Tier::Sample => 0,
        }
    }

    /// Weight used by the blast-radius risk score.
    pub fn risk_weight(&self) -> f64 {
        match self {
            Tier::Prod => 4.0,
            Tier::Staging => 3.0,
            Tier::Dev => 2.0,
            Tier::Sample => 1.0,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

/// A registered sub-project. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct System {
    pub system_id: String,
    pub contracts_glob: String,
    pub events_glob: String,
    pub is_sample: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub tier: Tier,
    pub depends_on: Vec<String>,
    pub owners: Vec<String>,
}

/// Row shape accepted from disk before validation.
#[derive(Debug, Deserialize)]
struct RawSystem {
    #[serde(default)]
    system_id: Option<String>,
    #[serde(default)]
    contracts_glob: Option<String>,
    #[serde(default)]
    events_glob: Option<String>,
    #[serde(default)]
    is_sample: Option<bool>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    tier: Option<String>,
    #[serde(default)]
    depends_on: Option<Value>,
    #[serde(default)]
    owners: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// The validated set of systems for one repository.
#[derive(Debug, Clone)]
pub struct Registry {
    path: PathBuf,
    systems: Vec<System>,
}

impl Registry {
    /// Read and validate the registry at `path`.
    pub fn load(path: &Path) -> Result<Registry> {
        let display = path.display().to_string();
        if !path.is_file() {
            return Err(StewardError::Registry {
                errors: vec![RegistryError::Missing { path: display }],
            });
        }
        let text = std::fs::read_to_string(path)?;
        let payload: Value = serde_json::from_str(&text).map_err(|e| StewardError::Registry {
            errors: vec![RegistryError::Parse {
                path: display,
                detail: e.to_string(),
            }],
        })?;
        Self::from_value(path, &payload)
    }

    /// Validate an already-decoded payload.
    pub fn from_value(path: &Path, payload: &Value) -> Result<Registry> {
        let rows = match payload {
            Value::Array(rows) => rows.as_slice(),
            Value::Object(obj) => match obj.get("systems") {
                Some(Value::Array(rows)) => rows.as_slice(),
                _ => {
                    return Err(StewardError::Registry {
                        errors: vec![RegistryError::SchemaInvalid {
                            detail: format!(
                                "{}: registry payload must be a list or object with 'systems' list",
                                path.display()
                            ),
                        }],
                    })
                }
            },
            _ => {
                return Err(StewardError::Registry {
                    errors: vec![RegistryError::SchemaInvalid {
                        detail: format!(
                            "{}: registry payload must be a list or object with 'systems' list",
                            path.display()
                        ),
                    }],
                })
            }
        };

        let mut errors: Vec<RegistryError> = Vec::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut systems: Vec<System> = Vec::new();

        for (idx, row) in rows.iter().enumerate() {
            let raw: RawSystem = match serde_json::from_value(row.clone()) {
                Ok(raw) => raw,
                Err(e) => {
                    errors.push(RegistryError::SchemaInvalid {
                        detail: format!("row[{idx}]: {e}"),
                    });
                    continue;
                }
            };
            match parse_row(idx, raw, &mut errors) {
                Some(system) => {
                    if !seen.insert(system.system_id.clone()) {
                        errors.push(RegistryError::DuplicateSystemId {
                            system_id: system.system_id.clone(),
                        });
                        continue;
                    }
                    systems.push(system);
                }
                None => continue,
            }
        }

        check_references(&systems, &mut errors);

        if errors.is_empty() {
            Ok(Registry {
                path: path.to_path_buf(),
                systems,
            })
        } else {
            errors.sort_by_key(|e| e.to_string());
            Err(StewardError::Registry { errors })
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Systems in registry file order.
    pub fn systems(&self) -> &[System] {
        &self.systems
    }

    /// Systems ordered by `system_id`.
    pub fn sorted_systems(&self) -> Vec<&System> {
        let mut out: Vec<&System> = self.systems.iter().collect();
        out.sort_by(|a, b| a.system_id.cmp(&b.system_id));
        out
    }

    pub fn get(&self, system_id: &str) -> Option<&System> {
        self.systems.iter().find(|s| s.system_id == system_id)
    }

    /// Directory that owns this registry (repository root for the default layout).
    pub fn root(&self) -> PathBuf {
        globs::registry_root(&self.path)
    }
}

fn parse_row(idx: usize, raw: RawSystem, errors: &mut Vec<RegistryError>) -> Option<System> {
    let system_id = raw.system_id.as_deref().map(str::trim).unwrap_or_default();
    if system_id.is_empty() {
        errors.push(RegistryError::SchemaInvalid {
            detail: format!("row[{idx}] missing system_id"),
        });
        return None;
    }
    let system_id = system_id.to_string();

    let contracts_glob = raw.contracts_glob.unwrap_or_default().trim().to_string();
    let events_glob = raw.events_glob.unwrap_or_default().trim().to_string();
    if contracts_glob.is_empty() {
        errors.push(RegistryError::SchemaInvalid {
            detail: format!("{system_id} missing contracts_glob"),
        });
    }
    if events_glob.is_empty() {
        errors.push(RegistryError::SchemaInvalid {
            detail: format!("{system_id} missing events_glob"),
        });
    }

    let tier_raw = raw.tier.unwrap_or_default().trim().to_string();
    let tier = if tier_raw.is_empty() {
        Tier::Prod
    } else {
        match Tier::parse(&tier_raw) {
            Some(t) => t,
            None => {
                errors.push(RegistryError::TierInvalid {
                    system_id: system_id.clone(),
                    tier: tier_raw,
                });
                Tier::Prod
            }
        }
    };

    let depends_on = match raw.depends_on {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => {
            let mut deps: Vec<String> = Vec::new();
            let mut non_string = false;
            for item in items {
                match item {
                    Value::String(s) => {
                        let s = s.trim();
                        if !s.is_empty() && !deps.iter().any(|d| d == s) {
                            deps.push(s.to_string());
                        }
                    }
                    _ => non_string = true,
                }
            }
            if non_string {
                errors.push(RegistryError::DependencyInvalid {
                    system_id: system_id.clone(),
                });
            }
            deps
        }
        Some(_) => {
            errors.push(RegistryError::DependencyInvalid {
                system_id: system_id.clone(),
            });
            Vec::new()
        }
    };

    let mut owners: Vec<String> = raw
        .owners
        .unwrap_or_default()
        .into_iter()
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty())
        .collect();
    owners.sort();
    owners.dedup();

    // Rows with field errors still take part in duplicate detection.
    Some(System {
        system_id,
        contracts_glob,
        events_glob,
        is_sample: raw.is_sample.unwrap_or(false),
        notes: raw.notes,
        tier,
        depends_on,
        owners,
    })
}

fn check_references(systems: &[System], errors: &mut Vec<RegistryError>) {
    let known: BTreeSet<&str> = systems.iter().map(|s| s.system_id.as_str()).collect();

    let mut adjacency: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for system in systems {
        let deps: BTreeSet<&String> = system.depends_on.iter().collect();
        for dep in &deps {
            if !known.contains(dep.as_str()) {
                errors.push(RegistryError::DependencyMissing {
                    system_id: system.system_id.clone(),
                    dependency: (*dep).clone(),
                });
            }
        }
        adjacency.insert(
            system.system_id.clone(),
            deps.into_iter()
                .filter(|d| known.contains(d.as_str()))
                .cloned()
                .collect(),
        );
    }

    if let Some(path) = first_cycle(&adjacency) {
        errors.push(RegistryError::CycleDetected { path });
    }
}

// ---------------------------------------------------------------------------
// Cycle detection
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

/// Find the first cycle using a three-colour DFS.
///
/// Roots are visited in ascending order and each adjacency list is walked in
/// its stored (sorted) order, so the reported path is stable. The returned
/// path starts and ends with the same node, e.g. `["a", "b", "a"]`.
pub fn first_cycle(adjacency: &BTreeMap<String, Vec<String>>) -> Option<Vec<String>> {
    let mut state: BTreeMap<&str, Visit> = BTreeMap::new();
    let mut stack: Vec<&str> = Vec::new();

    for root in adjacency.keys() {
        if state.contains_key(root.as_str()) {
            continue;
        }
        if let Some(cycle) = visit(root, adjacency, &mut state, &mut stack) {
            return Some(cycle);
        }
    }
    None
}

fn visit<'a>(
    node: &'a str,
    adjacency: &'a BTreeMap<String, Vec<String>>,
    state: &mut BTreeMap<&'a str, Visit>,
    stack: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    state.insert(node, Visit::InProgress);
    stack.push(node);

    if let Some(next) = adjacency.get(node) {
        for nxt in next {
            match state.get(nxt.as_str()) {
                None => {
                    if let Some(cycle) = visit(nxt, adjacency, state, stack) {
                        return Some(cycle);
                    }
                }
                Some(Visit::InProgress) => {
                    let start = stack.iter().position(|n| *n == nxt.as_str()).unwrap_or(0);
                    let mut path: Vec<String> =
                        stack[start..].iter().map(|s| s.to_string()).collect();
                    path.push(nxt.clone());
                    return Some(path);
                }
                Some(Visit::Done) => {}
            }
        }
    }

    stack.pop();
    state.insert(node, Visit::Done);
    None
}
