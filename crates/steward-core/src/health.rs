//! Pure health scorer.
//!
//! [`score_system`] takes already-loaded contracts and events plus an explicit
//! `as_of` instant. It never reads files or the clock, so two calls with the
//! same inputs and `as_of` always agree.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::sources::{Contract, Event, PrimitivesCatalog};

/// Minimum entries a contract must declare in each list.
pub const MIN_CONTRACT_ENTRIES: usize = 3;
/// Trailing window within which a system must have emitted an event.
pub const RECENT_WINDOW_DAYS: i64 = 14;
/// Points removed per violated rule.
pub const VIOLATION_PENALTY: f64 = 25.0;
/// Ceiling applied to any system with at least one violation.
pub const VIOLATION_CLAMP: f64 = 69.0;

pub const YELLOW_THRESHOLD: f64 = 70.0;
pub const GREEN_THRESHOLD: f64 = 85.0;

// ---------------------------------------------------------------------------
// Status and violations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Green,
    Yellow,
    Red,
}

impl HealthStatus {
    pub fn from_score(score_total: f64) -> Self {
        if score_total >= GREEN_THRESHOLD {
            HealthStatus::Green
        } else if score_total >= YELLOW_THRESHOLD {
            HealthStatus::Yellow
        } else {
            HealthStatus::Red
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Green => "green",
            HealthStatus::Yellow => "yellow",
            HealthStatus::Red => "red",
        }
    }

    /// Badness rank of a serialized status: green 0, yellow 1, red 2.
    pub fn severity_of(status: &str) -> Option<u8> {
        match status {
            "green" => Some(0),
            "yellow" => Some(1),
            "red" => Some(2),
            _ => None,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discipline rule codes, declared in the order of their names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationCode {
    EventsRecent,
    InvariantsMin,
    PrimitivesMin,
}

impl ViolationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationCode::EventsRecent => "EVENTS_RECENT",
            ViolationCode::InvariantsMin => "INVARIANTS_MIN",
            ViolationCode::PrimitivesMin => "PRIMITIVES_MIN",
        }
    }

    /// Contract-shape violations, surfaced as `NEW_HIGH_VIOLATION` actions.
    pub fn is_high(code: &str) -> bool {
        code == "PRIMITIVES_MIN" || code == "INVARIANTS_MIN"
    }
}

impl fmt::Display for ViolationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthCounts {
    pub contracts: usize,
    pub events: usize,
    pub schemas: usize,
    pub invariants: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ComponentScores {
    pub contracts: f64,
    pub events: f64,
    pub primitives: f64,
}

/// Health of one system at one evaluation instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthResult {
    pub system_id: String,
    pub score_total: f64,
    pub status: HealthStatus,
    pub violations: BTreeSet<ViolationCode>,
    pub counts: HealthCounts,
    pub scores: ComponentScores,
}

impl HealthResult {
    pub fn violation_names(&self) -> Vec<String> {
        self.violations.iter().map(|v| v.as_str().to_string()).collect()
    }
}

/// Round half away from zero to two decimals.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Violated rules for a system's contracts and visible events.
///
/// A system with no contracts violates both contract rules.
pub fn discipline_violations(
    contracts: &[Contract],
    events: &[Event],
    as_of: DateTime<Utc>,
) -> BTreeSet<ViolationCode> {
    let mut out = BTreeSet::new();
    if contracts.is_empty()
        || contracts
            .iter()
            .any(|c| c.primitives_used.len() < MIN_CONTRACT_ENTRIES)
    {
        out.insert(ViolationCode::PrimitivesMin);
    }
    if contracts.is_empty()
        || contracts
            .iter()
            .any(|c| c.invariants.len() < MIN_CONTRACT_ENTRIES)
    {
        out.insert(ViolationCode::InvariantsMin);
    }
    let cutoff = as_of - Duration::days(RECENT_WINDOW_DAYS);
    let recent = events.iter().any(|e| e.ts <= as_of && e.ts >= cutoff);
    if !recent {
        out.insert(ViolationCode::EventsRecent);
    }
    out
}

/// Score one system at `as_of`.
pub fn score_system(
    system_id: &str,
    contracts: &[Contract],
    events: &[Event],
    catalog: &PrimitivesCatalog,
    as_of: DateTime<Utc>,
) -> HealthResult {
    let visible_events = events.iter().filter(|e| e.ts <= as_of).count();
    let violations = discipline_violations(contracts, events, as_of);

    let score_contracts = if contracts.is_empty() { 35.0 } else { 100.0 };
    let score_events = (50.0 + 5.0 * visible_events as f64).min(100.0);
    let score_primitives =
        (20.0 * catalog.schema_count as f64 + 20.0 * catalog.invariant_count as f64).min(100.0);

    let mut total = 0.4 * score_contracts + 0.3 * score_events + 0.3 * score_primitives;
    total -= VIOLATION_PENALTY * violations.len() as f64;
    total = total.clamp(0.0, 100.0);
    if !violations.is_empty() && total >= YELLOW_THRESHOLD {
        total = VIOLATION_CLAMP;
    }
    let score_total = round2(total);

    HealthResult {
        system_id: system_id.to_string(),
        score_total,
        status: HealthStatus::from_score(score_total),
        violations,
        counts: HealthCounts {
            contracts: contracts.len(),
            events: visible_events,
            schemas: catalog.schema_count,
            invariants: catalog.invariant_count,
        },
        scores: ComponentScores {
            contracts: round2(score_contracts),
            events: round2(score_events),
            primitives: round2(score_primitives),
        },
    }
}
