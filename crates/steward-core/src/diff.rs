//! Snapshot diff between two ledger entries and the remediation actions it
//! implies.
//!
//! A diff always runs `a -> b`. Every list it produces is ordered by an
//! explicit key so the same two entries always yield the same bytes,
//! independent of how they were read.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Result, StewardError};
use crate::gate::StrictReason;
use crate::health::{HealthStatus, ViolationCode};
use crate::ledger::{SnapshotEntry, SnapshotLedger};
use crate::timeutil::parse_iso_utc;

pub const DIFF_SCHEMA_VERSION: &str = "1.0";
pub const MAX_RANK_DELTAS: usize = 5;
pub const BAD_REF_HINT: &str =
    "Use --a latest|prev|<int index>|<iso ts> and same for --b. Indices support negatives.";

// ---------------------------------------------------------------------------
// Refs
// ---------------------------------------------------------------------------

/// A reference to one ledger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotRef {
    Latest,
    Previous,
    /// Position in file order; negative counts from the end.
    Index(i64),
    Timestamp(String),
}

impl SnapshotRef {
    /// Parse a ref token. Empty input is not a ref.
    pub fn parse(token: &str) -> Option<SnapshotRef> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        let lower = token.to_ascii_lowercase();
        if lower == "latest" {
            return Some(SnapshotRef::Latest);
        }
        if lower == "prev" || lower == "previous" {
            return Some(SnapshotRef::Previous);
        }
        if let Ok(idx) = token.parse::<i64>() {
            return Some(SnapshotRef::Index(idx));
        }
        Some(SnapshotRef::Timestamp(token.to_string()))
    }

    pub fn resolve<'a>(&self, rows: &'a [SnapshotEntry]) -> Option<&'a SnapshotEntry> {
        match self {
            SnapshotRef::Latest => select_by_index(rows, -1),
            SnapshotRef::Previous => select_by_index(rows, -2),
            SnapshotRef::Index(idx) => select_by_index(rows, *idx),
            SnapshotRef::Timestamp(ts) => select_by_ts(rows, ts),
        }
    }
}

fn select_by_index(rows: &[SnapshotEntry], idx: i64) -> Option<&SnapshotEntry> {
    let len = rows.len() as i64;
    let pos = if idx < 0 { len + idx } else { idx };
    if (0..len).contains(&pos) {
        rows.get(pos as usize)
    } else {
        None
    }
}

fn select_by_ts<'a>(rows: &'a [SnapshotEntry], ts: &str) -> Option<&'a SnapshotEntry> {
    if let Some(exact) = rows.iter().find(|r| r.ts == ts) {
        return Some(exact);
    }
    let target = parse_iso_utc(ts)?;
    rows.iter().find(|r| r.ts_instant() == Some(target))
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSide {
    pub ts: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub system_id: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankDelta {
    pub system_id: String,
    pub from_rank: usize,
    pub to_rank: usize,
    /// `to_rank - from_rank`; negative means the system became riskier.
    pub delta: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    StrictRegression,
    StatusRegression,
    RiskRankIncrease,
    NewHighViolation,
}

impl ActionType {
    /// Severity rank; 1 is most urgent.
    pub fn rank(&self) -> u8 {
        match self {
            ActionType::StrictRegression => 1,
            ActionType::StatusRegression => 2,
            ActionType::RiskRankIncrease => 3,
            ActionType::NewHighViolation => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::StrictRegression => "STRICT_REGRESSION",
            ActionType::StatusRegression => "STATUS_REGRESSION",
            ActionType::RiskRankIncrease => "RISK_RANK_INCREASE",
            ActionType::NewHighViolation => "NEW_HIGH_VIOLATION",
        }
    }

    pub fn is_regression(&self) -> bool {
        matches!(self, ActionType::StrictRegression | ActionType::StatusRegression)
    }
}

/// One remediation suggestion. `repo_id`/`repo_hash` are set only once
/// actions are merged across a portfolio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub priority: usize,
    pub rank: u8,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub system_id: String,
    pub title: String,
    pub why: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_hash: Option<String>,
}

impl Action {
    fn new(action_type: ActionType, system_id: &str, title: String, why: String) -> Self {
        Self {
            priority: 0,
            rank: action_type.rank(),
            action_type,
            system_id: system_id.to_string(),
            title,
            why,
            repo_id: None,
            repo_hash: None,
        }
    }
}

/// Deterministic diff `a -> b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDiff {
    pub schema_version: String,
    pub a: DiffSide,
    pub b: DiffSide,
    pub system_status_changes: Vec<StatusChange>,
    pub new_strict_reasons: Vec<StrictReason>,
    pub risk_rank_delta_top: Vec<RankDelta>,
    pub top_actions: Vec<Action>,
}

impl SnapshotDiff {
    /// A strict or status regression appeared between `a` and `b`.
    pub fn regression_detected(&self) -> bool {
        self.top_actions.iter().any(|a| a.action_type.is_regression())
    }

    pub fn is_empty(&self) -> bool {
        self.system_status_changes.is_empty()
            && self.new_strict_reasons.is_empty()
            && self.risk_rank_delta_top.is_empty()
            && self.top_actions.is_empty()
    }
}

fn strict_reasons(entry: &SnapshotEntry) -> &[StrictReason] {
    entry
        .strict_failure
        .as_ref()
        .map(|f| f.reasons.as_slice())
        .unwrap_or(&[])
}

fn status_changes(a: &SnapshotEntry, b: &SnapshotEntry) -> Vec<StatusChange> {
    let ids: BTreeSet<&str> = a
        .systems
        .iter()
        .chain(b.systems.iter())
        .map(|s| s.system_id.as_str())
        .collect();
    ids.into_iter()
        .filter_map(|id| {
            let from = a.system(id).map_or("missing", |s| s.status.as_str());
            let to = b.system(id).map_or("missing", |s| s.status.as_str());
            (from != to).then(|| StatusChange {
                system_id: id.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            })
        })
        .collect()
}

fn new_reasons(a: &SnapshotEntry, b: &SnapshotEntry) -> Vec<StrictReason> {
    let seen: BTreeSet<_> = strict_reasons(a).iter().map(StrictReason::key).collect();
    strict_reasons(b)
        .iter()
        .filter(|r| !seen.contains(&r.key()))
        .cloned()
        .collect()
}

/// Every system ranked in both entries whose rank moved, by id.
fn rank_deltas(a: &SnapshotEntry, b: &SnapshotEntry) -> Vec<RankDelta> {
    let a_rank = a.risk.ranks();
    let b_rank = b.risk.ranks();
    a_rank
        .iter()
        .filter_map(|(id, &from)| {
            let &to = b_rank.get(id)?;
            (from != to).then(|| RankDelta {
                system_id: id.to_string(),
                from_rank: from,
                to_rank: to,
                delta: to as i64 - from as i64,
            })
        })
        .collect()
}

fn build_actions(
    a: &SnapshotEntry,
    b: &SnapshotEntry,
    status: &[StatusChange],
    reasons: &[StrictReason],
    deltas: &[RankDelta],
) -> Vec<Action> {
    let mut actions = Vec::new();

    for r in reasons {
        actions.push(Action::new(
            ActionType::StrictRegression,
            &r.system_id,
            format!("Clear {} on {}", r.reason_code.as_str(), r.system_id),
            format!(
                "New strict blocker on {} tier since {}.",
                r.tier.as_str(),
                a.ts
            ),
        ));
    }

    for change in status {
        let is_sample = b
            .system(&change.system_id)
            .or_else(|| a.system(&change.system_id))
            .map_or(false, |s| s.is_sample);
        if is_sample {
            continue;
        }
        let worse = match (
            HealthStatus::severity_of(&change.from),
            HealthStatus::severity_of(&change.to),
        ) {
            (Some(from), Some(to)) => to > from,
            _ => false,
        };
        if worse {
            actions.push(Action::new(
                ActionType::StatusRegression,
                &change.system_id,
                format!("Restore {} to {}", change.system_id, change.from),
                format!("Status regressed {} -> {}.", change.from, change.to),
            ));
        }
    }

    for d in deltas.iter().filter(|d| d.to_rank < d.from_rank) {
        actions.push(Action::new(
            ActionType::RiskRankIncrease,
            &d.system_id,
            format!("Review rising risk of {}", d.system_id),
            format!("Risk rank moved {} -> {}.", d.from_rank, d.to_rank),
        ));
    }

    for sys in &b.systems {
        let before: BTreeSet<&str> = a
            .system(&sys.system_id)
            .map(|s| s.violations.iter().map(String::as_str).collect())
            .unwrap_or_default();
        let gained: BTreeSet<&str> = sys
            .violations
            .iter()
            .map(String::as_str)
            .filter(|v| ViolationCode::is_high(v) && !before.contains(v))
            .collect();
        if !gained.is_empty() {
            let codes: Vec<&str> = gained.into_iter().collect();
            actions.push(Action::new(
                ActionType::NewHighViolation,
                &sys.system_id,
                format!("Fix contract coverage on {}", sys.system_id),
                format!("New violations: {}.", codes.join(", ")),
            ));
        }
    }

    rank_actions(&mut actions);
    actions
}

/// Sort by `(rank, system_id, type)` and renumber priorities from 1.
/// Remaining ties fall back to the title.
pub fn rank_actions(actions: &mut [Action]) {
    actions.sort_by(|x, y| {
        x.rank
            .cmp(&y.rank)
            .then_with(|| x.system_id.cmp(&y.system_id))
            .then_with(|| x.action_type.cmp(&y.action_type))
            .then_with(|| x.title.cmp(&y.title))
    });
    for (i, action) in actions.iter_mut().enumerate() {
        action.priority = i + 1;
    }
}

/// Diff `a -> b`.
pub fn diff_entries(a: &SnapshotEntry, b: &SnapshotEntry) -> SnapshotDiff {
    let system_status_changes = status_changes(a, b);
    let new_strict_reasons = new_reasons(a, b);
    let all_deltas = rank_deltas(a, b);
    let top_actions = build_actions(a, b, &system_status_changes, &new_strict_reasons, &all_deltas);

    let mut risk_rank_delta_top = all_deltas;
    risk_rank_delta_top.sort_by(|x, y| {
        y.delta
            .abs()
            .cmp(&x.delta.abs())
            .then_with(|| x.system_id.cmp(&y.system_id))
    });
    risk_rank_delta_top.truncate(MAX_RANK_DELTAS);

    SnapshotDiff {
        schema_version: DIFF_SCHEMA_VERSION.to_string(),
        a: DiffSide { ts: a.ts.clone() },
        b: DiffSide { ts: b.ts.clone() },
        system_status_changes,
        new_strict_reasons,
        risk_rank_delta_top,
        top_actions,
    }
}

// ---------------------------------------------------------------------------
// Ledger diff
// ---------------------------------------------------------------------------

/// Diff resolved from a ledger file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerDiff {
    pub ledger: String,
    pub diff: SnapshotDiff,
}

/// Keep entries evaluated at or before `as_of` (entry `as_of`, else `ts`).
pub fn visible_at(rows: Vec<SnapshotEntry>, as_of: Option<DateTime<Utc>>) -> Vec<SnapshotEntry> {
    match as_of {
        None => rows,
        Some(cutoff) => rows
            .into_iter()
            .filter(|e| e.effective_as_of().map_or(false, |t| t <= cutoff))
            .collect(),
    }
}

/// Resolve `a` and `b` against the ledger and diff them.
pub fn diff_from_ledger(
    ledger: &SnapshotLedger,
    a: &str,
    b: &str,
    as_of: Option<DateTime<Utc>>,
) -> Result<LedgerDiff> {
    let ledger_name = ledger.path().display().to_string();
    let rows = visible_at(ledger.read_all()?, as_of);
    if rows.is_empty() {
        return Err(StewardError::NoLedgerRows {
            ledger: ledger_name,
        });
    }
    let resolve = |token: &str| SnapshotRef::parse(token).and_then(|r| r.resolve(&rows));
    match (resolve(a), resolve(b)) {
        (Some(ea), Some(eb)) => Ok(LedgerDiff {
            ledger: ledger_name,
            diff: diff_entries(ea, eb),
        }),
        _ => Err(StewardError::BadRef {
            a: a.to_string(),
            b: b.to_string(),
        }),
    }
}

/// Structured payload for a failed ledger diff.
pub fn diff_error_payload(err: &StewardError, ledger: &SnapshotLedger) -> Value {
    let ledger = ledger.path().display().to_string();
    match err {
        StewardError::BadRef { a, b } => json!({
            "error": err.code(),
            "ledger": ledger,
            "a": a,
            "b": b,
            "hint": BAD_REF_HINT,
        }),
        _ => json!({
            "error": err.code(),
            "ledger": ledger,
            "detail": err.to_string(),
        }),
    }
}

/// Human-readable rendering for terminals.
pub fn render_pretty(out: &LedgerDiff) -> String {
    let d = &out.diff;
    let mut s = String::new();
    let _ = writeln!(s, "Snapshot Diff");
    let _ = writeln!(s, "  ledger: {}", out.ledger);
    let _ = writeln!(s, "  a: {}", d.a.ts);
    let _ = writeln!(s, "  b: {}", d.b.ts);

    let _ = writeln!(s, "\nStatus Changes ({})", d.system_status_changes.len());
    for c in &d.system_status_changes {
        let _ = writeln!(s, "  - {}: {} -> {}", c.system_id, c.from, c.to);
    }

    let _ = writeln!(s, "\nNew Strict Reasons ({})", d.new_strict_reasons.len());
    for r in &d.new_strict_reasons {
        let _ = writeln!(
            s,
            "  - {} [{}] {}",
            r.system_id,
            r.tier.as_str(),
            r.reason_code.as_str()
        );
    }

    let _ = writeln!(s, "\nRisk Rank Movers ({})", d.risk_rank_delta_top.len());
    for m in &d.risk_rank_delta_top {
        let _ = writeln!(
            s,
            "  - {}: {} -> {} ({:+})",
            m.system_id, m.from_rank, m.to_rank, m.delta
        );
    }

    let _ = writeln!(s, "\nTop Actions ({})", d.top_actions.len());
    if d.top_actions.is_empty() {
        let _ = writeln!(s, "  (none)");
    }
    for a in &d.top_actions {
        let _ = writeln!(
            s,
            "  {}. [{}] {}: {}",
            a.priority,
            a.action_type.as_str(),
            a.system_id,
            a.title
        );
    }
    s
}
