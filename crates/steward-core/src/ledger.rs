//! Append-only snapshot ledger (JSONL).
//!
//! Each line is one [`SnapshotEntry`] encoded as compact JSON with sorted
//! keys. Reading is tolerant: blank lines, malformed lines and rows whose
//! shape cannot be decoded are skipped, and rows that nest their payload
//! under `snapshot` are unwrapped.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::digest::canonical_json;
use crate::error::Result;
use crate::evaluate::Evaluation;
use crate::gate::{PolicySummary, StrictFailure};
use crate::registry::Tier;
use crate::timeutil::{iso_utc, parse_iso_utc};
use crate::{metrics, obs};

/// Ledger location relative to a repository root.
pub const LEDGER_RELATIVE: &str = "data/snapshots/report_snapshot_history.jsonl";
pub const STATS_VERSION: &str = "1.0";

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

fn default_status() -> String {
    "unknown".to_string()
}

fn default_tier() -> Tier {
    Tier::Prod
}

fn default_sla_status() -> String {
    "ok".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    #[serde(default = "default_status", alias = "current_status")]
    pub status: String,
    #[serde(default, alias = "current_score")]
    pub score_total: f64,
    #[serde(default)]
    pub strict_ready_now: bool,
}

impl Default for SnapshotSummary {
    fn default() -> Self {
        Self {
            status: default_status(),
            score_total: 0.0,
            strict_ready_now: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotPolicy {
    #[serde(default, alias = "blocked_tiers")]
    pub strict_blocked_tiers: Vec<Tier>,
    #[serde(default)]
    pub include_staging: bool,
    #[serde(default)]
    pub include_dev: bool,
    #[serde(default)]
    pub enforce_sla: bool,
}

impl From<&PolicySummary> for SnapshotPolicy {
    fn from(p: &PolicySummary) -> Self {
        Self {
            strict_blocked_tiers: p.blocked_tiers.clone(),
            include_staging: p.include_staging,
            include_dev: p.include_dev,
            enforce_sla: p.enforce_sla,
        }
    }
}

/// One system as recorded in a snapshot. Status strings are kept verbatim so
/// older rows decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSystem {
    pub system_id: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub score_total: f64,
    #[serde(default)]
    pub violations: Vec<String>,
    #[serde(default = "default_tier")]
    pub tier: Tier,
    #[serde(default)]
    pub is_sample: bool,
    #[serde(default = "default_sla_status")]
    pub sla_status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedRisk {
    pub system_id: String,
    #[serde(default)]
    pub risk_score: f64,
    #[serde(default = "default_tier")]
    pub tier: Tier,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRisk {
    #[serde(default)]
    pub ranked: Vec<RankedRisk>,
}

impl SnapshotRisk {
    /// 1-based rank per system; rank 1 is the riskiest.
    pub fn ranks(&self) -> BTreeMap<&str, usize> {
        let mut out = BTreeMap::new();
        for (i, r) in self.ranked.iter().enumerate() {
            out.entry(r.system_id.as_str()).or_insert(i + 1);
        }
        out
    }
}

/// One persisted evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    #[serde(default)]
    pub ts: String,
    #[serde(default)]
    pub as_of: Option<String>,
    #[serde(default)]
    pub summary: SnapshotSummary,
    #[serde(default)]
    pub policy: SnapshotPolicy,
    #[serde(default)]
    pub systems: Vec<SnapshotSystem>,
    #[serde(default)]
    pub risk: SnapshotRisk,
    #[serde(default)]
    pub strict_failure: Option<StrictFailure>,
}

impl SnapshotEntry {
    /// Snapshot of `eval`, written at `now`.
    pub fn from_evaluation(eval: &Evaluation, now: DateTime<Utc>) -> Self {
        let mut systems: Vec<SnapshotSystem> = eval
            .systems
            .iter()
            .map(|row| SnapshotSystem {
                system_id: row.system_id.clone(),
                status: row.status.as_str().to_string(),
                score_total: row.score_total,
                violations: row.violations.iter().map(|v| v.as_str().to_string()).collect(),
                tier: row.tier,
                is_sample: row.is_sample,
                sla_status: row.sla_status.as_str().to_string(),
            })
            .collect();
        systems.sort_by(|a, b| a.system_id.cmp(&b.system_id));

        Self {
            ts: iso_utc(now),
            as_of: Some(iso_utc(eval.as_of)),
            summary: SnapshotSummary {
                status: eval.summary.status.as_str().to_string(),
                score_total: eval.summary.score_total,
                strict_ready_now: eval.summary.strict_ready_now,
            },
            policy: SnapshotPolicy::from(&eval.policy),
            systems,
            risk: SnapshotRisk {
                ranked: eval
                    .risk
                    .iter()
                    .map(|r| RankedRisk {
                        system_id: r.system_id.clone(),
                        risk_score: r.risk_score,
                        tier: r.tier,
                    })
                    .collect(),
            },
            strict_failure: eval.strict_failure.clone(),
        }
    }

    /// Decode a ledger row, unwrapping a nested `snapshot` payload.
    pub fn from_value(row: Value) -> Option<SnapshotEntry> {
        let Value::Object(mut outer) = row else {
            return None;
        };
        let payload = match outer.remove("snapshot") {
            Some(Value::Object(mut inner)) => {
                for key in ["ts", "as_of"] {
                    let missing = inner.get(key).map_or(true, Value::is_null);
                    if missing {
                        if let Some(v) = outer.get(key) {
                            inner.insert(key.to_string(), v.clone());
                        }
                    }
                }
                inner
            }
            _ => outer,
        };
        serde_json::from_value(Value::Object(payload)).ok()
    }

    pub fn ts_instant(&self) -> Option<DateTime<Utc>> {
        parse_iso_utc(&self.ts)
    }

    /// Evaluation instant, falling back to the write time.
    pub fn effective_as_of(&self) -> Option<DateTime<Utc>> {
        self.as_of
            .as_deref()
            .and_then(parse_iso_utc)
            .or_else(|| self.ts_instant())
    }

    pub fn system(&self, system_id: &str) -> Option<&SnapshotSystem> {
        self.systems.iter().find(|s| s.system_id == system_id)
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Ledger statistics over a trailing window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub stats_version: String,
    pub ledger: String,
    pub days: i64,
    pub rows: usize,
    pub strict_failures: usize,
    pub reason_codes: BTreeMap<String, usize>,
}

/// Handle on one ledger file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotLedger {
    path: PathBuf,
}

impl SnapshotLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default ledger of the repository rooted at `root`.
    pub fn for_root(root: &Path) -> Self {
        Self::new(root.join(LEDGER_RELATIVE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry as a single sorted-key line.
    pub fn append(&self, entry: &SnapshotEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let line = canonical_json(entry)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        metrics::METRICS.inc_snapshots_appended();
        obs::emit_snapshot_appended(&self.path, &entry.ts, entry.systems.len());
        Ok(())
    }

    /// Every decodable entry in file order. A missing ledger reads as empty.
    pub fn read_all(&self) -> Result<Vec<SnapshotEntry>> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(SnapshotEntry::from_value)
            .collect())
    }

    pub fn latest(&self) -> Result<Option<SnapshotEntry>> {
        Ok(self.read_all()?.pop())
    }

    /// The last `n` entries, in file order.
    pub fn tail(&self, n: usize) -> Result<Vec<SnapshotEntry>> {
        let mut rows = self.read_all()?;
        let skip = rows.len().saturating_sub(n);
        Ok(rows.split_off(skip))
    }

    /// Counts over entries written within `days` of `now`. Entries whose
    /// `ts` cannot be parsed are counted.
    pub fn stats(&self, days: i64, now: DateTime<Utc>) -> Result<LedgerStats> {
        let cutoff = now - Duration::days(days.max(0));
        let rows: Vec<SnapshotEntry> = self
            .read_all()?
            .into_iter()
            .filter(|e| e.ts_instant().map_or(true, |ts| ts >= cutoff))
            .collect();

        let mut strict_failures = 0;
        let mut reason_codes: BTreeMap<String, usize> = BTreeMap::new();
        for entry in &rows {
            let Some(failure) = &entry.strict_failure else {
                continue;
            };
            strict_failures += 1;
            for reason in &failure.reasons {
                *reason_codes
                    .entry(reason.reason_code.as_str().to_string())
                    .or_default() += 1;
            }
        }

        Ok(LedgerStats {
            stats_version: STATS_VERSION.to_string(),
            ledger: self.path.display().to_string(),
            days,
            rows: rows.len(),
            strict_failures,
            reason_codes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(ts: &str, score: f64) -> SnapshotEntry {
        SnapshotEntry {
            ts: ts.to_string(),
            as_of: Some(ts.to_string()),
            summary: SnapshotSummary {
                status: "green".to_string(),
                score_total: score,
                strict_ready_now: true,
            },
            policy: SnapshotPolicy::default(),
            systems: vec![],
            risk: SnapshotRisk::default(),
            strict_failure: None,
        }
    }

    #[test]
    fn test_append_then_read_preserves_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = SnapshotLedger::for_root(dir.path());
        ledger.append(&entry("2026-03-01T00:00:00Z", 90.0)).expect("append");
        ledger.append(&entry("2026-03-02T00:00:00Z", 80.0)).expect("append");

        let rows = ledger.read_all().expect("read");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].summary.score_total, 80.0);

        let raw = std::fs::read_to_string(ledger.path()).expect("read raw");
        let first = raw.lines().next().expect("line");
        assert!(first.starts_with("{\"as_of\":"));
    }

    #[test]
    fn test_missing_ledger_reads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = SnapshotLedger::new(dir.path().join("none.jsonl"));
        assert!(ledger.read_all().expect("read").is_empty());
        assert!(ledger.latest().expect("latest").is_none());
    }

    #[test]
    fn test_read_skips_bad_lines_and_unwraps_nested() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ledger.jsonl");
        let nested = json!({
            "ts": "2026-03-01T00:00:00Z",
            "snapshot": {
                "systems": [{"system_id": "x", "status": "green", "violations": []}],
                "risk": {"ranked": [{"system_id": "x"}]},
                "strict_failure": null
            }
        });
        std::fs::write(&path, format!("not json\n\n[1,2]\n{nested}\n")).expect("write");
        let rows = SnapshotLedger::new(&path).read_all().expect("read");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ts, "2026-03-01T00:00:00Z");
        assert_eq!(rows[0].systems[0].tier, Tier::Prod);
        assert_eq!(rows[0].risk.ranks().get("x"), Some(&1));
    }

    #[test]
    fn test_tail_returns_last_n_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = SnapshotLedger::for_root(dir.path());
        for day in 1..=4 {
            ledger
                .append(&entry(&format!("2026-03-0{day}T00:00:00Z"), 50.0 + day as f64))
                .expect("append");
        }
        let tail = ledger.tail(2).expect("tail");
        let ts: Vec<&str> = tail.iter().map(|e| e.ts.as_str()).collect();
        assert_eq!(ts, vec!["2026-03-03T00:00:00Z", "2026-03-04T00:00:00Z"]);
        assert_eq!(ledger.tail(10).expect("tail").len(), 4);
    }

    #[test]
    fn test_stats_window_and_reason_counts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ledger.jsonl");
        let failing = json!({
            "ts": "2026-03-05T00:00:00Z",
            "strict_failure": {
                "strict_failed": true,
                "schema_version": "1.0",
                "policy": {"blocked_tiers": ["prod"]},
                "reasons": [
                    {"system_id": "a", "tier": "prod", "reason_code": "RED_STATUS"},
                    {"system_id": "b", "tier": "prod", "reason_code": "SLA_BREACH"}
                ]
            }
        });
        let old = json!({"ts": "2026-01-01T00:00:00Z"});
        let undated = json!({"ts": "whenever"});
        std::fs::write(&path, format!("{old}\n{failing}\n{undated}\n")).expect("write");

        let now = parse_iso_utc("2026-03-06T00:00:00Z").expect("ts");
        let stats = SnapshotLedger::new(&path).stats(7, now).expect("stats");
        assert_eq!(stats.rows, 2);
        assert_eq!(stats.strict_failures, 1);
        assert_eq!(stats.reason_codes.get("RED_STATUS"), Some(&1));
        assert_eq!(stats.reason_codes.get("SLA_BREACH"), Some(&1));
    }
}
