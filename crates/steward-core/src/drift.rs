//! 24-hour score drift.
//!
//! History comes from the snapshot ledger: each entry at or before `as_of`
//! contributes one point `(ts, trunc(summary.score_total))`. Drift compares
//! the latest point with the last point at or before `as_of - 24h`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::SnapshotEntry;
use crate::timeutil::parse_iso_utc;

/// Drops above this many points are reported.
pub const DRIFT_MED_DROP: i64 = 10;
/// Drops above this many points are high severity.
pub const DRIFT_HIGH_DROP: i64 = 20;
pub const DRIFT_WINDOW_HOURS: i64 = 24;
pub const MAX_CONTRIBUTORS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftSeverity {
    High,
    Med,
}

impl DriftSeverity {
    pub fn for_drop(drop: i64) -> Option<DriftSeverity> {
        if drop > DRIFT_HIGH_DROP {
            Some(DriftSeverity::High)
        } else if drop > DRIFT_MED_DROP {
            Some(DriftSeverity::Med)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrendPoint {
    pub ts: DateTime<Utc>,
    pub score: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftContributor {
    pub system_id: String,
    pub drop: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriftSummary {
    pub points: usize,
    pub latest_score: Option<i64>,
    pub score_24h_ago: Option<i64>,
    /// `latest_score - score_24h_ago`.
    pub drift: Option<i64>,
    pub severity: Option<DriftSeverity>,
    /// Top non-sample systems pulling the score down; empty unless triggered.
    pub contributors: Vec<DriftContributor>,
}

impl DriftSummary {
    pub fn drop(&self) -> Option<i64> {
        self.drift.map(|d| -d)
    }

    pub fn triggered(&self) -> bool {
        self.severity.is_some()
    }

    pub fn contributor_ids(&self) -> Vec<&str> {
        self.contributors.iter().map(|c| c.system_id.as_str()).collect()
    }

    /// Contributors that count as impact sources. Only a HIGH drop qualifies;
    /// MED contributors stay advisory.
    pub fn impact_sources(&self) -> Vec<&str> {
        if self.severity == Some(DriftSeverity::High) {
            self.contributor_ids()
        } else {
            Vec::new()
        }
    }
}

/// Trend points from ledger entries visible at `as_of`, in ledger order.
pub fn trend_points(entries: &[SnapshotEntry], as_of: DateTime<Utc>) -> Vec<TrendPoint> {
    entries
        .iter()
        .filter_map(|e| {
            let ts = parse_iso_utc(&e.ts)?;
            (ts <= as_of).then(|| TrendPoint {
                ts,
                score: e.summary.score_total.trunc() as i64,
            })
        })
        .collect()
}

/// Score of the latest point at or before `target`.
pub fn score_at_or_before(points: &[TrendPoint], target: DateTime<Utc>) -> Option<i64> {
    let mut best: Option<&TrendPoint> = None;
    for p in points.iter().filter(|p| p.ts <= target) {
        if best.map_or(true, |b| p.ts > b.ts) {
            best = Some(p);
        }
    }
    best.map(|p| p.score)
}

/// Systems whose score dropped over the window, from `(system_id, now,
/// before)` triples. Keeps the top three by `(-drop, system_id)`.
pub fn drift_contributors<'a, I>(scores: I) -> Vec<DriftContributor>
where
    I: IntoIterator<Item = (&'a str, f64, f64)>,
{
    let mut out: Vec<DriftContributor> = scores
        .into_iter()
        .filter_map(|(system_id, now, before)| {
            let drop = (before - now).round() as i64;
            (drop > 0).then(|| DriftContributor {
                system_id: system_id.to_string(),
                drop,
            })
        })
        .collect();
    out.sort_by(|a, b| b.drop.cmp(&a.drop).then_with(|| a.system_id.cmp(&b.system_id)));
    out.truncate(MAX_CONTRIBUTORS);
    out
}

/// Compare the latest point with the one 24h before `as_of`.
pub fn assess_drift(
    points: &[TrendPoint],
    as_of: DateTime<Utc>,
    contributors: Vec<DriftContributor>,
) -> DriftSummary {
    let latest_score = points.last().map(|p| p.score);
    let score_24h_ago = score_at_or_before(points, as_of - Duration::hours(DRIFT_WINDOW_HOURS));
    let drift = match (latest_score, score_24h_ago) {
        (Some(now), Some(before)) => Some(now - before),
        _ => None,
    };
    let severity = drift.and_then(|d| DriftSeverity::for_drop(-d));
    DriftSummary {
        points: points.len(),
        latest_score,
        score_24h_ago,
        drift,
        severity,
        contributors: if severity.is_some() {
            contributors
        } else {
            Vec::new()
        },
    }
}
