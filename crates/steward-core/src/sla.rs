//! Event-recency SLA per tier.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::Tier;
use crate::timeutil::{iso_utc, whole_days_between};

/// Days reported when a system has never emitted a visible event.
pub const NO_EVENT_DAYS: i64 = 999_999;
/// Systems quieter than this many days are flagged as stale.
pub const STALE_AFTER_DAYS: i64 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlaStatus {
    Ok,
    Breach,
    Unknown,
}

impl SlaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlaStatus::Ok => "ok",
            SlaStatus::Breach => "breach",
            SlaStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SlaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maximum days since last event, per tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaThresholds {
    pub prod: i64,
    pub staging: i64,
    pub dev: i64,
    pub sample: i64,
}

impl Default for SlaThresholds {
    fn default() -> Self {
        Self {
            prod: 7,
            staging: 14,
            dev: 30,
            sample: 9999,
        }
    }
}

impl SlaThresholds {
    pub fn for_tier(&self, tier: Tier) -> i64 {
        match tier {
            Tier::Prod => self.prod,
            Tier::Staging => self.staging,
            Tier::Dev => self.dev,
            Tier::Sample => self.sample,
        }
    }

    pub fn as_map(&self) -> BTreeMap<String, i64> {
        Tier::ALL
            .iter()
            .map(|t| (t.as_str().to_string(), self.for_tier(*t)))
            .collect()
    }
}

/// SLA status of a system whose last visible event is `last_event`.
pub fn sla_status(
    last_event: Option<DateTime<Utc>>,
    tier: Tier,
    as_of: DateTime<Utc>,
    thresholds: &SlaThresholds,
) -> SlaStatus {
    let Some(last) = last_event else {
        return SlaStatus::Unknown;
    };
    let age_secs = (as_of - last).num_seconds().max(0) as f64;
    let age_days = age_secs / 86_400.0;
    if age_days > thresholds.for_tier(tier) as f64 {
        SlaStatus::Breach
    } else {
        SlaStatus::Ok
    }
}

/// How long a system has been quiet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recency {
    pub days_since_last_event: i64,
    pub last_event_ts: Option<String>,
    pub stale: bool,
}

impl Recency {
    pub fn compute(last_event: Option<DateTime<Utc>>, as_of: DateTime<Utc>) -> Self {
        let days = match last_event {
            Some(last) => whole_days_between(as_of, last),
            None => NO_EVENT_DAYS,
        };
        Self {
            days_since_last_event: days,
            last_event_ts: last_event.map(iso_utc),
            stale: days > STALE_AFTER_DAYS,
        }
    }
}
