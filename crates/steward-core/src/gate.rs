//! Tier-aware strict gate.
//!
//! Evaluates per-system [`HealthResult`]s against a [`GatePolicy`] to
//! produce a [`GateVerdict`]: the list of blocking [`StrictReason`]s and
//! whether they fail the run. The exit-code state machine lives here too so
//! the single-repository and portfolio commands agree on it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::health::{HealthResult, HealthStatus};
use crate::registry::Tier;
use crate::sla::{sla_status, SlaStatus, SlaThresholds};
use crate::timeutil::{iso_utc, whole_days_between};

pub const STRICT_FAILURE_SCHEMA_VERSION: &str = "1.0";

// ---------------------------------------------------------------------------
// Exit codes
// ---------------------------------------------------------------------------

pub const EXIT_CLEAN: i32 = 0;
pub const EXIT_USAGE: i32 = 1;
pub const EXIT_STRICT: i32 = 2;
pub const EXIT_REGRESSION: i32 = 3;
pub const EXIT_STRICT_AND_REGRESSION: i32 = 4;

/// Terminal exit code for a gate run.
pub fn exit_code(strict_failed: bool, regression_detected: bool) -> i32 {
    match (strict_failed, regression_detected) {
        (true, true) => EXIT_STRICT_AND_REGRESSION,
        (true, false) => EXIT_STRICT,
        (false, true) => EXIT_REGRESSION,
        (false, false) => EXIT_CLEAN,
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Strict gate configuration, built once per invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatePolicy {
    /// When false, blocking reasons are still reported but never fail the run.
    pub strict: bool,
    pub include_staging: bool,
    pub include_dev: bool,
    pub enforce_sla: bool,
    pub sla: SlaThresholds,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            strict: true,
            include_staging: false,
            include_dev: false,
            enforce_sla: false,
            sla: SlaThresholds::default(),
        }
    }
}

impl GatePolicy {
    /// Tiers whose red systems block. `include_dev` implies staging; sample
    /// is never blocked.
    pub fn blocked_tiers(&self) -> Vec<Tier> {
        let mut tiers = vec![Tier::Prod];
        if self.include_staging || self.include_dev {
            tiers.push(Tier::Staging);
        }
        if self.include_dev {
            tiers.push(Tier::Dev);
        }
        tiers.sort();
        tiers
    }

    pub fn blocks(&self, tier: Tier) -> bool {
        self.blocked_tiers().contains(&tier)
    }

    pub fn summary(&self) -> PolicySummary {
        PolicySummary {
            blocked_tiers: self.blocked_tiers(),
            include_staging: self.include_staging,
            include_dev: self.include_dev,
            enforce_sla: self.enforce_sla,
        }
    }
}

/// Serialized policy attached to strict failures and snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySummary {
    #[serde(default, alias = "strict_blocked_tiers")]
    pub blocked_tiers: Vec<Tier>,
    #[serde(default)]
    pub include_staging: bool,
    #[serde(default)]
    pub include_dev: bool,
    #[serde(default)]
    pub enforce_sla: bool,
}

// ---------------------------------------------------------------------------
// Reasons
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    RedStatus,
    SlaBreach,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::RedStatus => "RED_STATUS",
            ReasonCode::SlaBreach => "SLA_BREACH",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReasonDetails {
    Red {
        status: HealthStatus,
        score_total: f64,
        violations: Vec<String>,
    },
    Sla {
        sla_status: SlaStatus,
        threshold_days: i64,
        days_since_event: Option<i64>,
        last_event_ts: Option<String>,
        as_of: String,
    },
    /// Anything else read back from an older ledger.
    Other(Value),
}

impl Default for ReasonDetails {
    fn default() -> Self {
        ReasonDetails::Other(Value::Null)
    }
}

/// One blocking system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrictReason {
    pub system_id: String,
    pub tier: Tier,
    pub reason_code: ReasonCode,
    #[serde(default)]
    pub details: ReasonDetails,
}

impl StrictReason {
    /// Identity used to decide whether a reason is new between snapshots.
    pub fn key(&self) -> (&str, Tier, ReasonCode) {
        (self.system_id.as_str(), self.tier, self.reason_code)
    }
}

/// Sort by `(reason_code, tier, system_id)`.
pub fn sort_reasons(reasons: &mut [StrictReason]) {
    reasons.sort_by(|a, b| {
        a.reason_code
            .cmp(&b.reason_code)
            .then_with(|| a.tier.cmp(&b.tier))
            .then_with(|| a.system_id.cmp(&b.system_id))
    });
}

/// Structured record of a strict failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrictFailure {
    #[serde(default)]
    pub strict_failed: bool,
    #[serde(default)]
    pub schema_version: String,
    #[serde(default)]
    pub policy: PolicySummary,
    #[serde(default)]
    pub reasons: Vec<StrictReason>,
}

impl StrictFailure {
    pub fn new(policy: &GatePolicy, reasons: Vec<StrictReason>) -> Self {
        Self {
            strict_failed: true,
            schema_version: STRICT_FAILURE_SCHEMA_VERSION.to_string(),
            policy: policy.summary(),
            reasons,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Everything the gate needs to know about one system.
#[derive(Debug, Clone, Copy)]
pub struct GateInput<'a> {
    pub tier: Tier,
    pub is_sample: bool,
    pub health: &'a HealthResult,
    pub last_event: Option<DateTime<Utc>>,
}

/// Outcome of the strict gate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateVerdict {
    /// Blocking reasons, sorted; reported even when `strict` is off.
    pub reasons: Vec<StrictReason>,
    pub strict_failed: bool,
}

impl GateVerdict {
    pub fn passed(&self) -> bool {
        !self.strict_failed
    }

    /// Failure payload, present only when the run actually fails.
    pub fn failure(&self, policy: &GatePolicy) -> Option<StrictFailure> {
        self.strict_failed
            .then(|| StrictFailure::new(policy, self.reasons.clone()))
    }
}

/// Evaluate the strict gate at `as_of`.
///
/// A red system is reported once as `RED_STATUS`; the SLA check only applies
/// to systems that are not already red.
pub fn evaluate_gate(inputs: &[GateInput<'_>], policy: &GatePolicy, as_of: DateTime<Utc>) -> GateVerdict {
    let mut reasons = Vec::new();
    for input in inputs {
        if input.is_sample || !policy.blocks(input.tier) {
            continue;
        }
        let health = input.health;
        if health.status == HealthStatus::Red {
            reasons.push(StrictReason {
                system_id: health.system_id.clone(),
                tier: input.tier,
                reason_code: ReasonCode::RedStatus,
                details: ReasonDetails::Red {
                    status: HealthStatus::Red,
                    score_total: health.score_total,
                    violations: health.violation_names(),
                },
            });
            continue;
        }
        if !policy.enforce_sla {
            continue;
        }
        let status = sla_status(input.last_event, input.tier, as_of, &policy.sla);
        if status == SlaStatus::Breach {
            reasons.push(StrictReason {
                system_id: health.system_id.clone(),
                tier: input.tier,
                reason_code: ReasonCode::SlaBreach,
                details: ReasonDetails::Sla {
                    sla_status: status,
                    threshold_days: policy.sla.for_tier(input.tier),
                    days_since_event: input.last_event.map(|ts| whole_days_between(as_of, ts)),
                    last_event_ts: input.last_event.map(iso_utc),
                    as_of: iso_utc(as_of),
                },
            });
        }
    }
    sort_reasons(&mut reasons);
    let strict_failed = policy.strict && !reasons.is_empty();
    GateVerdict {
        reasons,
        strict_failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{ComponentScores, HealthCounts, ViolationCode};
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeSet;

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
    }

    fn health(id: &str, status: HealthStatus) -> HealthResult {
        let (score_total, violations) = match status {
            HealthStatus::Red => (36.5, BTreeSet::from([ViolationCode::EventsRecent])),
            HealthStatus::Yellow => (74.5, BTreeSet::new()),
            HealthStatus::Green => (91.0, BTreeSet::new()),
        };
        HealthResult {
            system_id: id.to_string(),
            score_total,
            status,
            violations,
            counts: HealthCounts {
                contracts: 1,
                events: 1,
                schemas: 3,
                invariants: 2,
            },
            scores: ComponentScores {
                contracts: 100.0,
                events: 55.0,
                primitives: 100.0,
            },
        }
    }

    fn input(h: &HealthResult, tier: Tier, is_sample: bool, days_ago: Option<i64>) -> GateInput<'_> {
        GateInput {
            tier,
            is_sample,
            health: h,
            last_event: days_ago.map(|d| as_of() - Duration::days(d)),
        }
    }

    // ---- Exit codes ----

    #[test]
    fn test_exit_code_state_machine() {
        assert_eq!(exit_code(false, false), 0);
        assert_eq!(exit_code(true, false), 2);
        assert_eq!(exit_code(false, true), 3);
        assert_eq!(exit_code(true, true), 4);
    }

    // ---- Policy ----

    #[test]
    fn test_blocked_tiers_expand_with_flags() {
        let mut policy = GatePolicy::default();
        assert_eq!(policy.blocked_tiers(), vec![Tier::Prod]);
        policy.include_staging = true;
        assert_eq!(policy.blocked_tiers(), vec![Tier::Prod, Tier::Staging]);
        policy.include_staging = false;
        policy.include_dev = true;
        assert_eq!(policy.blocked_tiers(), vec![Tier::Dev, Tier::Prod, Tier::Staging]);
        assert!(!policy.blocks(Tier::Sample));
    }

    // ---- Engine ----

    #[test]
    fn test_red_prod_blocks() {
        let h = health("api", HealthStatus::Red);
        let verdict = evaluate_gate(&[input(&h, Tier::Prod, false, Some(1))], &GatePolicy::default(), as_of());
        assert!(verdict.strict_failed);
        assert_eq!(verdict.reasons.len(), 1);
        assert_eq!(verdict.reasons[0].reason_code, ReasonCode::RedStatus);
    }

    #[test]
    fn test_red_staging_passes_by_default() {
        let h = health("web", HealthStatus::Red);
        let verdict = evaluate_gate(&[input(&h, Tier::Staging, false, Some(1))], &GatePolicy::default(), as_of());
        assert!(verdict.passed());
        assert!(verdict.reasons.is_empty());
    }

    #[test]
    fn test_sample_never_blocks() {
        let h = health("demo", HealthStatus::Red);
        let policy = GatePolicy {
            include_dev: true,
            enforce_sla: true,
            ..GatePolicy::default()
        };
        let verdict = evaluate_gate(&[input(&h, Tier::Prod, true, None)], &policy, as_of());
        assert!(verdict.passed());
        assert!(verdict.reasons.is_empty());
    }

    #[test]
    fn test_sla_breach_blocks_only_when_enforced() {
        let h = health("api", HealthStatus::Green);
        let inputs = [input(&h, Tier::Prod, false, Some(9))];
        assert!(evaluate_gate(&inputs, &GatePolicy::default(), as_of()).passed());

        let policy = GatePolicy {
            enforce_sla: true,
            ..GatePolicy::default()
        };
        let verdict = evaluate_gate(&inputs, &policy, as_of());
        assert!(verdict.strict_failed);
        match &verdict.reasons[0].details {
            ReasonDetails::Sla {
                threshold_days,
                days_since_event,
                ..
            } => {
                assert_eq!(*threshold_days, 7);
                assert_eq!(*days_since_event, Some(9));
            }
            other => panic!("unexpected details: {other:?}"),
        }
    }

    #[test]
    fn test_red_reported_once_not_as_sla() {
        let h = health("api", HealthStatus::Red);
        let policy = GatePolicy {
            enforce_sla: true,
            ..GatePolicy::default()
        };
        let verdict = evaluate_gate(&[input(&h, Tier::Prod, false, Some(30))], &policy, as_of());
        assert_eq!(verdict.reasons.len(), 1);
        assert_eq!(verdict.reasons[0].reason_code, ReasonCode::RedStatus);
    }

    #[test]
    fn test_no_strict_reports_without_failing() {
        let h = health("api", HealthStatus::Red);
        let policy = GatePolicy {
            strict: false,
            ..GatePolicy::default()
        };
        let verdict = evaluate_gate(&[input(&h, Tier::Prod, false, Some(1))], &policy, as_of());
        assert!(!verdict.strict_failed);
        assert_eq!(verdict.reasons.len(), 1);
        assert!(verdict.failure(&policy).is_none());
    }

    #[test]
    fn test_reasons_sorted_by_code_tier_id() {
        let red_b = health("b", HealthStatus::Red);
        let red_a = health("a", HealthStatus::Red);
        let stale = health("c", HealthStatus::Green);
        let policy = GatePolicy {
            include_staging: true,
            enforce_sla: true,
            ..GatePolicy::default()
        };
        let verdict = evaluate_gate(
            &[
                input(&stale, Tier::Prod, false, Some(20)),
                input(&red_b, Tier::Staging, false, Some(1)),
                input(&red_a, Tier::Staging, false, Some(1)),
            ],
            &policy,
            as_of(),
        );
        let order: Vec<(&str, &str)> = verdict
            .reasons
            .iter()
            .map(|r| (r.reason_code.as_str(), r.system_id.as_str()))
            .collect();
        assert_eq!(order, vec![("RED_STATUS", "a"), ("RED_STATUS", "b"), ("SLA_BREACH", "c")]);
    }

    #[test]
    fn test_failure_payload_shape() {
        let h = health("api", HealthStatus::Red);
        let policy = GatePolicy::default();
        let verdict = evaluate_gate(&[input(&h, Tier::Prod, false, Some(1))], &policy, as_of());
        let failure = verdict.failure(&policy).expect("strict failure");
        let value = serde_json::to_value(&failure).expect("serialize");
        assert_eq!(value["strict_failed"], true);
        assert_eq!(value["schema_version"], "1.0");
        assert_eq!(value["policy"]["blocked_tiers"][0], "prod");
        assert_eq!(value["reasons"][0]["details"]["status"], "red");
        assert_eq!(value["reasons"][0]["details"]["violations"][0], "EVENTS_RECENT");
    }

    #[test]
    fn test_reason_round_trips_from_ledger_json() {
        let raw = serde_json::json!({
            "system_id": "api",
            "tier": "prod",
            "reason_code": "SLA_BREACH",
            "details": {
                "sla_status": "breach",
                "threshold_days": 7,
                "days_since_event": 9,
                "last_event_ts": "2026-02-20T00:00:00Z",
                "as_of": "2026-03-01T00:00:00Z"
            }
        });
        let reason: StrictReason = serde_json::from_value(raw).expect("decode");
        assert!(matches!(reason.details, ReasonDetails::Sla { .. }));
    }
}
