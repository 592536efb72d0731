//! One evaluation of a repository at one instant.
//!
//! Every system is scored exactly once; the resulting [`HealthResult`]s feed
//! the aggregate, the strict gate, impact sourcing, hints and the snapshot.
//! Only the re-score at `as_of - 24h` used for drift attribution runs the
//! scorer a second time, with the same inputs.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::drift::{assess_drift, drift_contributors, trend_points, DriftSummary, DRIFT_WINDOW_HOURS};
use crate::gate::{evaluate_gate, GateInput, GatePolicy, GateVerdict, PolicySummary, StrictFailure, StrictReason};
use crate::graph::SystemGraph;
use crate::health::{round2, score_system, HealthResult, HealthStatus, ViolationCode};
use crate::hints::{build_hints, Hint};
use crate::impact::{compute_impact, rank_risk, select_sources, ImpactResult, RiskRow};
use crate::ledger::SnapshotEntry;
use crate::obs;
use crate::registry::{Registry, System, Tier};
use crate::sla::{sla_status, Recency, SlaStatus, SlaThresholds};
use crate::sources::{PrimitivesCatalog, SystemInputs};

pub const REPORT_VERSION: &str = "2.0";

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Options shared by every command that evaluates a repository.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluateOptions {
    pub as_of: DateTime<Utc>,
    pub policy: GatePolicy,
    pub hide_samples: bool,
    pub include_hints: bool,
}

impl EvaluateOptions {
    pub fn at(as_of: DateTime<Utc>) -> Self {
        Self {
            as_of,
            policy: GatePolicy::default(),
            hide_samples: false,
            include_hints: true,
        }
    }
}

/// File-resident inputs for every system of a registry, loaded once.
#[derive(Debug, Clone, Default)]
pub struct RepoInputs {
    pub catalog: PrimitivesCatalog,
    pub systems: BTreeMap<String, SystemInputs>,
}

impl RepoInputs {
    pub fn load(registry: &Registry) -> Self {
        let catalog = PrimitivesCatalog::load(&registry.root());
        let systems = registry
            .systems()
            .iter()
            .map(|s| (s.system_id.clone(), SystemInputs::load(registry, s)))
            .collect();
        Self { catalog, systems }
    }

    fn inputs_for(&self, system_id: &str) -> Option<&SystemInputs> {
        self.systems.get(system_id)
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Per-system row of the evaluation report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemRow {
    pub system_id: String,
    pub is_sample: bool,
    pub tier: Tier,
    pub owners: Vec<String>,
    pub status: HealthStatus,
    pub score_total: f64,
    pub violations: BTreeSet<ViolationCode>,
    pub days_since_last_event: i64,
    pub last_event_ts: Option<String>,
    pub stale: bool,
    pub sla_status: SlaStatus,
    pub sla_max_days: i64,
    pub escalation_hint: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateStatus {
    Green,
    Yellow,
    Red,
    Unknown,
}

impl AggregateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateStatus::Green => "green",
            AggregateStatus::Yellow => "yellow",
            AggregateStatus::Red => "red",
            AggregateStatus::Unknown => "unknown",
        }
    }
}

/// Non-sample aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Aggregate {
    pub status: AggregateStatus,
    pub score_total: f64,
    pub strict_ready_now: bool,
}

impl Aggregate {
    /// Worst status and mean score over non-sample rows.
    pub fn of(rows: &[SystemRow]) -> Self {
        let non_sample: Vec<&SystemRow> = rows.iter().filter(|r| !r.is_sample).collect();
        if non_sample.is_empty() {
            return Self {
                status: AggregateStatus::Unknown,
                score_total: 0.0,
                strict_ready_now: true,
            };
        }
        let status = if non_sample.iter().any(|r| r.status == HealthStatus::Red) {
            AggregateStatus::Red
        } else if non_sample.iter().any(|r| r.status == HealthStatus::Yellow) {
            AggregateStatus::Yellow
        } else {
            AggregateStatus::Green
        };
        let mean = non_sample.iter().map(|r| r.score_total).sum::<f64>() / non_sample.len() as f64;
        Self {
            status,
            score_total: round2(mean),
            strict_ready_now: status != AggregateStatus::Red,
        }
    }
}

/// Everything one command knows about a repository at `as_of`.
#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    pub report_version: String,
    pub registry: String,
    pub as_of: DateTime<Utc>,
    pub summary: Aggregate,
    /// Rows shown to the caller; samples removed when `hide_samples` is set.
    pub systems: Vec<SystemRow>,
    pub impact: ImpactResult,
    pub risk: Vec<RiskRow>,
    pub drift: DriftSummary,
    pub hints: Vec<Hint>,
    pub policy: PolicySummary,
    pub strict: bool,
    pub hide_samples: bool,
    pub sla_thresholds: BTreeMap<String, i64>,
    pub strict_reasons: Vec<StrictReason>,
    pub strict_failed: bool,
    pub strict_failure: Option<StrictFailure>,
    #[serde(skip)]
    pub health: Vec<HealthResult>,
}

impl Evaluation {
    pub fn verdict(&self) -> GateVerdict {
        GateVerdict {
            reasons: self.strict_reasons.clone(),
            strict_failed: self.strict_failed,
        }
    }

    pub fn row(&self, system_id: &str) -> Option<&SystemRow> {
        self.systems.iter().find(|r| r.system_id == system_id)
    }
}

fn escalation_hint(owners: &[String], max_days: i64) -> String {
    if owners.is_empty() {
        format!("Assign owner and emit event within {max_days}d.")
    } else {
        format!(
            "Escalate to owners ({}) and emit event within {max_days}d.",
            owners.join(",")
        )
    }
}

fn build_row(
    system: &System,
    health: &HealthResult,
    last_event: Option<DateTime<Utc>>,
    as_of: DateTime<Utc>,
    thresholds: &SlaThresholds,
) -> SystemRow {
    let recency = Recency::compute(last_event, as_of);
    let mut owners = system.owners.clone();
    owners.sort();
    let max_days = thresholds.for_tier(system.tier);
    SystemRow {
        system_id: system.system_id.clone(),
        is_sample: system.is_sample,
        tier: system.tier,
        escalation_hint: escalation_hint(&owners, max_days),
        owners,
        status: health.status,
        score_total: health.score_total,
        violations: health.violations.clone(),
        days_since_last_event: recency.days_since_last_event,
        last_event_ts: recency.last_event_ts,
        stale: recency.stale,
        sla_status: sla_status(last_event, system.tier, as_of, thresholds),
        sla_max_days: max_days,
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Evaluate `registry` at `options.as_of` using preloaded inputs and the
/// ledger history for drift.
pub fn evaluate(
    registry: &Registry,
    inputs: &RepoInputs,
    history: &[SnapshotEntry],
    options: &EvaluateOptions,
) -> Evaluation {
    let as_of = options.as_of;
    let policy = &options.policy;
    let empty = SystemInputs::default();

    let mut systems: Vec<&System> = registry.systems().iter().collect();
    systems.sort_by(|a, b| a.system_id.cmp(&b.system_id));

    let mut health: Vec<HealthResult> = Vec::with_capacity(systems.len());
    let mut last_events: Vec<Option<DateTime<Utc>>> = Vec::with_capacity(systems.len());
    for system in &systems {
        let si = inputs.inputs_for(&system.system_id).unwrap_or(&empty);
        let result = score_system(&system.system_id, &si.contracts, &si.events, &inputs.catalog, as_of);
        obs::emit_health_scored(&result);
        health.push(result);
        last_events.push(si.last_event_at(as_of));
    }

    let all_rows: Vec<SystemRow> = systems
        .iter()
        .zip(&health)
        .zip(&last_events)
        .map(|((s, h), last)| build_row(s, h, *last, as_of, &policy.sla))
        .collect();

    let gate_inputs: Vec<GateInput<'_>> = systems
        .iter()
        .zip(&health)
        .zip(&last_events)
        .map(|((s, h), last)| GateInput {
            tier: s.tier,
            is_sample: s.is_sample,
            health: h,
            last_event: *last,
        })
        .collect();
    let verdict = evaluate_gate(&gate_inputs, policy, as_of);
    obs::emit_gate_evaluated(&verdict);

    // Drift attribution: re-score non-sample systems 24h earlier.
    let before = as_of - Duration::hours(DRIFT_WINDOW_HOURS);
    let rescored: Vec<(&str, f64, f64)> = systems
        .iter()
        .zip(&health)
        .filter(|(s, _)| !s.is_sample)
        .map(|(s, h)| {
            let si = inputs.inputs_for(&s.system_id).unwrap_or(&empty);
            let earlier = score_system(&s.system_id, &si.contracts, &si.events, &inputs.catalog, before);
            (s.system_id.as_str(), h.score_total, earlier.score_total)
        })
        .collect();
    let points = trend_points(history, as_of);
    let drift = assess_drift(&points, as_of, drift_contributors(rescored));

    let graph = SystemGraph::build(registry);
    let sources = select_sources(
        all_rows
            .iter()
            .map(|r| (r.system_id.as_str(), r.is_sample, r.status)),
        drift.impact_sources(),
    );
    let impact = compute_impact(&graph, &sources);
    let risk = rank_risk(&graph, &impact.sources);

    let hints = if options.include_hints {
        build_hints(&all_rows, &graph, &drift, &risk)
    } else {
        Vec::new()
    };

    let summary = Aggregate::of(&all_rows);
    let strict_failure = verdict.failure(policy);
    let rows = if options.hide_samples {
        all_rows.into_iter().filter(|r| !r.is_sample).collect()
    } else {
        all_rows
    };

    Evaluation {
        report_version: REPORT_VERSION.to_string(),
        registry: registry.path().display().to_string(),
        as_of,
        summary,
        systems: rows,
        impact,
        risk,
        drift,
        hints,
        policy: policy.summary(),
        strict: policy.strict,
        hide_samples: options.hide_samples,
        sla_thresholds: policy.sla.as_map(),
        strict_reasons: verdict.reasons,
        strict_failed: verdict.strict_failed,
        strict_failure,
        health,
    }
}

/// Load inputs from disk and evaluate.
pub fn evaluate_registry(
    registry: &Registry,
    history: &[SnapshotEntry],
    options: &EvaluateOptions,
) -> Evaluation {
    let inputs = RepoInputs::load(registry);
    evaluate(registry, &inputs, history, options)
}
