//! Operator gate: the complete single-repository pipeline.
//!
//! load registry -> evaluate -> strict gate -> diff against the ledger's
//! latest entry -> append snapshot -> exit code -> optional export bundle.
//! Structural registry failures abort before anything is written.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::diff::{diff_entries, Action, SnapshotDiff};
use crate::digest::canonical_json;
use crate::error::Result;
use crate::evaluate::{evaluate_registry, EvaluateOptions, Evaluation};
use crate::export::BundleWriter;
use crate::gate::{exit_code, GatePolicy, StrictFailure, StrictReason};
use crate::graph::SystemGraph;
use crate::ledger::{SnapshotEntry, SnapshotLedger, LEDGER_RELATIVE};
use crate::obs;
use crate::registry::{Registry, Tier};
use crate::timeutil::iso_utc;

pub const OPERATOR_VERSION: &str = "1.0";
pub const OPERATOR_SCHEMA_VERSION: &str = "1.0";
pub const OPERATOR_COMMAND: &str = "operator_gate";

/// Trailing window for `snapshot_stats.json`.
pub const EXPORT_STATS_DAYS: i64 = 7;
/// Rows kept in `snapshot_tail.json`.
pub const EXPORT_TAIL_ROWS: usize = 20;

/// Immutable configuration for one operator-gate run.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorOptions {
    pub registry: PathBuf,
    /// Defaults to the repository's `data/snapshots` ledger.
    pub ledger: Option<PathBuf>,
    pub hide_samples: bool,
    pub as_of: DateTime<Utc>,
    /// Wall-clock write time, recorded as the snapshot `ts`.
    pub now: DateTime<Utc>,
    pub policy: GatePolicy,
    pub export: Option<PathBuf>,
    pub write_snapshot: bool,
}

impl OperatorOptions {
    pub fn new(registry: impl Into<PathBuf>, now: DateTime<Utc>) -> Self {
        Self {
            registry: registry.into(),
            ledger: None,
            hide_samples: false,
            as_of: now,
            now,
            policy: GatePolicy::default(),
            export: None,
            write_snapshot: true,
        }
    }

    pub fn ledger_path(&self) -> PathBuf {
        match &self.ledger {
            Some(path) => path.clone(),
            None => crate::globs::registry_root(&self.registry).join(LEDGER_RELATIVE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperatorPolicy {
    pub registry: String,
    pub hide_samples: bool,
    pub strict: bool,
    pub enforce_sla: bool,
    pub as_of: String,
    pub include_staging: bool,
    pub include_dev: bool,
    pub blocked_tiers: Vec<Tier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperatorArtifacts {
    pub snapshot_written: bool,
    pub ledger_path: String,
    pub export_path: Option<String>,
    pub export_written: bool,
}

/// Full operator-gate payload.
#[derive(Debug, Clone, Serialize)]
pub struct OperatorReport {
    pub operator_version: String,
    pub schema_version: String,
    pub command: String,
    pub exit_code: i32,
    pub strict_failed: bool,
    pub regression_detected: bool,
    pub policy: OperatorPolicy,
    pub artifacts: OperatorArtifacts,
    pub strict_reasons: Vec<StrictReason>,
    pub snapshot: SnapshotEntry,
    /// Absent on the first run against an empty ledger.
    pub diff: Option<SnapshotDiff>,
    pub top_actions: Vec<Action>,
    #[serde(skip)]
    pub strict_failure: Option<StrictFailure>,
}

impl OperatorReport {
    /// Single-line strict-failure payload for stderr.
    pub fn strict_failure_line(&self) -> Result<Option<String>> {
        if !self.strict_failed {
            return Ok(None);
        }
        match &self.strict_failure {
            Some(failure) => Ok(Some(canonical_json(failure)?)),
            None => Ok(None),
        }
    }
}

fn operator_policy(options: &OperatorOptions) -> OperatorPolicy {
    let summary = options.policy.summary();
    OperatorPolicy {
        registry: options.registry.display().to_string(),
        hide_samples: options.hide_samples,
        strict: options.policy.strict,
        enforce_sla: options.policy.enforce_sla,
        as_of: iso_utc(options.as_of),
        include_staging: summary.include_staging,
        include_dev: summary.include_dev,
        blocked_tiers: summary.blocked_tiers,
    }
}

/// Run the gate for one repository.
pub fn run_operator_gate(options: &OperatorOptions) -> Result<OperatorReport> {
    let _span = obs::GateSpan::enter(&options.registry.display().to_string());

    let registry = Registry::load(&options.registry)?;
    obs::emit_registry_loaded(registry.path(), registry.systems().len());

    let ledger = SnapshotLedger::new(options.ledger_path());
    let history = ledger.read_all()?;

    let eval_options = EvaluateOptions {
        as_of: options.as_of,
        policy: options.policy.clone(),
        hide_samples: options.hide_samples,
        include_hints: true,
    };
    let evaluation = evaluate_registry(&registry, &history, &eval_options);
    let snapshot = SnapshotEntry::from_evaluation(&evaluation, options.now);

    let diff = history.last().map(|previous| diff_entries(previous, &snapshot));
    let regression_detected = diff.as_ref().map_or(false, SnapshotDiff::regression_detected);

    if options.write_snapshot {
        ledger.append(&snapshot)?;
    }

    let top_actions = diff
        .as_ref()
        .map(|d| d.top_actions.clone())
        .unwrap_or_default();

    let mut report = OperatorReport {
        operator_version: OPERATOR_VERSION.to_string(),
        schema_version: OPERATOR_SCHEMA_VERSION.to_string(),
        command: OPERATOR_COMMAND.to_string(),
        exit_code: exit_code(evaluation.strict_failed, regression_detected),
        strict_failed: evaluation.strict_failed,
        regression_detected,
        policy: operator_policy(options),
        artifacts: OperatorArtifacts {
            snapshot_written: options.write_snapshot,
            ledger_path: ledger.path().display().to_string(),
            export_path: options.export.as_ref().map(|p| p.display().to_string()),
            export_written: false,
        },
        strict_reasons: evaluation.strict_reasons.clone(),
        snapshot,
        diff,
        top_actions,
        strict_failure: evaluation.strict_failure.clone(),
    };

    if let Some(dir) = &options.export {
        report.artifacts.export_written = true;
        write_export(dir, options, &registry, &evaluation, &ledger, &report)?;
    }

    tracing::info!(
        event = "operator.finished",
        exit_code = report.exit_code,
        strict_failed = report.strict_failed,
        regression_detected = report.regression_detected,
    );
    Ok(report)
}

fn write_export(
    dir: &Path,
    options: &OperatorOptions,
    registry: &Registry,
    evaluation: &Evaluation,
    ledger: &SnapshotLedger,
    report: &OperatorReport,
) -> Result<()> {
    let mut bundle = BundleWriter::create(dir)?;
    bundle.write_json("report_health.json", evaluation)?;
    bundle.write_json("graph.json", &SystemGraph::build(registry).to_document())?;
    bundle.write_json("snapshot_latest.json", &report.snapshot)?;
    bundle.write_json(
        "snapshot_diff.json",
        &json!({
            "ledger": ledger.path().display().to_string(),
            "diff": report.diff,
        }),
    )?;
    bundle.write_json("snapshot_stats.json", &ledger.stats(EXPORT_STATS_DAYS, options.now)?)?;
    bundle.write_json(
        "snapshot_tail.json",
        &json!({
            "ledger": ledger.path().display().to_string(),
            "n": EXPORT_TAIL_ROWS,
            "rows": ledger.tail(EXPORT_TAIL_ROWS)?,
        }),
    )?;
    bundle.write_json("operator_gate.json", report)?;
    bundle.finish(
        &iso_utc(options.now),
        json!({
            "registry_path": options.registry.display().to_string(),
            "ledger_path": ledger.path().display().to_string(),
            "as_of": iso_utc(options.as_of),
            "hide_samples": options.hide_samples,
            "strict": options.policy.strict,
            "policy": options.policy.summary(),
            "stats_days": EXPORT_STATS_DAYS,
            "n_tail": EXPORT_TAIL_ROWS,
        }),
    )?;
    Ok(())
}
