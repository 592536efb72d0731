//! Portfolio aggregation across repositories.
//!
//! [`PortfolioAggregator`] runs one gate per repository over a bounded pool
//! and merges the results. Dispatch walks the sorted specs and acquires a
//! semaphore permit before spawning each gate, so at most `jobs` gates are
//! in flight. Completed entries land in index slots and are only read after
//! every task has joined; the merged output is then sorted by
//! `(repo_id, repo_hash, repo_root)`, which makes it independent of
//! completion order and pool size.
//!
//! With `fail_fast`, the first entry that signals anything nonzero stops
//! further dispatch. Gates already running are awaited and included.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

use crate::diff::{rank_actions, Action};
use crate::error::{PortfolioConfigError, Result, StewardError};
use crate::export::BundleWriter;
use crate::gate::{exit_code, sort_reasons, StrictReason, EXIT_USAGE};
use crate::metrics::METRICS;
use crate::obs;
use crate::operator::{OPERATOR_COMMAND, OPERATOR_SCHEMA_VERSION};
use crate::portfolio::runner::{GateRequest, GateRunner};
use crate::portfolio::spec::{ExportMode, PortfolioOptions, PortfolioPlan, RepoSpec};
use crate::timeutil::iso_utc;

pub const PORTFOLIO_SCHEMA_VERSION: &str = "1.0";
pub const PORTFOLIO_COMMAND: &str = "portfolio_gate";
pub const PORTFOLIO_REPORT_FILE: &str = "portfolio_gate.json";

/// Gate exit codes that represent a completed evaluation.
const VALID_GATE_EXIT_CODES: [i32; 4] = [0, 2, 3, 4];

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// Stable reduction of one repository's gate payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StableGate {
    pub command: String,
    pub schema_version: String,
    pub exit_code: i32,
    pub strict_failed: bool,
    pub regression_detected: bool,
    pub top_actions: Vec<Action>,
    pub strict_reasons: Vec<StrictReason>,
}

impl StableGate {
    /// Reduce raw gate stdout. Missing or undecodable payloads fall back to
    /// what the exit code implies.
    pub fn from_stdout(stdout: &str, gate_exit_code: i32) -> Self {
        let payload = serde_json::from_str::<Value>(stdout.trim())
            .ok()
            .filter(Value::is_object)
            .unwrap_or(Value::Null);
        let text = |key: &str, default: &str| {
            payload
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or(default)
                .to_string()
        };
        let flag = |key: &str| payload.get(key).and_then(Value::as_bool).unwrap_or(false);
        let list = |key: &str| {
            payload
                .get(key)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
        };

        let mut top_actions: Vec<Action> = list("top_actions")
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect();
        rank_actions(&mut top_actions);

        let mut strict_reasons: Vec<StrictReason> = list("strict_reasons")
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect();
        sort_reasons(&mut strict_reasons);

        StableGate {
            command: text("command", OPERATOR_COMMAND),
            schema_version: text("schema_version", OPERATOR_SCHEMA_VERSION),
            exit_code: payload
                .get("exit_code")
                .and_then(Value::as_i64)
                .map_or(gate_exit_code, |c| c as i32),
            strict_failed: flag("strict_failed") || matches!(gate_exit_code, 2 | 4),
            regression_detected: flag("regression_detected") || matches!(gate_exit_code, 3 | 4),
            top_actions,
            strict_reasons,
        }
    }
}

/// One repository's gate invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioEntry {
    #[serde(flatten)]
    pub repo: RepoSpec,
    pub exit_code: i32,
    pub gate_result: StableGate,
    pub stderr: String,
}

impl PortfolioEntry {
    /// Strict failure, regression or any nonzero exit.
    pub fn signals_nonzero(&self) -> bool {
        self.gate_result.strict_failed || self.gate_result.regression_detected || self.exit_code != 0
    }
}

/// `1` when any gate did not complete, else the strict/regression state.
pub fn portfolio_exit_code(entries: &[PortfolioEntry]) -> i32 {
    if entries
        .iter()
        .any(|e| !VALID_GATE_EXIT_CODES.contains(&e.exit_code))
    {
        return EXIT_USAGE;
    }
    let strict = entries.iter().any(|e| e.gate_result.strict_failed);
    let regression = entries.iter().any(|e| e.gate_result.regression_detected);
    exit_code(strict, regression)
}

/// Merge per-repository actions, tagged with their repository, sorted by
/// `(rank, system_id, repo_id, repo_hash, type)` and renumbered from 1.
pub fn merge_top_actions(entries: &[PortfolioEntry]) -> Vec<Action> {
    let mut merged: Vec<Action> = entries
        .iter()
        .flat_map(|entry| {
            entry.gate_result.top_actions.iter().map(move |a| Action {
                repo_id: Some(entry.repo.repo_id.clone()),
                repo_hash: Some(entry.repo.repo_hash.clone()),
                ..a.clone()
            })
        })
        .collect();
    merged.sort_by(|x, y| {
        x.rank
            .cmp(&y.rank)
            .then_with(|| x.system_id.cmp(&y.system_id))
            .then_with(|| x.repo_id.cmp(&y.repo_id))
            .then_with(|| x.repo_hash.cmp(&y.repo_hash))
            .then_with(|| x.action_type.cmp(&y.action_type))
            .then_with(|| x.title.cmp(&y.title))
    });
    for (i, action) in merged.iter_mut().enumerate() {
        action.priority = i + 1;
    }
    merged
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioPolicy {
    pub hide_samples: bool,
    pub strict: bool,
    pub enforce_sla: bool,
    pub as_of: Option<String>,
    pub jobs: usize,
    pub fail_fast: bool,
    pub max_repos: Option<i64>,
    pub export_mode: ExportMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioArtifacts {
    pub exported: bool,
    pub export_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioReport {
    pub schema_version: String,
    pub command: String,
    pub portfolio_exit_code: i32,
    pub policy: PortfolioPolicy,
    pub repos: Vec<PortfolioEntry>,
    pub top_actions: Vec<Action>,
    pub artifacts: PortfolioArtifacts,
}

/// Structured payload for a configuration error (exit 1, nothing ran).
pub fn config_error_payload(err: &PortfolioConfigError) -> Value {
    json!({
        "schema_version": PORTFOLIO_SCHEMA_VERSION,
        "command": PORTFOLIO_COMMAND,
        "error": err.code(),
        "hint": err.hint(),
    })
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Runs repository gates through an injected [`GateRunner`].
pub struct PortfolioAggregator {
    runner: Arc<dyn GateRunner>,
}

impl PortfolioAggregator {
    pub fn new(runner: Arc<dyn GateRunner>) -> Self {
        Self { runner }
    }

    /// Validate `options`, gate every repository and merge the results.
    pub async fn run(&self, options: &PortfolioOptions) -> Result<PortfolioReport> {
        let plan = options.plan()?;
        let (entries, skipped) = self.gate_all(&plan, options).await?;

        let portfolio_exit_code = portfolio_exit_code(&entries);
        let top_actions = merge_top_actions(&entries);
        obs::emit_portfolio_finished(entries.len(), portfolio_exit_code, skipped);

        let mut report = PortfolioReport {
            schema_version: PORTFOLIO_SCHEMA_VERSION.to_string(),
            command: PORTFOLIO_COMMAND.to_string(),
            portfolio_exit_code,
            policy: PortfolioPolicy {
                hide_samples: options.hide_samples,
                strict: options.strict,
                enforce_sla: options.enforce_sla,
                as_of: options.as_of.clone(),
                jobs: plan.jobs,
                fail_fast: options.fail_fast,
                max_repos: options.max_repos,
                export_mode: plan.export_mode,
            },
            repos: entries,
            top_actions,
            artifacts: PortfolioArtifacts {
                exported: false,
                export_path: None,
            },
        };

        if let Some(dir) = &options.export {
            report.artifacts = PortfolioArtifacts {
                exported: true,
                export_path: Some(dir.display().to_string()),
            };
            write_export(dir, options, &plan, &report)?;
        }
        Ok(report)
    }

    /// Returns the sorted entries and the number of specs never dispatched.
    async fn gate_all(
        &self,
        plan: &PortfolioPlan,
        options: &PortfolioOptions,
    ) -> Result<(Vec<PortfolioEntry>, usize)> {
        let sem = Arc::new(Semaphore::new(plan.jobs));
        let (fail_tx, fail_rx) = watch::channel(false);
        let fail_tx = Arc::new(fail_tx);

        let mut join_set = JoinSet::new();
        let mut skipped = 0;
        for (idx, spec) in plan.specs.iter().cloned().enumerate() {
            let permit = Arc::clone(&sem)
                .acquire_owned()
                .await
                .map_err(|e| StewardError::Runner(format!("worker pool closed: {e}")))?;

            // Stop dispatching once a finished gate tripped fail-fast.
            if *fail_rx.borrow() {
                skipped = plan.specs.len() - idx;
                break;
            }

            let request = GateRequest {
                spec,
                hide_samples: options.hide_samples,
                strict: options.strict,
                enforce_sla: options.enforce_sla,
                as_of: options.as_of.clone(),
            };
            let runner = Arc::clone(&self.runner);
            let fail_tx = Arc::clone(&fail_tx);
            let fail_fast = options.fail_fast;

            join_set.spawn(async move {
                let _permit = permit;
                let started = Instant::now();
                let entry = gate_one(runner.as_ref(), request).await;
                obs::emit_portfolio_repo_finished(
                    &entry.repo.repo_id,
                    &entry.repo.repo_hash,
                    entry.exit_code,
                    started.elapsed().as_millis() as u64,
                );
                if fail_fast && entry.signals_nonzero() {
                    let _ = fail_tx.send(true);
                }
                (idx, entry)
            });
        }

        let mut slots: Vec<Option<PortfolioEntry>> = vec![None; plan.specs.len()];
        while let Some(joined) = join_set.join_next().await {
            let (idx, entry) =
                joined.map_err(|e| StewardError::Runner(format!("gate task join error: {e}")))?;
            slots[idx] = Some(entry);
        }

        let mut entries: Vec<PortfolioEntry> = slots.into_iter().flatten().collect();
        entries.sort_by(|a, b| a.repo.sort_key().cmp(&b.repo.sort_key()));
        Ok((entries, skipped))
    }
}

async fn gate_one(runner: &dyn GateRunner, request: GateRequest) -> PortfolioEntry {
    METRICS.inc_repos_gated();
    match runner.run(&request).await {
        Ok(run) => PortfolioEntry {
            gate_result: StableGate::from_stdout(&run.stdout, run.exit_code),
            exit_code: run.exit_code,
            stderr: run.stderr.trim().to_string(),
            repo: request.spec,
        },
        Err(e) => {
            METRICS.inc_repo_run_errors();
            obs::emit_portfolio_repo_error(&request.spec.repo_id, &e);
            PortfolioEntry {
                gate_result: StableGate::from_stdout("", EXIT_USAGE),
                exit_code: EXIT_USAGE,
                stderr: format!("RUN_ERROR: {e}"),
                repo: request.spec,
            }
        }
    }
}

fn write_export(
    dir: &std::path::Path,
    options: &PortfolioOptions,
    plan: &PortfolioPlan,
    report: &PortfolioReport,
) -> Result<()> {
    let mut bundle = BundleWriter::create(dir)?;
    bundle.write_json(PORTFOLIO_REPORT_FILE, report)?;
    if plan.export_mode == ExportMode::WithRepoGates {
        for entry in &report.repos {
            let name = format!("repo_{}_operator_gate.json", entry.repo.repo_hash);
            bundle.write_json(&name, &entry.gate_result)?;
        }
    }
    bundle.finish(
        &iso_utc(options.now),
        json!({
            "repos": plan.specs.iter().map(|s| s.repo_root.clone()).collect::<Vec<_>>(),
            "policy": report.policy,
        }),
    )?;
    Ok(())
}
