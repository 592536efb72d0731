//! Steward - deterministic governance gate CLI
//!
//! The `steward` command scores registered systems, enforces the tier-aware
//! strict gate and keeps a snapshot ledger per repository.
//!
//! ## Commands
//!
//! - `validate`: structural and content checks of a registry
//! - `health`: per-system discipline scores and the strict gate
//! - `graph` / `impact`: dependency graph and blast radius
//! - `report health`: full evaluation report with advisory hints
//! - `snapshot`: write, tail, stats and diff over the ledger
//! - `operator gate`: the single-repository gate pipeline
//! - `portfolio-gate`: the gate across many repositories
//!
//! Exit codes: 0 clean, 1 usage or validation error, 2 strict failure,
//! 3 regression, 4 strict failure and regression.

mod runner;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::Level;

use steward_core::diff::{diff_error_payload, diff_from_ledger, render_pretty};
use steward_core::digest::{canonical_json, to_sorted_pretty};
use steward_core::evaluate::{evaluate_registry, EvaluateOptions, Evaluation};
use steward_core::gate::{EXIT_CLEAN, EXIT_STRICT, EXIT_USAGE};
use steward_core::globs::{registry_root, DEFAULT_REGISTRY_RELATIVE};
use steward_core::hints::HintSeverity;
use steward_core::impact::render_impact_line;
use steward_core::ledger::{SnapshotEntry, SnapshotLedger, LEDGER_RELATIVE};
use steward_core::metrics::METRICS;
use steward_core::operator::{run_operator_gate, OperatorOptions};
use steward_core::portfolio::{config_error_payload, PortfolioAggregator, PortfolioOptions};
use steward_core::timeutil::{iso_utc, require_iso_utc};
use steward_core::validate::validate_repo;
use steward_core::{GatePolicy, Registry, StewardError, SystemGraph};

use crate::runner::SubprocessGateRunner;

/// Schema version of structured CLI error payloads.
const ERROR_SCHEMA_VERSION: &str = "1.0";

#[derive(Parser)]
#[command(name = "steward")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Deterministic governance gate for registered systems", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct RegistryArg {
    /// Path to the registry JSON
    #[arg(long, env = "STEWARD_REGISTRY", default_value = DEFAULT_REGISTRY_RELATIVE)]
    registry: PathBuf,
}

#[derive(Args, Debug, Clone)]
struct LedgerArg {
    /// Snapshot ledger (default: <root>/data/snapshots/report_snapshot_history.jsonl)
    #[arg(long, env = "STEWARD_LEDGER")]
    ledger: Option<PathBuf>,
}

/// Tier inclusion and SLA enforcement.
#[derive(Args, Debug, Clone, Default)]
struct PolicyArgs {
    /// Red staging systems also block
    #[arg(long)]
    include_staging: bool,

    /// Red dev systems also block (implies staging)
    #[arg(long)]
    include_dev: bool,

    /// SLA breaches of blocked tiers also block
    #[arg(long)]
    enforce_sla: bool,
}

impl PolicyArgs {
    fn policy(&self, strict: bool) -> GatePolicy {
        GatePolicy {
            strict,
            include_staging: self.include_staging,
            include_dev: self.include_dev,
            enforce_sla: self.enforce_sla,
            ..GatePolicy::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the registry and the contracts, events and schemas it references
    Validate {
        #[command(flatten)]
        registry: RegistryArg,

        /// Print the JSON report
        #[arg(long)]
        json: bool,
    },

    /// Score systems and evaluate the strict gate
    Health {
        #[command(flatten)]
        registry: RegistryArg,

        /// Show every system (default)
        #[arg(long, conflicts_with = "system")]
        all: bool,

        /// Show a single system
        #[arg(long)]
        system: Option<String>,

        /// Leave sample systems out of the rows
        #[arg(long)]
        hide_samples: bool,

        /// Exit 2 when the strict gate blocks
        #[arg(long)]
        strict: bool,

        #[command(flatten)]
        policy: PolicyArgs,

        /// Evaluate at this instant instead of now
        #[arg(long)]
        as_of: Option<String>,

        /// Print the JSON report
        #[arg(long)]
        json: bool,
    },

    /// Show the dependency graph
    Graph {
        #[command(flatten)]
        registry: RegistryArg,

        /// Print the JSON document
        #[arg(long)]
        json: bool,
    },

    /// Show impact sources, blast radius and risk ranking
    Impact {
        #[command(flatten)]
        registry: RegistryArg,

        /// Evaluate at this instant instead of now
        #[arg(long)]
        as_of: Option<String>,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Evaluation reports
    Report {
        #[command(subcommand)]
        action: ReportAction,
    },

    /// Snapshot ledger operations
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },

    /// Single-repository gate
    Operator {
        #[command(subcommand)]
        action: OperatorAction,
    },

    /// Run the operator gate across many repositories and merge the results
    PortfolioGate {
        /// Repository roots or registry JSON paths
        #[arg(long, num_args = 1..)]
        repos: Vec<String>,

        /// File listing repository paths, one per line
        #[arg(long)]
        repos_file: Option<PathBuf>,

        /// Concurrent repository gates (capped at 16)
        #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
        jobs: i64,

        /// Stop dispatching after the first nonzero result
        #[arg(long)]
        fail_fast: bool,

        /// Only gate the first N input paths
        #[arg(long, allow_negative_numbers = true)]
        max_repos: Option<i64>,

        /// Export bundle directory
        #[arg(long)]
        export: Option<PathBuf>,

        /// portfolio-only or with-repo-gates
        #[arg(long, default_value = "portfolio-only")]
        export_mode: String,

        /// Forwarded to every repository gate
        #[arg(long)]
        hide_samples: bool,

        /// Forwarded to every repository gate
        #[arg(long)]
        no_strict: bool,

        /// Forwarded to every repository gate
        #[arg(long)]
        enforce_sla: bool,

        /// Forwarded to every repository gate
        #[arg(long)]
        as_of: Option<String>,
    },
}

#[derive(Subcommand)]
enum ReportAction {
    /// Full evaluation report with hints and drift
    Health {
        #[command(flatten)]
        registry: RegistryArg,

        #[command(flatten)]
        ledger: LedgerArg,

        /// Evaluate at this instant instead of now
        #[arg(long)]
        as_of: Option<String>,

        /// Skip advisory hints
        #[arg(long)]
        no_hints: bool,

        /// Print the JSON report
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum SnapshotAction {
    /// Evaluate and append one snapshot to the ledger
    Write {
        #[command(flatten)]
        registry: RegistryArg,

        #[command(flatten)]
        ledger: LedgerArg,

        /// Evaluate at this instant instead of now
        #[arg(long)]
        as_of: Option<String>,

        /// Leave sample systems out of the snapshot
        #[arg(long)]
        hide_samples: bool,

        #[command(flatten)]
        policy: PolicyArgs,
    },

    /// Print the last N ledger entries
    Tail {
        #[command(flatten)]
        registry: RegistryArg,

        #[command(flatten)]
        ledger: LedgerArg,

        #[arg(long, default_value_t = 5)]
        n: usize,
    },

    /// Strict-failure counts over a recent window
    Stats {
        #[command(flatten)]
        registry: RegistryArg,

        #[command(flatten)]
        ledger: LedgerArg,

        #[arg(long, default_value_t = 7)]
        days: i64,
    },

    /// Diff two ledger entries
    Diff {
        #[command(flatten)]
        registry: RegistryArg,

        #[command(flatten)]
        ledger: LedgerArg,

        /// Base ref: latest, prev, an index or a timestamp
        #[arg(long, default_value = "prev", allow_hyphen_values = true)]
        a: String,

        /// Target ref
        #[arg(long, default_value = "latest", allow_hyphen_values = true)]
        b: String,

        /// Ignore entries evaluated after this instant
        #[arg(long)]
        as_of: Option<String>,

        /// Print JSON instead of the pretty rendering
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum OperatorAction {
    /// Evaluate, diff against the ledger, append a snapshot and gate
    Gate {
        #[command(flatten)]
        registry: RegistryArg,

        #[command(flatten)]
        ledger: LedgerArg,

        /// Print the JSON report
        #[arg(long)]
        json: bool,

        /// Leave sample systems out of the rows and snapshot
        #[arg(long)]
        hide_samples: bool,

        /// Report blocking reasons without failing
        #[arg(long)]
        no_strict: bool,

        #[command(flatten)]
        policy: PolicyArgs,

        /// Evaluate at this instant instead of now
        #[arg(long)]
        as_of: Option<String>,

        /// Write an export bundle to this directory
        #[arg(long)]
        export: Option<PathBuf>,

        /// Do not append to the ledger
        #[arg(long)]
        no_snapshot: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    steward_core::telemetry::init_tracing(cli.log_json, level);

    let now = Utc::now();
    let code = run(cli.command, now).await;
    METRICS.flush();
    std::io::stdout().flush().context("Failed to flush stdout")?;
    std::process::exit(code);
}

async fn run(command: Commands, now: DateTime<Utc>) -> i32 {
    match command {
        Commands::Validate { registry, json } => {
            finish("validate", json, cmd_validate(&registry.registry, json))
        }
        Commands::Health {
            registry,
            all: _,
            system,
            hide_samples,
            strict,
            policy,
            as_of,
            json,
        } => finish(
            "health",
            json,
            cmd_health(
                &registry.registry,
                system.as_deref(),
                hide_samples,
                policy.policy(strict),
                as_of.as_deref(),
                json,
                now,
            ),
        ),
        Commands::Graph { registry, json } => {
            finish("graph", json, cmd_graph(&registry.registry, json))
        }
        Commands::Impact {
            registry,
            as_of,
            json,
        } => finish(
            "impact",
            json,
            cmd_impact(&registry.registry, as_of.as_deref(), json, now),
        ),
        Commands::Report { action } => match action {
            ReportAction::Health {
                registry,
                ledger,
                as_of,
                no_hints,
                json,
            } => finish(
                "report_health",
                json,
                cmd_report_health(
                    &registry.registry,
                    ledger.ledger,
                    as_of.as_deref(),
                    !no_hints,
                    json,
                    now,
                ),
            ),
        },
        Commands::Snapshot { action } => match action {
            SnapshotAction::Write {
                registry,
                ledger,
                as_of,
                hide_samples,
                policy,
            } => finish(
                "snapshot_write",
                true,
                cmd_snapshot_write(
                    &registry.registry,
                    ledger.ledger,
                    as_of.as_deref(),
                    hide_samples,
                    policy.policy(true),
                    now,
                ),
            ),
            SnapshotAction::Tail {
                registry,
                ledger,
                n,
            } => finish(
                "snapshot_tail",
                true,
                cmd_snapshot_tail(&ledger_for(&registry.registry, ledger.ledger), n),
            ),
            SnapshotAction::Stats {
                registry,
                ledger,
                days,
            } => finish(
                "snapshot_stats",
                true,
                cmd_snapshot_stats(&ledger_for(&registry.registry, ledger.ledger), days, now),
            ),
            SnapshotAction::Diff {
                registry,
                ledger,
                a,
                b,
                as_of,
                json,
            } => finish(
                "snapshot_diff",
                json,
                cmd_snapshot_diff(
                    &ledger_for(&registry.registry, ledger.ledger),
                    &a,
                    &b,
                    as_of.as_deref(),
                    json,
                ),
            ),
        },
        Commands::Operator { action } => match action {
            OperatorAction::Gate {
                registry,
                ledger,
                json,
                hide_samples,
                no_strict,
                policy,
                as_of,
                export,
                no_snapshot,
            } => {
                let outcome = parse_as_of(as_of.as_deref(), now).and_then(|as_of| {
                    let mut options = OperatorOptions::new(&registry.registry, now);
                    options.ledger = ledger.ledger;
                    options.hide_samples = hide_samples;
                    options.as_of = as_of;
                    options.policy = policy.policy(!no_strict);
                    options.export = export;
                    options.write_snapshot = !no_snapshot;
                    cmd_operator_gate(&options, json)
                });
                finish("operator_gate", json, outcome)
            }
        },
        Commands::PortfolioGate {
            repos,
            repos_file,
            jobs,
            fail_fast,
            max_repos,
            export,
            export_mode,
            hide_samples,
            no_strict,
            enforce_sla,
            as_of,
        } => {
            let mut options = PortfolioOptions::new(repos, now);
            options.repos_file = repos_file;
            options.jobs = jobs;
            options.fail_fast = fail_fast;
            options.max_repos = max_repos;
            options.export = export;
            options.export_mode = export_mode;
            options.hide_samples = hide_samples;
            options.strict = !no_strict;
            options.enforce_sla = enforce_sla;
            options.as_of = as_of;
            finish("portfolio_gate", true, cmd_portfolio_gate(&options).await)
        }
    }
}

// ---------------------------------------------------------------------------
// Output helpers
// ---------------------------------------------------------------------------

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    print!("{}", to_sorted_pretty(value).context("Failed to encode JSON output")?);
    Ok(())
}

/// Map a command outcome to an exit code, rendering failures.
///
/// Registry failures always list their `CODE: detail` lines on stderr; JSON
/// callers also get a structured payload on stdout.
fn finish(command: &str, json: bool, outcome: Result<i32>) -> i32 {
    let err = match outcome {
        Ok(code) => return code,
        Err(err) => err,
    };
    let steward = err.downcast_ref::<StewardError>();
    let lines = steward.map(StewardError::registry_lines).unwrap_or_default();
    if lines.is_empty() {
        eprintln!("Error: {err:#}");
    } else {
        for line in &lines {
            eprintln!("{line}");
        }
    }
    if json {
        let mut payload = json!({
            "schema_version": ERROR_SCHEMA_VERSION,
            "command": command,
            "error": steward.map_or("ERROR", StewardError::code),
        });
        if lines.is_empty() {
            payload["detail"] = json!(format!("{err:#}"));
        } else {
            payload["errors"] = json!(lines);
        }
        if let Err(e) = print_json(&payload) {
            eprintln!("Error: {e:#}");
        }
    }
    EXIT_USAGE
}

fn parse_as_of(as_of: Option<&str>, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    match as_of {
        Some(value) => Ok(require_iso_utc(value)?),
        None => Ok(now),
    }
}

fn ledger_for(registry: &Path, ledger: Option<PathBuf>) -> SnapshotLedger {
    match ledger {
        Some(path) => SnapshotLedger::new(path),
        None => SnapshotLedger::new(registry_root(registry).join(LEDGER_RELATIVE)),
    }
}

fn evaluate_at(
    registry_path: &Path,
    ledger: &SnapshotLedger,
    options: &EvaluateOptions,
) -> Result<Evaluation> {
    let registry = Registry::load(registry_path)?;
    steward_core::obs::emit_registry_loaded(registry.path(), registry.systems().len());
    let history = ledger.read_all()?;
    Ok(evaluate_registry(&registry, &history, options))
}

fn strict_exit(evaluation: &Evaluation) -> Result<i32> {
    match &evaluation.strict_failure {
        Some(failure) if evaluation.strict_failed => {
            eprintln!("{}", canonical_json(failure)?);
            Ok(EXIT_STRICT)
        }
        _ => Ok(EXIT_CLEAN),
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_validate(registry: &Path, json: bool) -> Result<i32> {
    let report = validate_repo(registry)?;
    if json {
        print_json(&report)?;
    } else {
        for line in &report.errors {
            println!("{line}");
        }
        println!("{}", report.status_line());
    }
    Ok(if report.ok { EXIT_CLEAN } else { EXIT_USAGE })
}

fn cmd_health(
    registry: &Path,
    system: Option<&str>,
    hide_samples: bool,
    policy: GatePolicy,
    as_of: Option<&str>,
    json: bool,
    now: DateTime<Utc>,
) -> Result<i32> {
    let options = EvaluateOptions {
        as_of: parse_as_of(as_of, now)?,
        policy,
        hide_samples,
        include_hints: false,
    };
    let mut evaluation = evaluate_at(registry, &ledger_for(registry, None), &options)?;
    if let Some(id) = system {
        if evaluation.row(id).is_none() {
            anyhow::bail!("unknown system: {id}");
        }
        evaluation.systems.retain(|r| r.system_id == id);
    }

    if json {
        print_json(&json!({
            "as_of": iso_utc(evaluation.as_of),
            "registry": evaluation.registry,
            "summary": evaluation.summary,
            "systems": evaluation.systems,
            "strict": evaluation.strict,
            "strict_failed": evaluation.strict_failed,
            "strict_reasons": evaluation.strict_reasons,
            "policy": evaluation.policy,
        }))?;
    } else {
        println!("system_id | status | score_total | violations");
        for row in &evaluation.systems {
            let violations: Vec<String> = row.violations.iter().map(|v| v.to_string()).collect();
            println!(
                "{} | {} | {:.2} | {}",
                row.system_id,
                row.status,
                row.score_total,
                if violations.is_empty() { "-".to_string() } else { violations.join(",") },
            );
        }
        println!(
            "Summary: {} ({:.2})",
            evaluation.summary.status.as_str(),
            evaluation.summary.score_total
        );
    }
    strict_exit(&evaluation)
}

fn cmd_graph(registry: &Path, json: bool) -> Result<i32> {
    let registry = Registry::load(registry)?;
    let graph = SystemGraph::build(&registry);
    if json {
        print_json(&graph.to_document())?;
    } else {
        print!("{}", graph.render_text());
    }
    Ok(EXIT_CLEAN)
}

fn cmd_impact(registry: &Path, as_of: Option<&str>, json: bool, now: DateTime<Utc>) -> Result<i32> {
    let mut options = EvaluateOptions::at(parse_as_of(as_of, now)?);
    options.include_hints = false;
    let evaluation = evaluate_at(registry, &ledger_for(registry, None), &options)?;
    if json {
        print_json(&json!({
            "as_of": iso_utc(evaluation.as_of),
            "impact": evaluation.impact,
            "risk": evaluation.risk,
        }))?;
    } else {
        match render_impact_line(&evaluation.impact) {
            Some(line) => println!("{line}"),
            None => println!("Impact: none"),
        }
        for (rank, row) in evaluation.risk.iter().enumerate() {
            println!(
                "  #{} {} [{}] risk={:.2} dependents={}",
                rank + 1,
                row.system_id,
                row.tier,
                row.risk_score,
                row.dependents_count
            );
        }
    }
    Ok(EXIT_CLEAN)
}

fn cmd_report_health(
    registry: &Path,
    ledger: Option<PathBuf>,
    as_of: Option<&str>,
    include_hints: bool,
    json: bool,
    now: DateTime<Utc>,
) -> Result<i32> {
    let mut options = EvaluateOptions::at(parse_as_of(as_of, now)?);
    options.include_hints = include_hints;
    let evaluation = evaluate_at(registry, &ledger_for(registry, ledger), &options)?;
    if json {
        print_json(&evaluation)?;
        return Ok(EXIT_CLEAN);
    }

    println!("Health Report");
    println!("  as_of: {}", iso_utc(evaluation.as_of));
    println!(
        "  status: {} score: {:.2} strict_ready_now: {}",
        evaluation.summary.status.as_str(),
        evaluation.summary.score_total,
        evaluation.summary.strict_ready_now
    );
    if let Some(line) = render_impact_line(&evaluation.impact) {
        println!("  {line}");
    }
    if let (Some(drift), Some(severity)) = (evaluation.drift.drift, evaluation.drift.severity) {
        println!("  drift(24h): {drift} [{}]", HintSeverity::from(severity).as_str());
    }
    if !evaluation.hints.is_empty() {
        println!();
        println!("Hints");
        for hint in &evaluation.hints {
            println!("  [{}] {}: {}", hint.severity.as_str(), hint.title, hint.fix);
        }
    }
    Ok(EXIT_CLEAN)
}

fn cmd_snapshot_write(
    registry: &Path,
    ledger: Option<PathBuf>,
    as_of: Option<&str>,
    hide_samples: bool,
    policy: GatePolicy,
    now: DateTime<Utc>,
) -> Result<i32> {
    let ledger = ledger_for(registry, ledger);
    let options = EvaluateOptions {
        as_of: parse_as_of(as_of, now)?,
        policy,
        hide_samples,
        include_hints: false,
    };
    let evaluation = evaluate_at(registry, &ledger, &options)?;
    let entry = SnapshotEntry::from_evaluation(&evaluation, now);
    ledger
        .append(&entry)
        .with_context(|| format!("Failed to append to {}", ledger.path().display()))?;
    print_json(&json!({
        "ledger": ledger.path().display().to_string(),
        "snapshot": entry,
    }))?;
    Ok(EXIT_CLEAN)
}

fn cmd_snapshot_tail(ledger: &SnapshotLedger, n: usize) -> Result<i32> {
    print_json(&json!({
        "ledger": ledger.path().display().to_string(),
        "n": n,
        "rows": ledger.tail(n)?,
    }))?;
    Ok(EXIT_CLEAN)
}

fn cmd_snapshot_stats(ledger: &SnapshotLedger, days: i64, now: DateTime<Utc>) -> Result<i32> {
    print_json(&ledger.stats(days, now)?)?;
    Ok(EXIT_CLEAN)
}

fn cmd_snapshot_diff(
    ledger: &SnapshotLedger,
    a: &str,
    b: &str,
    as_of: Option<&str>,
    json: bool,
) -> Result<i32> {
    let as_of = as_of.map(require_iso_utc).transpose()?;
    match diff_from_ledger(ledger, a, b, as_of) {
        Ok(out) => {
            if json {
                print_json(&out)?;
            } else {
                print!("{}", render_pretty(&out));
            }
            Ok(EXIT_CLEAN)
        }
        Err(err @ (StewardError::NoLedgerRows { .. } | StewardError::BadRef { .. })) => {
            print_json(&diff_error_payload(&err, ledger))?;
            Ok(EXIT_USAGE)
        }
        Err(err) => Err(err.into()),
    }
}

fn cmd_operator_gate(options: &OperatorOptions, json: bool) -> Result<i32> {
    let report = run_operator_gate(options)?;
    if json {
        print_json(&report)?;
    } else {
        println!(
            "OPERATOR_GATE exit_code={} strict_failed={} regression_detected={}",
            report.exit_code, report.strict_failed, report.regression_detected
        );
        for action in &report.top_actions {
            println!(
                "  {}. [{}] {}: {}",
                action.priority,
                action.action_type.as_str(),
                action.system_id,
                action.title
            );
        }
    }
    if let Some(line) = report.strict_failure_line()? {
        eprintln!("{line}");
    }
    Ok(report.exit_code)
}

async fn cmd_portfolio_gate(options: &PortfolioOptions) -> Result<i32> {
    let runner = SubprocessGateRunner::current().context("Failed to locate steward executable")?;
    let aggregator = PortfolioAggregator::new(Arc::new(runner));
    match aggregator.run(options).await {
        Ok(report) => {
            print_json(&report)?;
            Ok(report.portfolio_exit_code)
        }
        Err(StewardError::PortfolioConfig(err)) => {
            print_json(&config_error_payload(&err))?;
            Ok(EXIT_USAGE)
        }
        Err(err) => Err(err.into()),
    }
}
