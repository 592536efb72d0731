//! Integration tests for portfolio aggregation.
//!
//! Stub runners exercise the worker pool and fail-fast logic without real
//! repositories; the in-process runner covers end-to-end determinism.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};
use steward_core::digest::canonical_json;
use steward_core::export::verify_bundle;
use steward_core::portfolio::{
    GateRequest, GateRun, GateRunner, InProcessGateRunner, PortfolioAggregator, PortfolioOptions,
};
use steward_core::{PortfolioConfigError, Result, StewardError};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn gate_stdout(exit_code: i32) -> String {
    json!({
        "command": "operator_gate",
        "schema_version": "1.0",
        "exit_code": exit_code,
        "strict_failed": matches!(exit_code, 2 | 4),
        "regression_detected": matches!(exit_code, 3 | 4),
        "top_actions": [],
        "strict_reasons": [],
    })
    .to_string()
}

/// Runner returning scripted exit codes per repo id, tracking concurrency.
struct StubRunner {
    exits: BTreeMap<String, i32>,
    delays_ms: BTreeMap<String, u64>,
    fail: Vec<String>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StubRunner {
    fn new(exits: &[(&str, i32)]) -> Self {
        Self {
            exits: exits.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            delays_ms: BTreeMap::new(),
            fail: Vec::new(),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn with_delays(mut self, delays: &[(&str, u64)]) -> Self {
        self.delays_ms = delays.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GateRunner for StubRunner {
    async fn run(&self, request: &GateRequest) -> Result<GateRun> {
        let id = request.spec.repo_id.clone();
        self.calls.lock().unwrap().push(id.clone());
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(ms) = self.delays_ms.get(&id) {
            tokio::time::sleep(StdDuration::from_millis(*ms)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail.contains(&id) {
            return Err(StewardError::Runner(format!("cannot spawn gate for {id}")));
        }
        let exit_code = self.exits.get(&id).copied().unwrap_or(0);
        Ok(GateRun {
            exit_code,
            stdout: gate_stdout(exit_code),
            stderr: String::new(),
        })
    }
}

fn repo_dirs(root: &Path, names: &[&str]) -> Vec<String> {
    names
        .iter()
        .map(|n| {
            let p = root.join(n);
            std::fs::create_dir_all(&p).unwrap();
            p.display().to_string()
        })
        .collect()
}

fn ids(report: &steward_core::PortfolioReport) -> Vec<String> {
    report.repos.iter().map(|e| e.repo.repo_id.clone()).collect()
}

// ---- Pool behavior ----

#[tokio::test]
async fn output_is_sorted_regardless_of_completion_order() {
    let dir = tempfile::tempdir().unwrap();
    // Input order is scrambled and the first repo finishes last.
    let repos = repo_dirs(dir.path(), &["gamma", "alpha", "beta"]);
    let stub = StubRunner::new(&[("beta", 3)])
        .with_delays(&[("alpha", 60), ("beta", 30), ("gamma", 1)]);
    let aggregator = PortfolioAggregator::new(Arc::new(stub));

    let mut opts = PortfolioOptions::new(repos, now());
    opts.jobs = 3;
    let report = aggregator.run(&opts).await.expect("portfolio");
    assert_eq!(ids(&report), vec!["alpha", "beta", "gamma"]);
    assert_eq!(report.portfolio_exit_code, 3);
    assert_eq!(report.policy.jobs, 3);
}

#[tokio::test]
async fn jobs_do_not_change_repos_or_actions() {
    let dir = tempfile::tempdir().unwrap();
    let repos = repo_dirs(dir.path(), &["a", "b", "c", "d", "e"]);
    let exits = [("b", 2), ("d", 3)];
    let delays = [("a", 40), ("b", 5), ("c", 25), ("d", 1), ("e", 10)];

    let mut outputs = Vec::new();
    for jobs in [1, 2, 4, 8] {
        let stub = StubRunner::new(&exits).with_delays(&delays);
        let aggregator = PortfolioAggregator::new(Arc::new(stub));
        let mut opts = PortfolioOptions::new(repos.clone(), now());
        opts.jobs = jobs;
        let report = aggregator.run(&opts).await.expect("portfolio");
        assert_eq!(report.portfolio_exit_code, 4);
        outputs.push(canonical_json(&(&report.repos, &report.top_actions)).unwrap());
    }
    assert!(outputs.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test]
async fn in_flight_gates_never_exceed_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let names = ["r1", "r2", "r3", "r4", "r5", "r6"];
    let repos = repo_dirs(dir.path(), &names);
    let delays: Vec<(&str, u64)> = names.iter().map(|n| (*n, 20)).collect();
    let stub = Arc::new(StubRunner::new(&[]).with_delays(&delays));
    let aggregator = PortfolioAggregator::new(stub.clone());

    let mut opts = PortfolioOptions::new(repos, now());
    opts.jobs = 2;
    let report = aggregator.run(&opts).await.expect("portfolio");
    assert_eq!(report.repos.len(), 6);
    assert!(stub.max_in_flight.load(Ordering::SeqCst) <= 2);
    assert_eq!(report.portfolio_exit_code, 0);
}

// ---- Fail-fast ----

#[tokio::test]
async fn fail_fast_with_one_job_stops_after_first_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let repos = repo_dirs(dir.path(), &["a", "b", "c"]);
    let stub = Arc::new(StubRunner::new(&[("b", 2)]));
    let aggregator = PortfolioAggregator::new(stub.clone());

    let mut opts = PortfolioOptions::new(repos, now());
    opts.fail_fast = true;
    let report = aggregator.run(&opts).await.expect("portfolio");
    assert_eq!(ids(&report), vec!["a", "b"]);
    assert_eq!(stub.calls(), vec!["a", "b"]);
    assert_eq!(report.portfolio_exit_code, 2);
    assert!(report.policy.fail_fast);
}

#[tokio::test]
async fn without_fail_fast_every_repo_runs() {
    let dir = tempfile::tempdir().unwrap();
    let repos = repo_dirs(dir.path(), &["a", "b", "c"]);
    let stub = Arc::new(StubRunner::new(&[("a", 3)]));
    let aggregator = PortfolioAggregator::new(stub.clone());

    let report = aggregator
        .run(&PortfolioOptions::new(repos, now()))
        .await
        .expect("portfolio");
    assert_eq!(report.repos.len(), 3);
    assert_eq!(stub.calls().len(), 3);
}

// ---- Runner failures ----

#[tokio::test]
async fn runner_error_is_isolated_to_its_repo() {
    let dir = tempfile::tempdir().unwrap();
    let repos = repo_dirs(dir.path(), &["a", "b"]);
    let mut stub = StubRunner::new(&[]);
    stub.fail = vec!["a".to_string()];
    let aggregator = PortfolioAggregator::new(Arc::new(stub));

    let report = aggregator
        .run(&PortfolioOptions::new(repos, now()))
        .await
        .expect("portfolio");
    let a = &report.repos[0];
    assert_eq!(a.exit_code, 1);
    assert!(a.stderr.starts_with("RUN_ERROR: "));
    assert_eq!(report.repos[1].exit_code, 0);
    assert_eq!(report.portfolio_exit_code, 1);
}

#[tokio::test]
async fn config_errors_run_nothing() {
    let stub = Arc::new(StubRunner::new(&[]));
    let aggregator = PortfolioAggregator::new(stub.clone());

    let err = aggregator
        .run(&PortfolioOptions::new(vec![], now()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StewardError::PortfolioConfig(PortfolioConfigError::MissingRepos)
    ));

    let mut opts = PortfolioOptions::new(vec!["/tmp/x".to_string()], now());
    opts.jobs = 0;
    let err = aggregator.run(&opts).await.unwrap_err();
    assert_eq!(err.code(), "BAD_JOBS");
    assert!(stub.calls().is_empty());
}

// ---- End to end with the in-process runner ----

fn write(path: &Path, body: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

/// Repository with one prod system; `healthy` decides whether it has a
/// contract (green) or not (red).
fn gated_repo(root: &Path, name: &str, healthy: bool) -> PathBuf {
    let repo = root.join(name);
    for schema in ["a", "b", "c"] {
        write(
            &repo.join(format!("data/primitives/schemas/{schema}.json")),
            r#"{"type": "object"}"#,
        );
    }
    write(&repo.join("data/primitives/invariants.yaml"), "- id: I1\n- id: I2\n");
    write(
        &repo.join("data/registry/systems.json"),
        &json!([{
            "system_id": "svc",
            "contracts_glob": "data/contracts/*.json",
            "events_glob": "data/events/*.jsonl",
            "tier": "prod",
        }])
        .to_string(),
    );
    if healthy {
        write(
            &repo.join("data/contracts/svc.json"),
            &json!({
                "contract_id": "svc-1",
                "system_id": "svc",
                "primitives_used": ["P0", "P1", "P2"],
                "invariants": ["I1", "I2", "I3"],
            })
            .to_string(),
        );
    }
    let ts = (now() - Duration::days(1)).to_rfc3339();
    write(
        &repo.join("data/events/svc.jsonl"),
        &format!("{}\n", json!({"ts": ts, "system_id": "svc"})),
    );
    repo
}

#[tokio::test]
async fn in_process_portfolio_is_byte_identical_across_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let repos: Vec<String> = [("zeta", true), ("alpha", false), ("mid", true)]
        .iter()
        .map(|(n, ok)| gated_repo(dir.path(), n, *ok).display().to_string())
        .collect();

    let mut rendered = Vec::new();
    for jobs in [1, 3, 3] {
        let aggregator = PortfolioAggregator::new(Arc::new(InProcessGateRunner::new(now())));
        let mut opts = PortfolioOptions::new(repos.clone(), now());
        opts.jobs = jobs;
        opts.as_of = Some("2026-03-01T12:00:00Z".to_string());
        let report = aggregator.run(&opts).await.expect("portfolio");
        assert_eq!(report.portfolio_exit_code, 2);
        assert_eq!(ids(&report), vec!["alpha", "mid", "zeta"]);
        assert!(report.repos[0].gate_result.strict_failed);
        assert_eq!(report.repos[0].gate_result.strict_reasons[0].system_id, "svc");
        rendered.push((
            canonical_json(&report.repos).unwrap(),
            canonical_json(&report).unwrap(),
        ));
    }
    assert_eq!(rendered[0].0, rendered[1].0);
    assert_eq!(rendered[1], rendered[2]);
}

#[tokio::test]
async fn input_order_and_jobs_do_not_change_in_process_output() {
    let dir = tempfile::tempdir().unwrap();
    let paths: Vec<String> = [("zeta", true), ("alpha", false), ("mid", true), ("beta", false)]
        .iter()
        .map(|(n, ok)| gated_repo(dir.path(), n, *ok).display().to_string())
        .collect();
    let orders = [[0, 1, 2, 3], [3, 2, 1, 0], [2, 0, 3, 1], [1, 3, 0, 2]];

    let mut first: Option<(String, String)> = None;
    for order in &orders {
        let repos: Vec<String> = order.iter().map(|&i| paths[i].clone()).collect();
        for jobs in [1, 2, 4, 8] {
            let aggregator =
                PortfolioAggregator::new(Arc::new(InProcessGateRunner::new(now())));
            let mut opts = PortfolioOptions::new(repos.clone(), now());
            opts.jobs = jobs;
            opts.as_of = Some("2026-03-01T12:00:00Z".to_string());
            let report = aggregator.run(&opts).await.expect("portfolio");
            assert_eq!(ids(&report), vec!["alpha", "beta", "mid", "zeta"]);

            let rendered = (
                canonical_json(&report.repos).unwrap(),
                canonical_json(&report.top_actions).unwrap(),
            );
            match &first {
                None => first = Some(rendered),
                Some(expected) => {
                    assert_eq!(expected, &rendered, "order {order:?} with {jobs} jobs")
                }
            }
        }
    }
}

#[tokio::test]
async fn duplicate_repo_paths_render_identically_on_every_run() {
    let dir = tempfile::tempdir().unwrap();
    let alpha = gated_repo(dir.path(), "alpha", false).display().to_string();

    let mut rendered = Vec::new();
    for _ in 0..2 {
        let aggregator = PortfolioAggregator::new(Arc::new(InProcessGateRunner::new(now())));
        let mut opts = PortfolioOptions::new(vec![alpha.clone(), alpha.clone()], now());
        opts.jobs = 4;
        opts.as_of = Some("2026-03-01T12:00:00Z".to_string());
        let report = aggregator.run(&opts).await.expect("portfolio");
        assert_eq!(ids(&report), vec!["alpha", "alpha"]);
        assert_eq!(report.repos[0], report.repos[1]);
        assert_eq!(report.portfolio_exit_code, 2);
        rendered.push(canonical_json(&report).unwrap());
    }
    assert_eq!(rendered[0], rendered[1]);
}

#[tokio::test]
async fn export_with_repo_gates_writes_one_file_per_repo() {
    let dir = tempfile::tempdir().unwrap();
    let repos: Vec<String> = ["one", "two"]
        .iter()
        .map(|n| gated_repo(dir.path(), n, true).display().to_string())
        .collect();
    let out = dir.path().join("bundle");

    let aggregator = PortfolioAggregator::new(Arc::new(InProcessGateRunner::new(now())));
    let mut opts = PortfolioOptions::new(repos, now());
    opts.export = Some(out.clone());
    opts.export_mode = "with-repo-gates".to_string();
    let report = aggregator.run(&opts).await.expect("portfolio");
    assert_eq!(report.portfolio_exit_code, 0);
    assert!(report.artifacts.exported);

    assert!(out.join("portfolio_gate.json").is_file());
    for entry in &report.repos {
        let path = out.join(format!("repo_{}_operator_gate.json", entry.repo.repo_hash));
        let gate: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(gate["command"], "operator_gate");
        assert_eq!(gate["exit_code"], 0);
    }
    assert!(verify_bundle(&out).unwrap().is_empty());

    let meta: Value =
        serde_json::from_str(&std::fs::read_to_string(out.join("bundle_meta.json")).unwrap())
            .unwrap();
    assert_eq!(meta["artifacts"].as_array().unwrap().len(), 4);
}
