//! The "run one repository's gate" seam.
//!
//! The aggregator treats a repository gate as an opaque call returning
//! stdout, stderr and an exit code. The binary plugs in a subprocess runner;
//! [`InProcessGateRunner`] runs the pipeline on the blocking pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::digest::canonical_json;
use crate::error::{Result, StewardError};
use crate::gate::{GatePolicy, EXIT_USAGE};
use crate::operator::{run_operator_gate, OperatorOptions};
use crate::portfolio::spec::RepoSpec;
use crate::timeutil::require_iso_utc;

/// Flags forwarded to every repository gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateRequest {
    pub spec: RepoSpec,
    pub hide_samples: bool,
    pub strict: bool,
    pub enforce_sla: bool,
    pub as_of: Option<String>,
}

impl GateRequest {
    /// Command-line arguments for `steward operator gate`.
    pub fn cli_args(&self) -> Vec<String> {
        let mut args = vec![
            "operator".to_string(),
            "gate".to_string(),
            "--json".to_string(),
            "--registry".to_string(),
            self.spec.registry_path.clone(),
        ];
        if self.hide_samples {
            args.push("--hide-samples".to_string());
        }
        if !self.strict {
            args.push("--no-strict".to_string());
        }
        if self.enforce_sla {
            args.push("--enforce-sla".to_string());
        }
        if let Some(as_of) = &self.as_of {
            args.push("--as-of".to_string());
            args.push(as_of.clone());
        }
        args
    }
}

/// Raw outcome of one repository gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateRun {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Runs one repository gate. An `Err` means the gate could not execute at
/// all; policy outcomes are carried in [`GateRun::exit_code`].
#[async_trait]
pub trait GateRunner: Send + Sync {
    async fn run(&self, request: &GateRequest) -> Result<GateRun>;
}

/// Runs [`run_operator_gate`] in this process.
#[derive(Debug, Clone)]
pub struct InProcessGateRunner {
    now: DateTime<Utc>,
}

impl InProcessGateRunner {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }
}

fn gate_in_process(request: &GateRequest, now: DateTime<Utc>) -> GateRun {
    let as_of = match request.as_of.as_deref().map(require_iso_utc).transpose() {
        Ok(as_of) => as_of.unwrap_or(now),
        Err(e) => {
            return GateRun {
                exit_code: EXIT_USAGE,
                stdout: String::new(),
                stderr: e.to_string(),
            }
        }
    };
    let mut options = OperatorOptions::new(&request.spec.registry_path, now);
    options.as_of = as_of;
    options.hide_samples = request.hide_samples;
    options.policy = GatePolicy {
        strict: request.strict,
        enforce_sla: request.enforce_sla,
        ..GatePolicy::default()
    };

    let outcome = run_operator_gate(&options).and_then(|report| {
        let stdout = canonical_json(&report)?;
        let stderr = report.strict_failure_line()?.unwrap_or_default();
        Ok(GateRun {
            exit_code: report.exit_code,
            stdout,
            stderr,
        })
    });
    match outcome {
        Ok(run) => run,
        Err(e) => {
            let stderr = match &e {
                StewardError::Registry { .. } => e.registry_lines().join("\n"),
                _ => e.to_string(),
            };
            GateRun {
                exit_code: EXIT_USAGE,
                stdout: String::new(),
                stderr,
            }
        }
    }
}

#[async_trait]
impl GateRunner for InProcessGateRunner {
    async fn run(&self, request: &GateRequest) -> Result<GateRun> {
        let request = request.clone();
        let now = self.now;
        tokio::task::spawn_blocking(move || gate_in_process(&request, now))
            .await
            .map_err(|e| StewardError::Runner(format!("gate task join error: {e}")))
    }
}
