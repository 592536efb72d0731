//! Structured observability hooks for Steward gate lifecycle events.
//!
//! This module provides:
//! - Gate-scoped tracing spans via the `GateSpan` RAII guard
//! - Emission functions for key lifecycle events: registry load, scoring,
//!   gate verdicts, snapshot appends and portfolio progress
//!
//! Events are emitted at `info!` level (filter with `RUST_LOG`). For JSON
//! output pass `--log-json` to the binary.

use std::path::Path;

use tracing::info;

use crate::gate::GateVerdict;
use crate::health::HealthResult;

/// RAII guard that enters a gate-scoped span for the duration of one
/// repository evaluation.
///
/// # Example
///
/// ```ignore
/// let _span = GateSpan::enter("data/registry/systems.json");
/// // every event below carries target=... and a fresh gate_id
/// ```
pub struct GateSpan {
    _span: tracing::span::EnteredSpan,
}

impl GateSpan {
    /// Create and enter a span tagged with `target` and a random gate id.
    pub fn enter(target: &str) -> Self {
        let gate_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("steward.gate", target = %target, gate_id = %gate_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: registry loaded and validated.
pub fn emit_registry_loaded(path: &Path, systems: usize) {
    info!(event = "registry.loaded", path = %path.display(), systems = systems);
}

/// Emit event: one system scored.
pub fn emit_health_scored(result: &HealthResult) {
    crate::metrics::METRICS.inc_systems_scored();
    tracing::debug!(
        event = "health.scored",
        system_id = %result.system_id,
        score_total = result.score_total,
        status = %result.status.as_str(),
        violations = result.violations.len(),
    );
}

/// Emit event: strict gate evaluated.
pub fn emit_gate_evaluated(verdict: &GateVerdict) {
    info!(
        event = "gate.evaluated",
        reasons = verdict.reasons.len(),
        strict_failed = verdict.strict_failed,
    );
}

/// Emit event: snapshot appended to the ledger.
pub fn emit_snapshot_appended(ledger: &Path, ts: &str, systems: usize) {
    info!(
        event = "snapshot.appended",
        ledger = %ledger.display(),
        ts = %ts,
        systems = systems,
    );
}

/// Emit event: one portfolio repository finished.
pub fn emit_portfolio_repo_finished(repo_id: &str, repo_hash: &str, exit_code: i32, duration_ms: u64) {
    info!(
        event = "portfolio.repo_finished",
        repo_id = %repo_id,
        repo_hash = %repo_hash,
        exit_code = exit_code,
        duration_ms = duration_ms,
    );
}

/// Emit event: a repository's gate could not run (warning level).
pub fn emit_portfolio_repo_error(repo_id: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "portfolio.repo_error", repo_id = %repo_id, error = %error);
}

/// Emit event: portfolio aggregation finished.
pub fn emit_portfolio_finished(repos: usize, portfolio_exit_code: i32, skipped: usize) {
    info!(
        event = "portfolio.finished",
        repos = repos,
        portfolio_exit_code = portfolio_exit_code,
        skipped = skipped,
    );
}
