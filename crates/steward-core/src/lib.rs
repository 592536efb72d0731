//! Steward Core Library
//!
//! Deterministic governance for a registry of systems: discipline scoring,
//! dependency impact, tier-aware strict gating, a snapshot ledger with diffs
//! and drift, and portfolio aggregation across repositories.

pub mod diff;
pub mod digest;
pub mod drift;
pub mod error;
pub mod evaluate;
pub mod export;
pub mod gate;
pub mod globs;
pub mod graph;
pub mod health;
pub mod hints;
pub mod impact;
pub mod ledger;
pub mod metrics;
pub mod obs;
pub mod operator;
pub mod portfolio;
pub mod registry;
pub mod sla;
pub mod sources;
pub mod telemetry;
pub mod timeutil;
pub mod validate;

pub use diff::{
    diff_entries, diff_from_ledger, rank_actions, Action, ActionType, LedgerDiff, RankDelta,
    SnapshotDiff, SnapshotRef, StatusChange,
};
pub use error::{PortfolioConfigError, RegistryError, Result, StewardError};
pub use evaluate::{evaluate, evaluate_registry, EvaluateOptions, Evaluation, RepoInputs};
pub use export::{verify_bundle, BundleMeta, BundleWriter};
pub use gate::{
    evaluate_gate, exit_code, GatePolicy, GateVerdict, ReasonCode, StrictFailure, StrictReason,
};
pub use graph::SystemGraph;
pub use health::{score_system, HealthResult, HealthStatus, ViolationCode};
pub use impact::{compute_impact, rank_risk, ImpactResult, RiskRow};
pub use ledger::{LedgerStats, SnapshotEntry, SnapshotLedger};
pub use operator::{run_operator_gate, OperatorOptions, OperatorReport};
pub use portfolio::{
    GateRequest, GateRun, GateRunner, InProcessGateRunner, PortfolioAggregator, PortfolioOptions,
    PortfolioReport, RepoSpec,
};
pub use registry::{Registry, System, Tier};
pub use sla::{sla_status, SlaStatus, SlaThresholds};
pub use validate::{validate_repo, ValidationReport};

/// Crate version reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
