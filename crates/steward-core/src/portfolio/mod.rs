//! Portfolio gate: one strict gate per repository, merged deterministically.
//!
//! - [`spec`] turns raw paths and flags into a validated, sorted plan
//! - [`runner`] is the seam that runs a single repository gate
//! - [`aggregator`] drives the bounded worker pool and builds the report

pub mod aggregator;
pub mod runner;
pub mod spec;

pub use aggregator::{
    config_error_payload, merge_top_actions, portfolio_exit_code, PortfolioAggregator,
    PortfolioArtifacts, PortfolioEntry, PortfolioPolicy, PortfolioReport, StableGate,
    PORTFOLIO_COMMAND, PORTFOLIO_REPORT_FILE, PORTFOLIO_SCHEMA_VERSION,
};
pub use runner::{GateRequest, GateRun, GateRunner, InProcessGateRunner};
pub use spec::{
    infer_root_and_registry, parse_repos_file, ExportMode, PortfolioOptions, PortfolioPlan,
    RepoSpec, MAX_JOBS, REPO_HASH_LEN,
};
