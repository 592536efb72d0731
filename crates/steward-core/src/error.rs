//! Error taxonomy for Steward.
//!
//! Structural registry problems are collected as [`RegistryError`] values and
//! surfaced together through [`StewardError::Registry`]. Policy failures and
//! regressions are not errors: they are well-formed outcomes carried by the
//! gate report and its exit code.

use thiserror::Error;

/// One structural defect found while loading a registry.
///
/// `Display` renders the stable `CODE: detail` form used in reports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("REGISTRY_MISSING: {path}")]
    Missing { path: String },

    #[error("REGISTRY_PARSE_ERROR: {path}: {detail}")]
    Parse { path: String, detail: String },

    #[error("REGISTRY_SCHEMA_INVALID: {detail}")]
    SchemaInvalid { detail: String },

    #[error("REGISTRY_DUPLICATE_SYSTEM_ID: {system_id}")]
    DuplicateSystemId { system_id: String },

    #[error("REGISTRY_TIER_INVALID: {system_id}: {tier}")]
    TierInvalid { system_id: String, tier: String },

    #[error("REGISTRY_DEPENDENCY_INVALID: {system_id}")]
    DependencyInvalid { system_id: String },

    #[error("REGISTRY_DEPENDENCY_MISSING: {system_id}: {dependency}")]
    DependencyMissing {
        system_id: String,
        dependency: String,
    },

    #[error("REGISTRY_CYCLE_DETECTED: {}", path.join(" -> "))]
    CycleDetected { path: Vec<String> },
}

impl RegistryError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::Missing { .. } => "REGISTRY_MISSING",
            RegistryError::Parse { .. } => "REGISTRY_PARSE_ERROR",
            RegistryError::SchemaInvalid { .. } => "REGISTRY_SCHEMA_INVALID",
            RegistryError::DuplicateSystemId { .. } => "REGISTRY_DUPLICATE_SYSTEM_ID",
            RegistryError::TierInvalid { .. } => "REGISTRY_TIER_INVALID",
            RegistryError::DependencyInvalid { .. } => "REGISTRY_DEPENDENCY_INVALID",
            RegistryError::DependencyMissing { .. } => "REGISTRY_DEPENDENCY_MISSING",
            RegistryError::CycleDetected { .. } => "REGISTRY_CYCLE_DETECTED",
        }
    }
}

/// Portfolio configuration problems detected before any repository runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortfolioConfigError {
    #[error("portfolio-gate requires --repos and/or --repos-file")]
    MissingRepos,

    #[error("--max-repos must be >= 1 (got {0})")]
    BadMaxRepos(i64),

    #[error("--export-mode must be one of: portfolio-only, with-repo-gates (got {0})")]
    BadExportMode(String),

    #[error("--jobs must be >= 1 (got {0})")]
    BadJobs(i64),
}

impl PortfolioConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            PortfolioConfigError::MissingRepos => "MISSING_REPOS",
            PortfolioConfigError::BadMaxRepos(_) => "BAD_MAX_REPOS",
            PortfolioConfigError::BadExportMode(_) => "BAD_EXPORT_MODE",
            PortfolioConfigError::BadJobs(_) => "BAD_JOBS",
        }
    }

    /// Remediation hint shown in the structured error payload.
    pub fn hint(&self) -> &'static str {
        match self {
            PortfolioConfigError::MissingRepos => "portfolio-gate requires --repos and/or --repos-file",
            PortfolioConfigError::BadMaxRepos(_) => "--max-repos must be >= 1",
            PortfolioConfigError::BadExportMode(_) => {
                "--export-mode must be one of: portfolio-only, with-repo-gates"
            }
            PortfolioConfigError::BadJobs(_) => "--jobs must be >= 1",
        }
    }
}

/// Steward library errors.
#[derive(Debug, Error)]
pub enum StewardError {
    #[error("registry validation failed with {} error(s)", errors.len())]
    Registry { errors: Vec<RegistryError> },

    #[error("no ledger rows in {ledger}")]
    NoLedgerRows { ledger: String },

    #[error("cannot resolve snapshot refs a={a} b={b}")]
    BadRef { a: String, b: String },

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("portfolio configuration error: {0}")]
    PortfolioConfig(#[from] PortfolioConfigError),

    #[error("gate runner error: {0}")]
    Runner(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StewardError {
    /// Stable machine-readable code for structured error output.
    pub fn code(&self) -> &'static str {
        match self {
            StewardError::Registry { .. } => "REGISTRY_INVALID",
            StewardError::NoLedgerRows { .. } => "NO_LEDGER_ROWS",
            StewardError::BadRef { .. } => "BAD_REF",
            StewardError::InvalidTimestamp(_) => "BAD_TIMESTAMP",
            StewardError::PortfolioConfig(e) => e.code(),
            StewardError::Runner(_) => "RUN_ERROR",
            StewardError::Serialization(_) => "SERIALIZATION_ERROR",
            StewardError::Io(_) => "IO_ERROR",
        }
    }

    /// Registry errors rendered as sorted `CODE: detail` lines.
    pub fn registry_lines(&self) -> Vec<String> {
        match self {
            StewardError::Registry { errors } => {
                let mut lines: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
                lines.sort();
                lines
            }
            _ => Vec::new(),
        }
    }
}

/// Result type for Steward operations.
pub type Result<T> = std::result::Result<T, StewardError>;
