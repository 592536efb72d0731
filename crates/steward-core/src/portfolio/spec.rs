//! Portfolio inputs: repository specs and validated options.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::sha256_hex;
use crate::error::{PortfolioConfigError, Result};
use crate::globs::DEFAULT_REGISTRY_RELATIVE;

/// Upper bound on concurrent repository gates.
pub const MAX_JOBS: usize = 16;
/// Hex characters kept from the root path digest.
pub const REPO_HASH_LEN: usize = 12;

/// One repository to gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSpec {
    pub repo_id: String,
    pub repo_hash: String,
    pub repo_root: String,
    pub registry_path: String,
}

impl RepoSpec {
    /// Build a spec from a repository root or a registry JSON path.
    pub fn from_path(input: &str) -> RepoSpec {
        let (root, registry) = infer_root_and_registry(&normalize(Path::new(input)));
        let root = normalize(&root);
        let registry = normalize(&registry);
        let repo_root = root.display().to_string();
        let repo_id = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| repo_root.clone());
        let digest = sha256_hex(repo_root.as_bytes());
        RepoSpec {
            repo_id,
            repo_hash: digest[..REPO_HASH_LEN].to_string(),
            repo_root,
            registry_path: registry.display().to_string(),
        }
    }

    /// Ordering key `(repo_id, repo_hash, repo_root)`.
    pub fn sort_key(&self) -> (&str, &str, &str) {
        (&self.repo_id, &self.repo_hash, &self.repo_root)
    }
}

/// Canonical absolute path; falls back to joining the working directory
/// when the path does not exist.
fn normalize(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Split an input path into `(repo_root, registry_path)`.
///
/// A `.json` file is the registry itself; its root is everything before the
/// `data` component when the path runs through `data/.../registry`, otherwise
/// its parent directory. Anything else is a repository root using the
/// default registry location.
pub fn infer_root_and_registry(path: &Path) -> (PathBuf, PathBuf) {
    let is_json = path.extension().map_or(false, |ext| ext.eq_ignore_ascii_case("json"));
    if path.is_file() && is_json {
        let names: Vec<String> = path
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        let has_layout = names.iter().any(|n| n == "data") && names.iter().any(|n| n == "registry");
        let root = if has_layout {
            let mut root = PathBuf::new();
            for component in path.components() {
                if matches!(component, Component::Normal(s) if s == "data") {
                    break;
                }
                root.push(component.as_os_str());
            }
            root
        } else {
            path.parent().map(Path::to_path_buf).unwrap_or_default()
        };
        return (root, path.to_path_buf());
    }
    (path.to_path_buf(), path.join(DEFAULT_REGISTRY_RELATIVE))
}

/// Repository paths listed in a file, skipping blank lines and `#` comments.
pub fn parse_repos_file(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportMode {
    PortfolioOnly,
    WithRepoGates,
}

impl ExportMode {
    pub fn parse(value: &str) -> Option<ExportMode> {
        match value {
            "portfolio-only" => Some(ExportMode::PortfolioOnly),
            "with-repo-gates" => Some(ExportMode::WithRepoGates),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportMode::PortfolioOnly => "portfolio-only",
            ExportMode::WithRepoGates => "with-repo-gates",
        }
    }
}

/// Raw portfolio options as given on the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioOptions {
    pub repos: Vec<String>,
    pub repos_file: Option<PathBuf>,
    pub jobs: i64,
    pub fail_fast: bool,
    pub max_repos: Option<i64>,
    pub export_mode: String,
    pub export: Option<PathBuf>,
    pub hide_samples: bool,
    pub strict: bool,
    pub enforce_sla: bool,
    /// Forwarded verbatim to every repository gate.
    pub as_of: Option<String>,
    /// Bundle timestamp.
    pub now: DateTime<Utc>,
}

impl PortfolioOptions {
    pub fn new(repos: Vec<String>, now: DateTime<Utc>) -> Self {
        Self {
            repos,
            repos_file: None,
            jobs: 1,
            fail_fast: false,
            max_repos: None,
            export_mode: ExportMode::PortfolioOnly.as_str().to_string(),
            export: None,
            hide_samples: false,
            strict: true,
            enforce_sla: false,
            as_of: None,
            now,
        }
    }

    /// Validate options and resolve repository specs, sorted by
    /// `(repo_id, repo_hash, repo_root)`.
    pub fn plan(&self) -> Result<PortfolioPlan> {
        let mut paths: Vec<String> = Vec::new();
        if let Some(file) = &self.repos_file {
            paths.extend(parse_repos_file(file)?);
        }
        paths.extend(self.repos.iter().cloned());
        if paths.is_empty() {
            return Err(PortfolioConfigError::MissingRepos.into());
        }

        if let Some(max) = self.max_repos {
            if max < 1 {
                return Err(PortfolioConfigError::BadMaxRepos(max).into());
            }
            paths.truncate(max as usize);
        }

        let export_mode = ExportMode::parse(&self.export_mode)
            .ok_or_else(|| PortfolioConfigError::BadExportMode(self.export_mode.clone()))?;

        if self.jobs < 1 {
            return Err(PortfolioConfigError::BadJobs(self.jobs).into());
        }
        let jobs = (self.jobs as usize).min(MAX_JOBS);

        let mut specs: Vec<RepoSpec> = paths.iter().map(|p| RepoSpec::from_path(p)).collect();
        specs.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        Ok(PortfolioPlan {
            specs,
            jobs,
            export_mode,
        })
    }
}

/// Validated, ordered work for one portfolio run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortfolioPlan {
    pub specs: Vec<RepoSpec>,
    pub jobs: usize,
    pub export_mode: ExportMode,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StewardError;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
    }

    fn config_code(err: StewardError) -> &'static str {
        match err {
            StewardError::PortfolioConfig(e) => e.code(),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_registry_path_infers_root_before_data() {
        let dir = tempfile::tempdir().expect("tempdir");
        let reg = dir.path().join("repo/data/registry/systems.json");
        std::fs::create_dir_all(reg.parent().expect("parent")).expect("mkdir");
        std::fs::write(&reg, "[]").expect("write");

        let spec = RepoSpec::from_path(&reg.display().to_string());
        assert_eq!(spec.repo_id, "repo");
        assert!(spec.registry_path.ends_with("systems.json"));
        assert_eq!(spec.repo_hash.len(), REPO_HASH_LEN);
        assert_eq!(
            spec.repo_hash,
            sha256_hex(spec.repo_root.as_bytes())[..REPO_HASH_LEN]
        );
    }

    #[test]
    fn test_root_path_uses_default_registry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("alpha");
        std::fs::create_dir_all(&root).expect("mkdir");
        let spec = RepoSpec::from_path(&root.display().to_string());
        assert_eq!(spec.repo_id, "alpha");
        assert!(spec.registry_path.ends_with("data/registry/systems.json"));
    }

    #[test]
    fn test_repos_file_skips_comments_and_blanks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("repos.txt");
        std::fs::write(&file, "# header\n\n  /a  \n#/b\n/c\n").expect("write");
        assert_eq!(parse_repos_file(&file).expect("parse"), vec!["/a", "/c"]);
    }

    #[test]
    fn test_config_errors_in_check_order() {
        let empty = PortfolioOptions::new(vec![], now());
        assert_eq!(config_code(empty.plan().unwrap_err()), "MISSING_REPOS");

        let mut opts = PortfolioOptions::new(vec!["/x".to_string()], now());
        opts.max_repos = Some(0);
        opts.jobs = 0;
        assert_eq!(config_code(opts.plan().unwrap_err()), "BAD_MAX_REPOS");

        opts.max_repos = None;
        opts.export_mode = "everything".to_string();
        assert_eq!(config_code(opts.plan().unwrap_err()), "BAD_EXPORT_MODE");

        opts.export_mode = "with-repo-gates".to_string();
        assert_eq!(config_code(opts.plan().unwrap_err()), "BAD_JOBS");
    }

    #[test]
    fn test_plan_caps_jobs_truncates_and_sorts() {
        let mut opts = PortfolioOptions::new(
            vec!["/tmp/zeta".to_string(), "/tmp/alpha".to_string(), "/tmp/mid".to_string()],
            now(),
        );
        opts.jobs = 64;
        opts.max_repos = Some(2);
        let plan = opts.plan().expect("plan");
        assert_eq!(plan.jobs, MAX_JOBS);
        let ids: Vec<&str> = plan.specs.iter().map(|s| s.repo_id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
        assert_eq!(plan.export_mode, ExportMode::PortfolioOnly);
    }
}
