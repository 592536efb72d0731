//! Registry-relative glob resolution.
//!
//! Relative patterns resolve against the registry's own context. With the
//! default `<root>/data/registry/systems.json` layout, `data/...` patterns
//! resolve against the repository root; everything else resolves against
//! the registry file's directory.

use std::path::{Component, Path, PathBuf};

/// Relative location of the registry inside a repository.
pub const DEFAULT_REGISTRY_RELATIVE: &str = "data/registry/systems.json";

/// True when `registry` ends with `data/registry/systems.json`.
pub fn is_default_layout(registry: &Path) -> bool {
    let tail: Vec<String> = registry
        .components()
        .rev()
        .take(3)
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    tail.len() == 3 && tail[0] == "systems.json" && tail[1] == "registry" && tail[2] == "data"
}

/// Directory that owns the registry: the repository root for the default
/// layout, otherwise the registry's parent directory.
pub fn registry_root(registry: &Path) -> PathBuf {
    let parent = registry.parent().unwrap_or_else(|| Path::new("."));
    if is_default_layout(registry) {
        parent
            .parent()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| parent.to_path_buf())
    } else {
        parent.to_path_buf()
    }
}

/// Resolve `pattern` into an absolute-or-registry-relative glob pattern.
pub fn resolve_pattern(pattern: &str, registry: &Path) -> PathBuf {
    let candidate = Path::new(pattern);
    if candidate.is_absolute() {
        return candidate.to_path_buf();
    }
    let normalized = pattern.replace('\\', "/");
    let base = if is_default_layout(registry) && normalized.starts_with("data/") {
        registry_root(registry)
    } else {
        registry
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    };
    base.join(candidate)
}

/// Sorted regular files matching `pattern`.
///
/// Returns an error only when the pattern itself is malformed.
pub fn iter_glob(pattern: &str, registry: &Path) -> Result<Vec<PathBuf>, glob::PatternError> {
    let resolved = resolve_pattern(pattern, registry);
    let resolved = resolved.to_string_lossy();
    let mut out: Vec<PathBuf> = glob::glob(&resolved)?
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_file())
        .collect();
    out.sort();
    Ok(out)
}
