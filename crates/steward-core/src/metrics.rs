//! Global atomic counters for Steward runs.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single `tracing::info!`
//! event at the end of a command.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    systems_scored: AtomicU64,
    snapshots_appended: AtomicU64,
    repos_gated: AtomicU64,
    repo_run_errors: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            systems_scored: AtomicU64::new(0),
            snapshots_appended: AtomicU64::new(0),
            repos_gated: AtomicU64::new(0),
            repo_run_errors: AtomicU64::new(0),
        }
    }

    pub fn inc_systems_scored(&self) {
        self.systems_scored.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "systems_scored", "counter incremented");
    }

    pub fn inc_snapshots_appended(&self) {
        self.snapshots_appended.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "snapshots_appended", "counter incremented");
    }

    pub fn inc_repos_gated(&self) {
        self.repos_gated.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "repos_gated", "counter incremented");
    }

    pub fn inc_repo_run_errors(&self) {
        self.repo_run_errors.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "repo_run_errors", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            systems_scored = self.systems_scored(),
            snapshots_appended = self.snapshots_appended(),
            repos_gated = self.repos_gated(),
            repo_run_errors = self.repo_run_errors(),
        );
    }

    pub fn systems_scored(&self) -> u64 {
        self.systems_scored.load(Ordering::Relaxed)
    }

    pub fn snapshots_appended(&self) -> u64 {
        self.snapshots_appended.load(Ordering::Relaxed)
    }

    pub fn repos_gated(&self) -> u64 {
        self.repos_gated.load(Ordering::Relaxed)
    }

    pub fn repo_run_errors(&self) -> u64 {
        self.repo_run_errors.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.systems_scored.store(0, Ordering::Relaxed);
        self.snapshots_appended.store(0, Ordering::Relaxed);
        self.repos_gated.store(0, Ordering::Relaxed);
        self.repo_run_errors.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_systems_scored();
        m.inc_systems_scored();
        assert_eq!(m.systems_scored(), 2);

        m.inc_snapshots_appended();
        assert_eq!(m.snapshots_appended(), 1);

        m.inc_repos_gated();
        m.inc_repo_run_errors();
        assert_eq!(m.repos_gated(), 1);
        assert_eq!(m.repo_run_errors(), 1);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_systems_scored();
        m.inc_snapshots_appended();
        m.inc_repos_gated();
        m.inc_repo_run_errors();
        m.reset();
        assert_eq!(m.systems_scored(), 0);
        assert_eq!(m.snapshots_appended(), 0);
        assert_eq!(m.repos_gated(), 0);
        assert_eq!(m.repo_run_errors(), 0);
    }
}
