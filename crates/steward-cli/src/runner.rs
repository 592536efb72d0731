//! Subprocess-backed repository gate.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use steward_core::portfolio::{GateRequest, GateRun, GateRunner};
use steward_core::{Result, StewardError};
use tokio::process::Command;

/// Runs `steward operator gate --json` for each repository, using this
/// executable.
pub struct SubprocessGateRunner {
    exe: PathBuf,
}

impl SubprocessGateRunner {
    pub fn new(exe: PathBuf) -> Self {
        Self { exe }
    }

    pub fn current() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }
}

#[async_trait]
impl GateRunner for SubprocessGateRunner {
    async fn run(&self, request: &GateRequest) -> Result<GateRun> {
        // Child logs would otherwise interleave into the captured stderr.
        let output = Command::new(&self.exe)
            .args(request.cli_args())
            .current_dir(&request.spec.repo_root)
            .env("RUST_LOG", "off")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| StewardError::Runner(format!("{}: {e}", self.exe.display())))?;

        Ok(GateRun {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
