//! Provisioning tool abstraction.
//!
//! The [`ProvisionTool`] trait decouples the service runner from the actual
//! tool backend (currently the `terraform` CLI). Tests use scripted tools that
//! return predetermined outputs without spawning processes.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use crate::core::types::Step;
use crate::io::config::ToolConfig;
use crate::io::process::run_command_with_timeout;

/// Parameters for a single tool invocation.
#[derive(Debug, Clone)]
pub struct ToolRequest {
    pub service: String,
    /// Service directory the tool runs in.
    pub workdir: PathBuf,
    /// Forwarded to the tool as `TF_VAR_region`.
    pub region: String,
    /// Hard cutoff for this step.
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// What the tool reported for one step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code, or `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ToolOutput {
    pub fn exit_code_label(&self) -> String {
        self.exit_code
            .map(|code| code.to_string())
            .unwrap_or_else(|| "signal".to_string())
    }
}

/// Abstraction over provisioning tool backends.
///
/// Implementations are shared across worker threads within a level.
pub trait ProvisionTool: Sync {
    /// Run `step` for the service described by `request`.
    ///
    /// Returns `Err` only for orchestration faults (spawn failure, I/O); the
    /// tool's own failures are reported through [`ToolOutput::exit_code`].
    fn invoke(&self, step: Step, request: &ToolRequest) -> Result<ToolOutput>;
}

/// Tool that spawns the configured CLI (default `terraform`).
#[derive(Debug, Clone)]
pub struct TerraformTool {
    config: ToolConfig,
}

impl TerraformTool {
    pub fn new(config: ToolConfig) -> Self {
        Self { config }
    }
}

impl ProvisionTool for TerraformTool {
    #[instrument(skip_all, fields(service = %request.service, step = %step, timeout_secs = request.timeout.as_secs()))]
    fn invoke(&self, step: Step, request: &ToolRequest) -> Result<ToolOutput> {
        let args = self.config.args_for(step);
        debug!(program = %self.config.program, args = %args.join(" "), "invoking tool");

        let mut cmd = Command::new(&self.config.program);
        cmd.args(args)
            .current_dir(&request.workdir)
            .env("TF_VAR_region", &request.region)
            .env("TF_IN_AUTOMATION", "1");

        let output = run_command_with_timeout(cmd, request.timeout, request.output_limit_bytes)
            .with_context(|| format!("run {} {}", self.config.program, step))?;

        if output.timed_out {
            warn!("tool step timed out");
        }
        Ok(ToolOutput {
            exit_code: output.status.code(),
            stdout: output.stdout_lossy(),
            stderr: output.stderr_lossy(),
            timed_out: output.timed_out,
        })
    }
}
