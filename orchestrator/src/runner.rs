//! Per-service execution: `init`, then `plan` or `apply`.
//!
//! ```text
//! Init ──(exit != 0)──> InitFailed
//!   │
//!   └──> RunAction ──> Success | Failed | TimedOut
//! (timeout on either step)  ──> TimedOut
//! (orchestration fault)     ──> Error
//! ```
//!
//! [`ServiceRunner::run`] always returns an [`ExecutionResult`]; faults,
//! including panics inside the tool, are recorded in the result and never
//! escape to sibling executions.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::time::Instant;

use anyhow::{Result, anyhow};
use tracing::{debug, error, info, instrument, warn};

use crate::core::summary::SummaryParser;
use crate::core::types::{Action, ExecutionResult, ResourceDelta, ServiceState, Step};
use crate::io::config::TimeoutConfig;
use crate::io::tool::{ProvisionTool, ToolOutput, ToolRequest};

/// Inputs shared by every service in a run.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub action: Action,
    pub region: String,
    pub timeouts: TimeoutConfig,
    pub output_limit_bytes: usize,
}

/// How the action step's exit code maps onto a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionExit {
    /// `plan` exited 0: nothing to change, counters stay zero.
    NoChanges,
    /// `plan` exited 2 or `apply` exited 0: counters come from the summary.
    Changed,
    Failed,
}

/// Classify an action step's exit code.
///
/// `plan` uses detailed exit codes (0 = no changes, 2 = changes present);
/// `apply` succeeds only on 0. A missing code (killed by signal) is a failure.
pub fn classify_action_exit(action: Action, exit_code: Option<i32>) -> ActionExit {
    match (action, exit_code) {
        (Action::Plan, Some(0)) => ActionExit::NoChanges,
        (Action::Plan, Some(2)) => ActionExit::Changed,
        (Action::Apply, Some(0)) => ActionExit::Changed,
        _ => ActionExit::Failed,
    }
}

/// Runs the two-step provisioning sequence for one service.
///
/// Not safe to run twice concurrently for the same directory; the engine
/// never schedules a service more than once per run.
pub struct ServiceRunner<'a, T: ProvisionTool> {
    tool: &'a T,
    parser: &'a dyn SummaryParser,
    settings: RunnerSettings,
}

impl<'a, T: ProvisionTool> ServiceRunner<'a, T> {
    pub fn new(tool: &'a T, parser: &'a dyn SummaryParser, settings: RunnerSettings) -> Self {
        Self {
            tool,
            parser,
            settings,
        }
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Run `service` in `dir` and return its terminal result.
    #[instrument(skip_all, fields(service = %service, action = %self.settings.action))]
    pub fn run(&self, service: &str, dir: &Path) -> ExecutionResult {
        let start = Instant::now();
        info!("service started");
        let attempt = panic::catch_unwind(AssertUnwindSafe(|| self.try_run(service, dir)));
        let result = match attempt {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                warn!(err = %format!("{err:#}"), "service errored");
                ExecutionResult::new(service, ServiceState::Error).with_error(format!("{err:#}"))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(panic = %message, "service panicked");
                ExecutionResult::new(service, ServiceState::Error)
                    .with_error(format!("unexpected panic: {message}"))
            }
        };
        let result = result.with_duration_ms(start.elapsed().as_millis() as u64);
        info!(state = ?result.state, duration_ms = result.duration_ms, "service finished");
        result
    }

    fn try_run(&self, service: &str, dir: &Path) -> Result<ExecutionResult> {
        if !dir.is_dir() {
            return Err(anyhow!("service directory {} not found", dir.display()));
        }

        let init = self.tool.invoke(Step::Init, &self.request(service, dir, Step::Init))?;
        if init.timed_out {
            return Ok(self.timed_out(service, Step::Init, &init));
        }
        if init.exit_code != Some(0) {
            warn!(exit_code = %init.exit_code_label(), "init failed");
            return Ok(ExecutionResult::new(service, ServiceState::InitFailed)
                .with_output(format!("{}{}", init.stdout, init.stderr))
                .with_error(format!("Init failed: {}", init.stderr.trim_end())));
        }
        debug!("init complete");

        let action = self.settings.action;
        let step = action.step();
        let output = self.tool.invoke(step, &self.request(service, dir, step))?;
        if output.timed_out {
            return Ok(self.timed_out(service, step, &output));
        }

        let result = match classify_action_exit(action, output.exit_code) {
            ActionExit::NoChanges => ExecutionResult::new(service, ServiceState::Success)
                .with_output(output.stdout)
                .with_delta(ResourceDelta::default()),
            ActionExit::Changed => {
                let delta = self.parser.parse(action, &output.stdout);
                ExecutionResult::new(service, ServiceState::Success)
                    .with_output(output.stdout)
                    .with_delta(delta)
            }
            ActionExit::Failed => {
                warn!(exit_code = %output.exit_code_label(), "{action} failed");
                ExecutionResult::new(service, ServiceState::Failed)
                    .with_error(format!(
                        "{} failed (exit code {}): {}",
                        action.title(),
                        output.exit_code_label(),
                        output.stderr.trim_end()
                    ))
                    .with_output(format!("{}\n\nSTDERR:\n{}", output.stdout, output.stderr))
            }
        };
        Ok(result)
    }

    fn timed_out(&self, service: &str, step: Step, output: &ToolOutput) -> ExecutionResult {
        let limit = self.settings.timeouts.for_step(step);
        warn!(step = %step, timeout_secs = limit.as_secs(), "step timed out");
        ExecutionResult::new(service, ServiceState::TimedOut)
            .with_output(format!("{}{}", output.stdout, output.stderr))
            .with_error(format!("{step} timed out after {}s", limit.as_secs()))
    }

    fn request(&self, service: &str, dir: &Path, step: Step) -> ToolRequest {
        ToolRequest {
            service: service.to_string(),
            workdir: dir.to_path_buf(),
            region: self.settings.region.clone(),
            timeout: self.settings.timeouts.for_step(step),
            output_limit_bytes: self.settings.output_limit_bytes,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
