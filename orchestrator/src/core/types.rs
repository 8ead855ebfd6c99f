//! Shared deterministic types for the orchestration core.
//!
//! These types define stable contracts between the scheduler, the service
//! runner and the aggregator. They carry no I/O and serialize into the audit
//! record unchanged.

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// Provisioning action requested for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Plan,
    Apply,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Plan => "plan",
            Action::Apply => "apply",
        }
    }

    /// Capitalized name for headings and messages.
    pub fn title(self) -> &'static str {
        match self {
            Action::Plan => "Plan",
            Action::Apply => "Apply",
        }
    }

    /// The tool step that carries out this action after init.
    pub fn step(self) -> Step {
        match self {
            Action::Plan => Step::Plan,
            Action::Apply => Step::Apply,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "plan" => Ok(Action::Plan),
            "apply" => Ok(Action::Apply),
            other => Err(anyhow!("unknown action '{other}' (expected plan or apply)")),
        }
    }
}

/// One invocation of the provisioning tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Init,
    Plan,
    Apply,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::Init => "init",
            Step::Plan => "plan",
            Step::Apply => "apply",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal state of a single service attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    Success,
    Failed,
    TimedOut,
    Error,
    InitFailed,
}

impl ServiceState {
    pub fn is_success(self) -> bool {
        self == ServiceState::Success
    }

    pub fn label(self) -> &'static str {
        match self {
            ServiceState::Success => "success",
            ServiceState::Failed => "failed",
            ServiceState::TimedOut => "timed out",
            ServiceState::Error => "error",
            ServiceState::InitFailed => "init failed",
        }
    }
}

/// Resource counters extracted from the tool's summary line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDelta {
    pub created: u64,
    pub changed: u64,
    pub destroyed: u64,
}

impl ResourceDelta {
    pub fn new(created: u64, changed: u64, destroyed: u64) -> Self {
        Self {
            created,
            changed,
            destroyed,
        }
    }

    pub fn total(&self) -> u64 {
        self.created + self.changed + self.destroyed
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl fmt::Display for ResourceDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{} ~{} -{}", self.created, self.changed, self.destroyed)
    }
}

/// Outcome of one service attempt. Created once, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub service: String,
    pub state: ServiceState,
    pub success: bool,
    pub duration_ms: u64,
    pub output: String,
    pub error: Option<String>,
    pub delta: ResourceDelta,
    /// 1-indexed attempt number. There is no retry loop, so this is always 1.
    pub attempt: u32,
}

impl ExecutionResult {
    pub fn new(service: impl Into<String>, state: ServiceState) -> Self {
        Self {
            service: service.into(),
            state,
            success: state.is_success(),
            duration_ms: 0,
            output: String::new(),
            error: None,
            delta: ResourceDelta::default(),
            attempt: 1,
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_delta(mut self, delta: ResourceDelta) -> Self {
        self.delta = delta;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_ms as f64 / 1000.0
    }
}
