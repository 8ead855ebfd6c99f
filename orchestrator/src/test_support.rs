//! Test-only helpers: a scripted provisioning tool and service tree fixtures.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::core::types::Step;
use crate::io::tool::{ProvisionTool, ToolOutput, ToolRequest};

/// Scripted response for one `(service, step)` pair.
#[derive(Debug, Clone)]
pub enum StepScript {
    Exit {
        code: i32,
        stdout: String,
        stderr: String,
    },
    TimedOut,
    /// `invoke` returns `Err` with this message.
    Fault(String),
    /// `invoke` panics with this message.
    Panic(String),
}

/// Exit with `code` and the given output.
pub fn exit(code: i32, stdout: &str, stderr: &str) -> StepScript {
    StepScript::Exit {
        code,
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
    }
}

/// Provisioning tool that replays scripted outputs without spawning processes.
///
/// Unscripted steps exit 0 with empty output.
#[derive(Debug, Default)]
pub struct ScriptedTool {
    scripts: HashMap<(String, Step), StepScript>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<(String, Step)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, service: &str, step: Step, script: StepScript) -> Self {
        self.scripts.insert((service.to_string(), step), script);
        self
    }

    /// Sleep for `delay` on every step of `service`.
    pub fn delay(mut self, service: &str, delay: Duration) -> Self {
        self.delays.insert(service.to_string(), delay);
        self
    }

    /// Every `(service, step)` invoked, in call order.
    pub fn calls(&self) -> Vec<(String, Step)> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Distinct services invoked, in first-call order.
    pub fn invoked_services(&self) -> Vec<String> {
        let mut services: Vec<String> = Vec::new();
        for (service, _) in self.calls() {
            if !services.contains(&service) {
                services.push(service);
            }
        }
        services
    }

    /// Highest number of concurrent `invoke` calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl ProvisionTool for ScriptedTool {
    fn invoke(&self, step: Step, request: &ToolRequest) -> Result<ToolOutput> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((request.service.clone(), step));
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(&request.service) {
            thread::sleep(*delay);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.scripts.get(&(request.service.clone(), step)) {
            None => Ok(ToolOutput {
                exit_code: Some(0),
                ..ToolOutput::default()
            }),
            Some(StepScript::Exit {
                code,
                stdout,
                stderr,
            }) => Ok(ToolOutput {
                exit_code: Some(*code),
                stdout: stdout.clone(),
                stderr: stderr.clone(),
                timed_out: false,
            }),
            Some(StepScript::TimedOut) => Ok(ToolOutput {
                exit_code: None,
                timed_out: true,
                ..ToolOutput::default()
            }),
            Some(StepScript::Fault(message)) => Err(anyhow!("{message}")),
            Some(StepScript::Panic(message)) => panic!("{message}"),
        }
    }
}

/// Temporary repository root holding one working directory of services.
///
/// Layout: `<root>/<workdir>/<service>/main.tf`.
pub struct ServiceTree {
    temp: TempDir,
    working_dir: PathBuf,
}

impl ServiceTree {
    pub fn new(workdir_name: &str) -> Result<Self> {
        let temp = tempfile::tempdir()?;
        let working_dir = temp.path().join(workdir_name);
        fs::create_dir_all(&working_dir)?;
        Ok(Self { temp, working_dir })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Create a service directory whose `main.tf` holds `definition`.
    pub fn service(&self, name: &str, definition: &str) -> Result<PathBuf> {
        let dir = self.working_dir.join(name);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("main.tf"), definition)?;
        Ok(dir)
    }

    /// Create a subdirectory with no definition files.
    pub fn empty_dir(&self, name: &str) -> Result<PathBuf> {
        let dir = self.working_dir.join(name);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Write a repository-root file (e.g. a shared module source).
    pub fn write(&self, relative: &str, contents: &str) -> Result<PathBuf> {
        let path = self.temp.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
        Ok(path)
    }
}
