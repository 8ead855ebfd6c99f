//! Orchestration for one orchestrator invocation.
//!
//! A run detects affected services, orders them into dependency levels,
//! executes the levels through the engine and writes the markdown report plus
//! the JSON audit record. Fatal setup problems surface as `Err`; per-service
//! failures are reported through [`RunSummary`]. Once services have run, a
//! report or audit write failure is logged and never changes the outcome.

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Result, bail};
use chrono::{SecondsFormat, Utc};
use tracing::{info, instrument, warn};

use crate::core::aggregate::AuditContext;
use crate::core::levels::{Degradation, ExecutionPlan, build_levels};
use crate::core::summary::TerraformSummaryParser;
use crate::core::types::Action;
use crate::engine::{EngineOptions, EngineOutcome, ExecutionEngine};
use crate::exit_codes;
use crate::io::changes::{ChangeDetector, ChangeSet, ChangeSource};
use crate::io::config::OrchestratorConfig;
use crate::io::report::{
    ReportInput, render_no_changes_report, render_report, write_audit, write_report,
};
use crate::io::tool::ProvisionTool;
use crate::runner::{RunnerSettings, ServiceRunner};

/// CI variables copied into the audit record.
const AUDIT_ENV_VARS: [&str; 3] = ["GITHUB_REF", "GITHUB_SHA", "GITHUB_ACTOR"];

/// Parameters for a single run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub action: Action,
    pub working_dir: PathBuf,
    pub changes: ChangeSource,
    pub region: String,
    pub dry_run: bool,
    pub parallel: bool,
    /// Overrides `OrchestratorConfig::max_workers`.
    pub max_workers: Option<usize>,
    pub debug: bool,
    /// Overrides `OrchestratorConfig::report_path`.
    pub report_path: Option<PathBuf>,
    /// Overrides `OrchestratorConfig::audit_path`.
    pub audit_path: Option<PathBuf>,
}

impl RunOptions {
    pub fn new(action: Action, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            action,
            working_dir: working_dir.into(),
            changes: ChangeSource::default(),
            region: "us-ashburn-1".to_string(),
            dry_run: false,
            parallel: false,
            max_workers: None,
            debug: false,
            report_path: None,
            audit_path: None,
        }
    }
}

/// Outcome of [`run`].
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub changes: ChangeSet,
    pub plan: ExecutionPlan,
    pub outcome: EngineOutcome,
    /// `None` when the report could not be written.
    pub report_path: Option<PathBuf>,
    /// `None` when no services changed or the audit record could not be written.
    pub audit_path: Option<PathBuf>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.outcome.results.is_success()
    }

    /// Planned services that never ran because an earlier level failed.
    pub fn skipped(&self) -> Vec<&str> {
        let results = self.outcome.results.results();
        self.plan
            .levels
            .iter()
            .flatten()
            .filter(|service| !results.iter().any(|result| &result.service == *service))
            .map(String::as_str)
            .collect()
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            exit_codes::OK
        } else {
            exit_codes::FAILED
        }
    }
}

/// Execute one run against `tool`.
#[instrument(skip_all, fields(action = %options.action, working_dir = %options.working_dir.display()))]
pub fn run<T: ProvisionTool>(
    options: &RunOptions,
    config: &OrchestratorConfig,
    tool: &T,
) -> Result<RunSummary> {
    let started = Instant::now();
    let now = Utc::now();
    let max_workers = options.max_workers.unwrap_or(config.max_workers);
    if max_workers == 0 {
        bail!("max workers must be > 0");
    }
    let report_path = options
        .report_path
        .clone()
        .unwrap_or_else(|| config.report_path.clone());
    let audit_path = options
        .audit_path
        .clone()
        .unwrap_or_else(|| config.audit_path.clone());

    print_banner(options, max_workers);

    if !options.working_dir.is_dir() {
        bail!(
            "working directory {} does not exist",
            options.working_dir.display()
        );
    }

    let detector = ChangeDetector::new(&options.working_dir, config);
    let changes = detector.detect(&options.changes);
    if changes.degraded {
        println!("Change detection failed; processing all services.");
    }

    if changes.is_empty() {
        info!("no changed services");
        println!("No Terraform changes detected.");
        let report_path = write_artifact("report", report_path, |path| {
            write_report(path, &render_no_changes_report())
        });
        return Ok(RunSummary {
            changes,
            plan: ExecutionPlan::default(),
            outcome: EngineOutcome::default(),
            report_path,
            audit_path: None,
        });
    }

    let candidates = changes.services();
    println!("Changed services: {}", candidates.join(", "));

    let plan = build_levels(&candidates, &config.dependencies);
    print_plan(&plan);

    let settings = RunnerSettings {
        action: options.action,
        region: options.region.clone(),
        timeouts: config.timeouts,
        output_limit_bytes: config.output_limit_bytes,
    };
    let parser = TerraformSummaryParser;
    let runner = ServiceRunner::new(tool, &parser, settings);
    let engine = ExecutionEngine::new(
        runner,
        &options.working_dir,
        EngineOptions {
            dry_run: options.dry_run,
            parallel: options.parallel,
            max_workers,
        },
    );
    let outcome = engine.execute(&plan)?;

    let report = render_report(&ReportInput {
        action: options.action,
        timestamp: &now.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        plan: &plan,
        results: &outcome.results,
    });
    let report_path = write_artifact("report", report_path, |path| write_report(path, &report));

    let record = outcome.results.audit_record(
        &plan,
        AuditContext {
            timestamp: now.to_rfc3339_opts(SecondsFormat::Secs, true),
            action: options.action,
            region: options.region.clone(),
            dry_run: options.dry_run,
            environment: audit_environment(),
        },
    );
    let audit_path = write_artifact("audit record", audit_path, |path| write_audit(path, &record));

    let summary = RunSummary {
        changes,
        plan,
        outcome,
        report_path,
        audit_path,
    };
    print_summary(&summary, started.elapsed().as_secs_f64());
    if !summary.is_success() {
        warn!(failed = %summary.outcome.results.failed_services().join(", "), "run failed");
    }
    Ok(summary)
}

/// Write one output file, returning its path only if the write succeeded.
fn write_artifact(
    kind: &str,
    path: PathBuf,
    write: impl FnOnce(&Path) -> Result<()>,
) -> Option<PathBuf> {
    match write(&path) {
        Ok(()) => Some(path),
        Err(err) => {
            warn!(path = %path.display(), err = %format!("{err:#}"), "could not write {kind}");
            println!("Warning: could not write {kind} to {}", path.display());
            None
        }
    }
}

fn audit_environment() -> BTreeMap<String, String> {
    AUDIT_ENV_VARS
        .iter()
        .map(|name| {
            let value = env::var(name).unwrap_or_else(|_| "unknown".to_string());
            (name.to_string(), value)
        })
        .collect()
}

fn print_banner(options: &RunOptions, max_workers: usize) {
    println!("{}", "=".repeat(80));
    println!("Terraform Orchestrator v{}", env!("CARGO_PKG_VERSION"));
    println!("{}", "=".repeat(80));
    println!("Action: {}", options.action);
    println!("Working directory: {}", options.working_dir.display());
    println!("Region: {}", options.region);
    println!("Dry run: {}", options.dry_run);
    if options.debug {
        println!("Debug: true");
    }
    if options.parallel {
        println!("Parallel: true (max {max_workers} workers)");
    } else {
        println!("Parallel: false");
    }
    println!("{}", "=".repeat(80));
}

fn print_plan(plan: &ExecutionPlan) {
    match &plan.degradation {
        Some(Degradation::NoRoots) => {
            println!("No dependency roots found; running services one at a time.");
        }
        Some(Degradation::Cycle { services }) => {
            println!(
                "Circular dependency among {}; running them last.",
                services.join(", ")
            );
        }
        None => {}
    }
    println!();
    println!("Execution plan ({} levels):", plan.levels.len());
    for (idx, level) in plan.levels.iter().enumerate() {
        println!("  Level {}: {}", idx + 1, level.join(", "));
    }
}

fn print_summary(summary: &RunSummary, elapsed_secs: f64) {
    let totals = summary.outcome.results.totals();
    println!();
    println!("{}", "=".repeat(80));
    println!("EXECUTION SUMMARY");
    println!("{}", "=".repeat(80));
    println!("Total services processed: {}", totals.services);
    println!("Successful: {}", totals.successful);
    println!("Failed: {}", totals.failed);
    println!("Total duration: {elapsed_secs:.1}s");
    println!("Execution levels: {}", summary.plan.levels.len());
    if totals.failed > 0 {
        println!(
            "Failed services: {}",
            summary.outcome.results.failed_services().join(", ")
        );
    }
    let skipped = summary.skipped();
    if !skipped.is_empty() {
        println!("Skipped after failure: {}", skipped.join(", "));
    }
    if let Some(path) = &summary.report_path {
        println!("Report: {}", path.display());
    }
    if let Some(path) = &summary.audit_path {
        println!("Audit record: {}", path.display());
    }
    println!("{}", "=".repeat(80));
}
