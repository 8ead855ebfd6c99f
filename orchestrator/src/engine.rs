//! Level-by-level execution with fail-fast between levels.
//!
//! Levels run strictly in plan order. Within a level, services run one at a
//! time in alphabetical order, or concurrently on a bounded worker pool when
//! parallel mode is on. A level is resolved only after every dispatched
//! service reaches a terminal state; if any did not succeed, later levels are
//! never attempted.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use rayon::prelude::*;
use tracing::{debug, info, instrument, warn};

use crate::core::aggregate::ResultAggregator;
use crate::core::levels::ExecutionPlan;
use crate::core::types::{ExecutionResult, ServiceState};
use crate::io::tool::ProvisionTool;
use crate::runner::ServiceRunner;

/// Engine behavior switches for one run.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Synthesize successful results without invoking the tool.
    pub dry_run: bool,
    /// Run services within a level concurrently.
    pub parallel: bool,
    /// Upper bound on concurrently running services.
    pub max_workers: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            parallel: false,
            max_workers: 3,
        }
    }
}

/// What the engine produced for a plan.
#[derive(Debug, Clone, Default)]
pub struct EngineOutcome {
    pub results: ResultAggregator,
    /// Zero-based index of the level that stopped the run, if any.
    pub halted_at: Option<usize>,
}

pub struct ExecutionEngine<'a, T: ProvisionTool> {
    runner: ServiceRunner<'a, T>,
    working_dir: &'a Path,
    options: EngineOptions,
}

impl<'a, T: ProvisionTool> ExecutionEngine<'a, T> {
    pub fn new(runner: ServiceRunner<'a, T>, working_dir: &'a Path, options: EngineOptions) -> Self {
        Self {
            runner,
            working_dir,
            options,
        }
    }

    /// Execute `plan` level by level.
    ///
    /// Returns `Err` only if the worker pool cannot be created; per-service
    /// failures are recorded in the results.
    #[instrument(skip_all, fields(levels = plan.levels.len(), dry_run = self.options.dry_run, parallel = self.options.parallel))]
    pub fn execute(&self, plan: &ExecutionPlan) -> Result<EngineOutcome> {
        let pool = if self.options.parallel && !self.options.dry_run {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.options.max_workers.max(1))
                .thread_name(|idx| format!("orchestrator-worker-{idx}"))
                .build()
                .context("create worker pool")?;
            Some(pool)
        } else {
            None
        };

        let mut outcome = EngineOutcome::default();
        let total = plan.levels.len();
        for (idx, level) in plan.levels.iter().enumerate() {
            println!();
            println!("{}", "=".repeat(80));
            println!("Executing level {}/{}: {}", idx + 1, total, level.join(", "));
            println!("{}", "=".repeat(80));

            let level_results = match &pool {
                _ if self.options.dry_run => self.dry_run_level(level),
                Some(pool) if level.len() > 1 => self.run_parallel(pool, level),
                _ => self.run_sequential(level),
            };

            let failed: Vec<String> = level_results
                .iter()
                .filter(|result| !result.success)
                .map(|result| result.service.clone())
                .collect();
            outcome.results.extend(level_results);

            if !failed.is_empty() && !self.options.dry_run {
                warn!(level = idx + 1, failed = %failed.join(", "), "level failed, halting");
                println!();
                println!("Level {} had failures. Stopping execution.", idx + 1);
                println!("   Failed services: {}", failed.join(", "));
                outcome.halted_at = Some(idx);
                break;
            }
            debug!(level = idx + 1, "level resolved");
        }
        Ok(outcome)
    }

    fn dry_run_level(&self, level: &[String]) -> Vec<ExecutionResult> {
        let action = self.runner.settings().action;
        level
            .iter()
            .map(|service| {
                println!("[DRY-RUN] Would execute {action} for: {service}");
                ExecutionResult::new(service.as_str(), ServiceState::Success)
                    .with_output(format!("[DRY-RUN] Simulated {action} for {service}"))
            })
            .collect()
    }

    fn run_sequential(&self, level: &[String]) -> Vec<ExecutionResult> {
        level
            .iter()
            .map(|service| {
                let result = self.run_one(service);
                print_result(&result);
                result
            })
            .collect()
    }

    /// Run every service in `level` on `pool`. Results arrive in completion order.
    fn run_parallel(&self, pool: &rayon::ThreadPool, level: &[String]) -> Vec<ExecutionResult> {
        info!(services = level.len(), workers = pool.current_num_threads(), "running level in parallel");
        println!(
            "Executing {} services in parallel (max {} workers)...",
            level.len(),
            pool.current_num_threads()
        );
        let results: Mutex<Vec<ExecutionResult>> = Mutex::new(Vec::with_capacity(level.len()));
        pool.install(|| {
            level.par_iter().for_each(|service| {
                let result = self.run_one(service);
                print_result(&result);
                push_result(&results, result);
            });
        });
        into_results(results)
    }

    fn run_one(&self, service: &str) -> ExecutionResult {
        self.runner.run(service, &self.working_dir.join(service))
    }
}

fn print_result(result: &ExecutionResult) {
    let icon = if result.success { "✅" } else { "❌" };
    match &result.error {
        None => println!(
            "{icon} {} ({}, {:.1}s, {})",
            result.service,
            result.state.label(),
            result.duration_secs(),
            result.delta
        ),
        Some(error) => println!(
            "{icon} {} ({}, {:.1}s): {}",
            result.service,
            result.state.label(),
            result.duration_secs(),
            error.lines().next().unwrap_or_default()
        ),
    }
}

fn push_result(results: &Mutex<Vec<ExecutionResult>>, result: ExecutionResult) {
    match results.lock() {
        Ok(mut locked) => locked.push(result),
        Err(poisoned) => poisoned.into_inner().push(result),
    }
}

fn into_results(results: Mutex<Vec<ExecutionResult>>) -> Vec<ExecutionResult> {
    match results.into_inner() {
        Ok(collected) => collected,
        Err(poisoned) => poisoned.into_inner(),
    }
}
