//! Terraform orchestrator CLI.
//!
//! Runs `plan` or `apply` for every service directory touched by a change,
//! in dependency order, and writes a markdown report plus a JSON audit record.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use orchestrator::core::types::Action;
use orchestrator::exit_codes;
use orchestrator::io::changes::ChangeSource;
use orchestrator::io::config::{DEFAULT_CONFIG_FILE, load_config};
use orchestrator::io::tool::TerraformTool;
use orchestrator::logging;
use orchestrator::run::{RunOptions, run};

#[derive(Parser)]
#[command(
    name = "orchestrator",
    version,
    about = "Dependency-ordered terraform orchestration"
)]
struct Cli {
    /// Provisioning action to run for each changed service.
    #[arg(long, value_enum)]
    action: ActionArg,
    /// Directory holding one subdirectory per service.
    #[arg(long)]
    working_dir: PathBuf,
    /// File listing changed paths, one per line. Ignored when missing or empty.
    #[arg(long, default_value = "/tmp/changed-files.txt")]
    changed_files: PathBuf,
    /// Base git ref for change detection.
    #[arg(long)]
    base_ref: Option<String>,
    /// Head git ref for change detection.
    #[arg(long, default_value = "HEAD")]
    head_ref: String,
    /// Region forwarded to the provisioning tool.
    #[arg(long, env = "OCI_REGION", default_value = "us-ashburn-1")]
    region: String,
    /// Print what would run without invoking the tool.
    #[arg(long)]
    dry_run: bool,
    /// Run services within a level concurrently.
    #[arg(long)]
    parallel: bool,
    /// Worker pool size for parallel levels.
    #[arg(long)]
    max_workers: Option<usize>,
    /// Verbose diagnostics on stderr.
    #[arg(long)]
    debug: bool,
    /// Config file (TOML).
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Markdown report output path.
    #[arg(long)]
    report: Option<PathBuf>,
    /// JSON audit record output path.
    #[arg(long)]
    audit: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ActionArg {
    Plan,
    Apply,
}

impl From<ActionArg> for Action {
    fn from(value: ActionArg) -> Self {
        match value {
            ActionArg::Plan => Action::Plan,
            ActionArg::Apply => Action::Apply,
        }
    }
}

impl Cli {
    fn run_options(&self) -> RunOptions {
        RunOptions {
            action: self.action.into(),
            working_dir: self.working_dir.clone(),
            changes: ChangeSource {
                changed_files: Some(self.changed_files.clone()),
                base_ref: self.base_ref.clone(),
                head_ref: self.head_ref.clone(),
                ..ChangeSource::default()
            },
            region: self.region.clone(),
            dry_run: self.dry_run,
            parallel: self.parallel,
            max_workers: self.max_workers,
            debug: self.debug,
            report_path: self.report.clone(),
            audit_path: self.audit.clone(),
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let options = cli.run_options();
    logging::init(options.debug);
    match execute(&cli.config, &options) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn execute(config_path: &Path, options: &RunOptions) -> Result<i32> {
    let config = load_config(config_path).context("load config")?;
    let tool = TerraformTool::new(config.tool.clone());
    let summary = run(options, &config, &tool)?;
    Ok(summary.exit_code())
}
