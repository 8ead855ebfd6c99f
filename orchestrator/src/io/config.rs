//! Orchestrator configuration loaded from `orchestrator.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::levels::DependencyTable;
use crate::core::types::Step;

pub const DEFAULT_CONFIG_FILE: &str = "orchestrator.toml";

/// Orchestrator configuration (TOML).
///
/// Every field is optional in the file; missing fields take the defaults
/// below. The dependency table is read-only for the lifetime of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Service name -> prerequisite service names.
    pub dependencies: DependencyTable,

    /// File extensions (without dot) that mark infra-definition files.
    pub definition_extensions: Vec<String>,

    /// Repository-relative prefix under which shared modules live.
    pub modules_prefix: String,

    /// Worker-pool size used when the run does not override it.
    pub max_workers: usize,

    /// Truncate captured stdout/stderr of each tool step beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Markdown report destination.
    pub report_path: PathBuf,

    /// JSON audit record destination.
    pub audit_path: PathBuf,

    pub tool: ToolConfig,
    pub timeouts: TimeoutConfig,
}

/// How the provisioning tool is invoked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolConfig {
    pub program: String,
    pub init_args: Vec<String>,
    pub plan_args: Vec<String>,
    pub apply_args: Vec<String>,
}

impl ToolConfig {
    pub fn args_for(&self, step: Step) -> &[String] {
        match step {
            Step::Init => &self.init_args,
            Step::Plan => &self.plan_args,
            Step::Apply => &self.apply_args,
        }
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: "terraform".to_string(),
            init_args: strings(&["init", "-no-color"]),
            plan_args: strings(&["plan", "-no-color", "-detailed-exitcode"]),
            apply_args: strings(&["apply", "-auto-approve", "-no-color"]),
        }
    }
}

/// Hard per-step timeouts, in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutConfig {
    pub init_secs: u64,
    pub action_secs: u64,
}

impl TimeoutConfig {
    pub fn for_step(&self, step: Step) -> Duration {
        match step {
            Step::Init => Duration::from_secs(self.init_secs),
            Step::Plan | Step::Apply => Duration::from_secs(self.action_secs),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            init_secs: 5 * 60,
            action_secs: 30 * 60,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            dependencies: default_dependencies(),
            definition_extensions: strings(&["tf"]),
            modules_prefix: "modules".to_string(),
            max_workers: 3,
            output_limit_bytes: 1_000_000,
            report_path: PathBuf::from("terraform-results.md"),
            audit_path: PathBuf::from("terraform-audit.json"),
            tool: ToolConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.definition_extensions.is_empty() {
            return Err(anyhow!("definition_extensions must not be empty"));
        }
        if self.modules_prefix.trim().is_empty() || self.modules_prefix.contains('/') {
            return Err(anyhow!("modules_prefix must be a single path segment"));
        }
        if self.max_workers == 0 {
            return Err(anyhow!("max_workers must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.tool.program.trim().is_empty() {
            return Err(anyhow!("tool.program must be non-empty"));
        }
        if self.timeouts.init_secs == 0 || self.timeouts.action_secs == 0 {
            return Err(anyhow!("timeouts must be > 0"));
        }
        if self.timeouts.action_secs <= self.timeouts.init_secs {
            return Err(anyhow!(
                "timeouts.action_secs ({}) must exceed timeouts.init_secs ({})",
                self.timeouts.action_secs,
                self.timeouts.init_secs
            ));
        }
        Ok(())
    }

    /// True if `path` has one of the configured definition extensions.
    pub fn is_definition_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.definition_extensions.iter().any(|known| known == ext))
    }
}

/// Built-in infrastructure tiers: core, network, and everything layered on top.
pub fn default_dependencies() -> DependencyTable {
    const IDENTITY: &[&str] = &["identity"];
    const NETWORKED: &[&str] = &["network", "identity"];
    let entries: &[(&str, &[&str])] = &[
        ("identity", &[]),
        ("kms", &[]),
        ("network", IDENTITY),
        ("dns", IDENTITY),
        ("compute", NETWORKED),
        ("oke", NETWORKED),
        ("database", NETWORKED),
        ("managementservices", NETWORKED),
        ("loadbalancer", NETWORKED),
        ("firewall", NETWORKED),
        ("nsg", NETWORKED),
        ("fss", NETWORKED),
        ("oss", IDENTITY),
        ("security", IDENTITY),
        ("tagging", IDENTITY),
        ("quota", IDENTITY),
        ("budget", IDENTITY),
        ("vlan", NETWORKED),
        ("ocvs", NETWORKED),
    ];
    entries
        .iter()
        .map(|(name, deps)| (name.to_string(), strings(deps)))
        .collect()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `OrchestratorConfig::default()`.
pub fn load_config(path: &Path) -> Result<OrchestratorConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config file missing, using defaults");
        let cfg = OrchestratorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: OrchestratorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    debug!(path = %path.display(), services = cfg.dependencies.len(), "config loaded");
    Ok(cfg)
}
