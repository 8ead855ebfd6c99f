//! Git adapter for change detection.
//!
//! Only read-only queries are issued; the orchestrator never mutates the
//! repository.

use std::path::PathBuf;
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Repository-relative paths that differ between `base` and `head`.
    ///
    /// A `base` of `HEAD` compares the previous commit against `head`.
    #[instrument(skip_all, fields(base = %base, head = %head))]
    pub fn diff_names(&self, base: &str, head: &str) -> Result<Vec<String>> {
        let base = if base == "HEAD" { "HEAD~1" } else { base };
        let out = self.run_capture(&["diff", "--name-only", base, head])?;
        let paths: Vec<String> = out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        debug!(repo = %self.workdir.display(), count = paths.len(), "git diff paths");
        Ok(paths)
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}
