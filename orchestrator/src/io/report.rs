//! Human-readable markdown report and JSON audit record output.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::aggregate::{AuditRecord, ResultAggregator};
use crate::core::levels::ExecutionPlan;
use crate::core::types::{Action, ExecutionResult};

const PREVIEW_CHARS: usize = 500;

/// Inputs for [`render_report`].
pub struct ReportInput<'a> {
    pub action: Action,
    pub timestamp: &'a str,
    pub plan: &'a ExecutionPlan,
    pub results: &'a ResultAggregator,
}

/// Render the markdown report for a completed run.
pub fn render_report(input: &ReportInput<'_>) -> String {
    let action = input.action;
    let totals = input.results.totals();
    let mut out = String::new();

    out.push_str(&format!("# Terraform {} Results\n\n", action.title()));
    out.push_str(&format!("**Timestamp:** {}  \n", input.timestamp));
    out.push_str(&format!(
        "**Orchestrator Version:** {}  \n\n",
        env!("CARGO_PKG_VERSION")
    ));

    if totals.failed == 0 {
        out.push_str(&format!(
            "✅ **Status: All {} service(s) succeeded**\n\n",
            totals.services
        ));
    } else {
        out.push_str(&format!(
            "⚠️ **Status: {} of {} service(s) failed**\n\n",
            totals.failed, totals.services
        ));
    }

    out.push_str("## Execution Order (Dependency Levels)\n\n");
    for (idx, level) in input.plan.levels.iter().enumerate() {
        out.push_str(&format!("**Level {}:** {}", idx + 1, level.join(", ")));
        if level.len() > 1 {
            out.push_str(" *(parallel execution)*");
        }
        out.push_str("  \n");
    }
    out.push('\n');

    out.push_str("## Service Results\n\n");
    out.push_str("| Service | Status | Duration | Changes |\n");
    out.push_str("|---------|--------|----------|---------|\n");
    for result in input.results.results() {
        out.push_str(&format!(
            "| {} | {} {} | {:.1}s | {} |\n",
            result.service,
            status_icon(result),
            result.state.label(),
            result.duration_secs(),
            changes_cell(action, result)
        ));
    }
    out.push('\n');

    out.push_str("## Detailed Results\n\n");
    for result in input.results.results() {
        out.push_str(&format!("### {} {}\n\n", status_icon(result), result.service));
        if result.success {
            let full = escape_backticks(&result.output);
            if result.output.chars().count() > PREVIEW_CHARS {
                let preview: String = result.output.chars().take(PREVIEW_CHARS).collect();
                out.push_str(&format!(
                    "**Preview:**\n```\n{}\n... (truncated)\n```\n\n",
                    escape_backticks(&preview)
                ));
                out.push_str(&format!(
                    "<details><summary>Show Full Output ({} chars)</summary>\n\n```\n{}\n```\n</details>\n\n",
                    result.output.chars().count(),
                    full
                ));
            } else {
                out.push_str(&format!("```\n{full}\n```\n\n"));
            }
        } else {
            out.push_str(&format!(
                "**Error:** {}\n\n",
                result.error.as_deref().unwrap_or("unknown error")
            ));
            if !result.output.is_empty() {
                out.push_str(&format!(
                    "<details><summary>Show Output</summary>\n\n```\n{}\n```\n</details>\n\n",
                    escape_backticks(&result.output)
                ));
            }
        }
    }

    out.push_str("---\n");
    out.push_str(&format!(
        "*Generated by orchestrator v{} with dependency ordering*\n",
        env!("CARGO_PKG_VERSION")
    ));
    out
}

/// Report written when no service was affected.
pub fn render_no_changes_report() -> String {
    "## ℹ️ No Infrastructure Changes\n\nNo Terraform-managed services were modified in this change.\n"
        .to_string()
}

fn status_icon(result: &ExecutionResult) -> &'static str {
    if result.success { "✅" } else { "❌" }
}

fn changes_cell(action: Action, result: &ExecutionResult) -> String {
    if action == Action::Plan && result.delta.is_empty() {
        "No changes".to_string()
    } else {
        result.delta.to_string()
    }
}

fn escape_backticks(text: &str) -> String {
    text.replace('`', "\\`")
}

/// Write the markdown report.
pub fn write_report(path: &Path, contents: &str) -> Result<()> {
    write_file(path, contents)?;
    debug!(path = %path.display(), "report written");
    Ok(())
}

/// Serialize the audit record as pretty JSON with trailing newline.
pub fn write_audit(path: &Path, record: &AuditRecord) -> Result<()> {
    let mut payload = serde_json::to_string_pretty(record).context("serialize audit record")?;
    payload.push('\n');
    write_file(path, &payload)?;
    debug!(path = %path.display(), "audit record written");
    Ok(())
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}
