//! Resource-delta extraction from the provisioning tool's summary lines.
//!
//! Counter accuracy is best-effort: a missing or malformed summary yields
//! zero counters, never an error.

use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::core::types::{Action, ResourceDelta};

/// Extracts resource counters from captured tool output.
pub trait SummaryParser: Send + Sync {
    fn parse(&self, action: Action, output: &str) -> ResourceDelta;
}

static PLAN_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+) to add, (\d+) to change, (\d+) to destroy").expect("plan summary regex")
});

static APPLY_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+) added, (\d+) changed, (\d+) destroyed").expect("apply summary regex")
});

/// Parser for terraform's `Plan: ...` and `Apply complete! Resources: ...` lines.
///
/// The last matching line wins, so a trailing summary overrides any echoed
/// fragments earlier in the output.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerraformSummaryParser;

impl SummaryParser for TerraformSummaryParser {
    fn parse(&self, action: Action, output: &str) -> ResourceDelta {
        let pattern = match action {
            Action::Plan => &*PLAN_SUMMARY,
            Action::Apply => &*APPLY_SUMMARY,
        };
        let Some(caps) = output.lines().rev().find_map(|line| pattern.captures(line)) else {
            warn!(action = %action, "no summary line in output; counters default to zero");
            return ResourceDelta::default();
        };
        let count = |idx: usize| {
            caps.get(idx)
                .and_then(|m| m.as_str().parse::<u64>().ok())
                .unwrap_or(0)
        };
        ResourceDelta::new(count(1), count(2), count(3))
    }
}
