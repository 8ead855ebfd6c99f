//! Result accumulation and the end-of-run audit record.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::levels::ExecutionPlan;
use crate::core::types::{Action, ExecutionResult};

/// Aggregate counters over attempted services.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTotals {
    pub services: usize,
    pub successful: usize,
    pub failed: usize,
    pub created: u64,
    pub changed: u64,
    pub destroyed: u64,
    pub duration_secs: f64,
}

/// Results in attempt order. Within a parallel level the order is completion
/// order; across levels it follows the plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultAggregator {
    results: Vec<ExecutionResult>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: ExecutionResult) {
        self.results.push(result);
    }

    pub fn extend(&mut self, results: impl IntoIterator<Item = ExecutionResult>) {
        self.results.extend(results);
    }

    pub fn results(&self) -> &[ExecutionResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<ExecutionResult> {
        self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// True when every attempted service succeeded. Services never reached
    /// because of fail-fast are not counted.
    pub fn is_success(&self) -> bool {
        self.results.iter().all(|result| result.success)
    }

    pub fn failed_services(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|result| !result.success)
            .map(|result| result.service.as_str())
            .collect()
    }

    pub fn totals(&self) -> RunTotals {
        let mut totals = RunTotals {
            services: self.results.len(),
            ..RunTotals::default()
        };
        let mut duration_ms = 0u64;
        for result in &self.results {
            if result.success {
                totals.successful += 1;
            } else {
                totals.failed += 1;
            }
            totals.created += result.delta.created;
            totals.changed += result.delta.changed;
            totals.destroyed += result.delta.destroyed;
            duration_ms += result.duration_ms;
        }
        totals.duration_secs = duration_ms as f64 / 1000.0;
        totals
    }

    /// Snapshot the run into a write-once audit record.
    pub fn audit_record(&self, plan: &ExecutionPlan, context: AuditContext) -> AuditRecord {
        AuditRecord {
            timestamp: context.timestamp,
            orchestrator_version: env!("CARGO_PKG_VERSION").to_string(),
            action: context.action,
            region: context.region,
            dry_run: context.dry_run,
            success: self.is_success(),
            totals: self.totals(),
            execution_levels: plan.levels.clone(),
            degradation: plan.degradation.clone(),
            services: self.results.clone(),
            environment: context.environment,
        }
    }
}

/// Run-level facts the aggregator does not observe itself.
#[derive(Debug, Clone)]
pub struct AuditContext {
    pub timestamp: String,
    pub action: Action,
    pub region: String,
    pub dry_run: bool,
    pub environment: BTreeMap<String, String>,
}

/// Machine-readable record of one run, written once at the end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: String,
    pub orchestrator_version: String,
    pub action: Action,
    pub region: String,
    pub dry_run: bool,
    pub success: bool,
    pub totals: RunTotals,
    pub execution_levels: Vec<Vec<String>>,
    pub degradation: Option<crate::core::levels::Degradation>,
    pub services: Vec<ExecutionResult>,
    pub environment: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ResourceDelta, ServiceState};

    fn result(service: &str, state: ServiceState, delta: ResourceDelta, ms: u64) -> ExecutionResult {
        ExecutionResult::new(service, state)
            .with_delta(delta)
            .with_duration_ms(ms)
    }

    #[test]
    fn totals_sum_deltas_and_durations() {
        let mut aggregator = ResultAggregator::new();
        aggregator.push(result("identity", ServiceState::Success, ResourceDelta::new(2, 0, 1), 1500));
        aggregator.push(result("network", ServiceState::Failed, ResourceDelta::new(1, 1, 0), 500));

        let totals = aggregator.totals();
        assert_eq!(totals.services, 2);
        assert_eq!(totals.successful, 1);
        assert_eq!(totals.failed, 1);
        assert_eq!((totals.created, totals.changed, totals.destroyed), (3, 1, 1));
        assert_eq!(totals.duration_secs, 2.0);
        assert!(!aggregator.is_success());
        assert_eq!(aggregator.failed_services(), vec!["network"]);
    }

    #[test]
    fn empty_run_is_successful() {
        let aggregator = ResultAggregator::new();
        assert!(aggregator.is_success());
        assert_eq!(aggregator.totals(), RunTotals::default());
    }

    #[test]
    fn audit_record_captures_plan_and_results() {
        let mut aggregator = ResultAggregator::new();
        aggregator.push(result("identity", ServiceState::Success, ResourceDelta::default(), 10));
        let plan = ExecutionPlan {
            levels: vec![vec!["identity".to_string()], vec!["network".to_string()]],
            degradation: None,
        };
        let record = aggregator.audit_record(
            &plan,
            AuditContext {
                timestamp: "2025-01-01T00:00:00+00:00".to_string(),
                action: Action::Plan,
                region: "us-ashburn-1".to_string(),
                dry_run: false,
                environment: BTreeMap::new(),
            },
        );

        assert!(record.success);
        assert_eq!(record.execution_levels.len(), 2);
        assert_eq!(record.services.len(), 1);
        assert_eq!(record.totals.services, 1);

        let json = serde_json::to_value(&record).expect("serialize");
        assert_eq!(json["action"], "plan");
        assert_eq!(json["services"][0]["state"], "Success");
    }
}
