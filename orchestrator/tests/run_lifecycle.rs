//! End-to-end run tests with a scripted provisioning tool.
//!
//! These tests drive `run` over a temporary service tree: change detection,
//! module fan-out, dependency leveling, execution, report and audit output.

use std::fs;

use orchestrator::core::aggregate::AuditRecord;
use orchestrator::core::types::{Action, ResourceDelta, ServiceState, Step};
use orchestrator::exit_codes;
use orchestrator::io::changes::ChangeSource;
use orchestrator::io::config::OrchestratorConfig;
use orchestrator::run::{RunOptions, run};
use orchestrator::test_support::{ScriptedTool, ServiceTree, StepScript, exit};

const MODULE_USER: &str = r#"module "vcn" {
  source = "../../modules/vcn"
}
"#;

const OTHER_MODULE_USER: &str = r#"module "vcn_common" {
  source = "../../modules/vcn-common"
}
"#;

fn options(tree: &ServiceTree, action: Action, changed: &[&str]) -> RunOptions {
    let list = tree
        .write("changed-files.txt", &changed.join("\n"))
        .expect("changed list");
    let mut options = RunOptions::new(action, tree.working_dir());
    options.region = "ca-toronto-1".to_string();
    options.changes = ChangeSource {
        changed_files: Some(list),
        repo_root: tree.root().to_path_buf(),
        ..ChangeSource::default()
    };
    options.report_path = Some(tree.root().join("results.md"));
    options.audit_path = Some(tree.root().join("audit.json"));
    options
}

fn load_audit(tree: &ServiceTree) -> AuditRecord {
    let raw = fs::read_to_string(tree.root().join("audit.json")).expect("read audit");
    serde_json::from_str(&raw).expect("parse audit")
}

/// Module fan-out plus a direct change, run in parallel.
///
/// ```text
/// modules/vcn/main.tf      -> network (references modules/vcn)
/// toronto/dns/records.tf   -> dns (direct)
/// oke references modules/vcn-common and must not be selected
/// ```
#[test]
fn module_change_fans_out_to_referencing_services() {
    let tree = ServiceTree::new("toronto").expect("tree");
    tree.service("network", MODULE_USER).expect("network");
    tree.service("oke", OTHER_MODULE_USER).expect("oke");
    tree.service("dns", "resource \"oci_dns_zone\" \"z\" {}").expect("dns");
    tree.write("modules/vcn/main.tf", "variable \"cidr\" {}").expect("module");

    let tool = ScriptedTool::new()
        .script(
            "network",
            Step::Plan,
            exit(2, "Plan: 2 to add, 1 to change, 0 to destroy.", ""),
        )
        .script("dns", Step::Plan, exit(0, "No changes.", ""));
    let mut options = options(
        &tree,
        Action::Plan,
        &["modules/vcn/main.tf", "toronto/dns/records.tf"],
    );
    options.parallel = true;
    options.max_workers = Some(2);

    let summary = run(&options, &OrchestratorConfig::default(), &tool).expect("run");

    assert_eq!(summary.changes.services(), vec!["dns", "network"]);
    assert!(summary.changes.modules.contains("vcn"));
    assert_eq!(summary.plan.levels, vec![vec!["dns", "network"]]);
    assert_eq!(summary.exit_code(), exit_codes::OK);
    assert!(!tool.invoked_services().contains(&"oke".to_string()));

    let audit = load_audit(&tree);
    assert!(audit.success);
    assert_eq!(audit.region, "ca-toronto-1");
    assert_eq!(audit.totals.services, 2);
    assert_eq!(audit.totals.created, 2);
    assert_eq!(audit.totals.changed, 1);
    assert!(audit.environment.contains_key("GITHUB_SHA"));

    let report = fs::read_to_string(tree.root().join("results.md")).expect("report");
    assert!(report.contains("| dns | ✅ success |"));
    assert!(report.contains("No changes"));
    assert!(report.contains("+2 ~1 -0"));
}

/// identity -> network -> compute chain where network times out.
#[test]
fn timeout_halts_dependent_levels() {
    let tree = ServiceTree::new("toronto").expect("tree");
    for name in ["identity", "network", "compute"] {
        tree.service(name, "").expect("service");
    }
    let tool = ScriptedTool::new()
        .script(
            "identity",
            Step::Apply,
            exit(0, "Apply complete! Resources: 1 added, 0 changed, 0 destroyed.", ""),
        )
        .script("network", Step::Apply, StepScript::TimedOut);
    let options = options(
        &tree,
        Action::Apply,
        &[
            "toronto/compute/main.tf",
            "toronto/identity/main.tf",
            "toronto/network/main.tf",
        ],
    );

    let summary = run(&options, &OrchestratorConfig::default(), &tool).expect("run");

    assert_eq!(summary.exit_code(), exit_codes::FAILED);
    assert_eq!(summary.skipped(), vec!["compute"]);
    let states: Vec<(String, ServiceState)> = summary
        .outcome
        .results
        .results()
        .iter()
        .map(|r| (r.service.clone(), r.state))
        .collect();
    assert_eq!(
        states,
        vec![
            ("identity".to_string(), ServiceState::Success),
            ("network".to_string(), ServiceState::TimedOut),
        ]
    );
    assert_eq!(
        summary.outcome.results.results()[0].delta,
        ResourceDelta::new(1, 0, 0)
    );

    let audit = load_audit(&tree);
    assert!(!audit.success);
    assert_eq!(audit.totals.failed, 1);
    assert_eq!(audit.execution_levels.len(), 3);
    assert_eq!(audit.services.len(), 2);
}

#[test]
fn dry_run_reports_every_level_without_invoking_tool() {
    let tree = ServiceTree::new("toronto").expect("tree");
    for name in ["identity", "network", "oss", "compute"] {
        tree.service(name, "").expect("service");
    }
    let tool = ScriptedTool::new().script("identity", Step::Init, exit(1, "", "no creds"));
    let mut options = options(
        &tree,
        Action::Apply,
        &[
            "toronto/identity/main.tf",
            "toronto/network/main.tf",
            "toronto/oss/main.tf",
            "toronto/compute/main.tf",
        ],
    );
    options.dry_run = true;
    options.parallel = true;

    let summary = run(&options, &OrchestratorConfig::default(), &tool).expect("run");

    assert!(tool.calls().is_empty());
    assert_eq!(summary.exit_code(), exit_codes::OK);
    assert_eq!(
        summary.plan.levels,
        vec![vec!["identity"], vec!["network", "oss"], vec!["compute"]]
    );
    assert_eq!(summary.outcome.results.len(), 4);
    assert!(load_audit(&tree).dry_run);
}

#[test]
fn missing_change_source_falls_back_to_all_services() {
    let tree = ServiceTree::new("toronto").expect("tree");
    tree.service("identity", "").expect("identity");
    tree.service("custom", "").expect("custom");
    tree.empty_dir("docs").expect("docs");
    let mut options = RunOptions::new(Action::Plan, tree.working_dir());
    options.changes = ChangeSource {
        changed_files: Some(tree.root().join("absent.txt")),
        repo_root: tree.root().to_path_buf(),
        ..ChangeSource::default()
    };
    options.report_path = Some(tree.root().join("results.md"));
    options.audit_path = Some(tree.root().join("audit.json"));
    options.dry_run = true;

    let summary = run(&options, &OrchestratorConfig::default(), &ScriptedTool::new())
        .expect("run");

    assert!(summary.changes.degraded);
    assert_eq!(summary.changes.services(), vec!["custom", "identity"]);
    // custom has no dependency entry and becomes a root alongside identity.
    assert_eq!(summary.plan.levels, vec![vec!["custom", "identity"]]);
}

#[test]
fn config_dependencies_override_built_in_tiers() {
    let tree = ServiceTree::new("toronto").expect("tree");
    tree.service("app", "").expect("app");
    tree.service("db", "").expect("db");
    let config: OrchestratorConfig = toml::from_str(
        r#"
[dependencies]
app = ["db"]
db = []
"#,
    )
    .expect("config");
    let tool = ScriptedTool::new();
    let options = options(&tree, Action::Plan, &["toronto/app/main.tf", "toronto/db/main.tf"]);

    let summary = run(&options, &config, &tool).expect("run");

    assert_eq!(summary.plan.levels, vec![vec!["db"], vec!["app"]]);
    assert_eq!(tool.invoked_services(), vec!["db", "app"]);
}
