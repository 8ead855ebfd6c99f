//! Side-effecting adapters: filesystem, git, subprocesses, config, reports.
//!
//! Everything here touches the outside world. Orchestration code reaches the
//! provisioning tool only through [`tool::ProvisionTool`] so tests can swap in
//! a scripted fake.

pub mod changes;
pub mod config;
pub mod git;
pub mod process;
pub mod report;
pub mod tool;
