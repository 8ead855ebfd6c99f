//! Dependency-ordered terraform orchestration.
//!
//! This crate decides which infrastructure services changed, orders them into
//! dependency levels, and runs the provisioning tool for each service with
//! fail-fast semantics between levels. The architecture enforces a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (leveling, path classification,
//!   summary parsing, result aggregation). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, git, process execution,
//!   config, reports). Isolated to enable fakes in tests.
//!
//! Orchestration modules ([`runner`], [`engine`], [`run`]) coordinate core
//! logic with I/O to implement the CLI.

pub mod core;
pub mod engine;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod run;
pub mod runner;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
