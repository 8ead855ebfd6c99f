//! Stable exit codes for the orchestrator CLI.

/// Every attempted service succeeded, or no services changed.
pub const OK: i32 = 0;
/// At least one attempted service did not succeed.
pub const FAILED: i32 = 1;
/// Fatal configuration or setup error; no report was produced.
pub const INVALID: i32 = 2;
