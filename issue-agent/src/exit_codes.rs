//! Stable exit codes for issue-agent CLI commands.

/// Command finished, including gate stops (approved, max iterations).
pub const OK: i32 = 0;
/// Runtime failure: tracker, git or filesystem error.
pub const FAILURE: i32 = 1;
/// Missing or invalid configuration; no work was attempted.
pub const USAGE: i32 = 2;
