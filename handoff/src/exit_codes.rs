//! Stable exit codes for handoff CLI commands.

/// Run completed, or paused after its step budget.
pub const OK: i32 = 0;
/// Configuration error, aborted run, or a step that failed.
pub const FAILED: i32 = 1;
/// A step ended in the timeout state.
pub const TIMEOUT: i32 = 2;
