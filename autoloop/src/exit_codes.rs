//! Stable exit codes for the `autoloop` CLI.

/// Command succeeded; for `run`, the stability threshold was reached.
pub const OK: i32 = 0;
/// Invalid config, arguments or an aborted run.
pub const INVALID: i32 = 1;
/// `autoloop run` exhausted its cycle budget below the threshold.
pub const BUDGET_EXHAUSTED: i32 = 2;
