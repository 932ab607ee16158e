//! Stable exit codes for homeostat CLI commands.
//!
//! Schedulers can branch on these without parsing output.

/// Command succeeded (including idle cycles and failed-but-recorded delegate runs).
pub const OK: i32 = 0;
/// Command failed: bad config, unwritable state, or another unexpected error.
pub const ERROR: i32 = 1;
/// `homeostat cycle` skipped its run because of backoff.
pub const BACKOFF: i32 = 2;
/// Another cycle holds the lock.
pub const LOCKED: i32 = 3;
