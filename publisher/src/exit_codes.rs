//! Stable exit codes for publisher CLI commands.

/// The build was published (or the command succeeded).
pub const OK: i32 = 0;
/// The publish step failed and the build was marked FAILURE, or the command errored.
pub const FAILED: i32 = 1;
/// The step did not publish: build below threshold or job not using git.
pub const SKIPPED: i32 = 2;
