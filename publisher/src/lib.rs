//! Post-build publisher: commit the workspace, tag the build, push to the remote.
//!
//! After a build's result is final, the publisher commits whatever the build
//! left in the working copy, tags HEAD as `<project>-<number>`, brings the
//! build record's revision in line with HEAD, and pushes branch and tags to
//! the first configured remote. The layout keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (naming, outcome ranking, revision
//!   reconciliation). No I/O.
//! - **[`io`]**: Side-effecting operations (git subprocesses, build records,
//!   configuration, environment, build log).
//!
//! [`reconcile`] sequences the git operations for one build; [`publish`] is the
//! step the host invokes, which wires collaborators together and turns errors
//! into a failed build.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod publish;
pub mod reconcile;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
