//! Tag names, commit messages and branch resolution.

use crate::core::types::BuildIdentity;

/// Branch token meaning "any branch" in SCM configuration.
pub const WILDCARD_BRANCH: &str = "**";

/// Tag created for a published build: `<project>-<number>`.
pub fn build_tag(build: &BuildIdentity) -> String {
    format!("{}-{}", build.project, build.number)
}

/// Marker tag left behind by the checkout step: `<prefix>-<project>-<number>`.
pub fn stale_tag(prefix: &str, build: &BuildIdentity) -> String {
    format!("{prefix}-{}", build_tag(build))
}

/// Message used for both the build commit and the annotated build tag.
pub fn build_message(tag: &str) -> String {
    format!("Build: {tag}")
}

/// Resolve the configured branch to a concrete push target.
///
/// Only the bare wildcard is substituted; this is not a general branch matcher.
pub fn resolve_branch<'a>(configured: &'a str, default_branch: &'a str) -> &'a str {
    if configured == WILDCARD_BRANCH {
        default_branch
    } else {
        configured
    }
}

/// Refspec that pushes the current HEAD to `branch` on the remote.
pub fn head_refspec(branch: &str) -> String {
    format!("HEAD:{branch}")
}
