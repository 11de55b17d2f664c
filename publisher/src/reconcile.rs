//! Reconciliation engine: clean up, commit, tag, reconcile and push one build.
//!
//! The sequence is strictly ordered and every step runs at most once. An error
//! aborts the remaining steps; refs already pushed stay pushed.

use tracing::{debug, info, instrument};

use crate::core::naming::{build_message, build_tag, head_refspec, resolve_branch, stale_tag};
use crate::core::revision::{RevisionChange, reconcile_revision};
use crate::core::types::{BuildIdentity, BuildOutcome, RemoteTarget};
use crate::error::VcsError;
use crate::io::build_record::BuildRecord;
use crate::io::git::Vcs;
use crate::io::log_sink::LogSink;

/// Everything the engine needs to know about the build being published.
#[derive(Debug, Clone)]
pub struct ReconcileRequest {
    pub build: BuildIdentity,
    pub outcome: BuildOutcome,
    pub target: RemoteTarget,
    /// Builds ranked below this are left alone.
    pub threshold: BuildOutcome,
    pub stale_tag_prefix: String,
    /// Substituted for the `**` branch wildcard.
    pub default_branch: String,
}

/// Whether the working tree produced a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    NothingToCommit,
}

/// What a completed publish did.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishReport {
    pub build_tag: String,
    pub remote_branch: String,
    pub commit: CommitOutcome,
    pub revision: RevisionChange,
    /// The reference record, with its revision updated when HEAD moved.
    pub record: BuildRecord,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// Outcome below threshold: only the stale tag was cleaned up.
    NoAction,
    Published(PublishReport),
}

/// Run the publish sequence for one build.
///
/// `record` is the build record captured before any work began; its revision
/// is what the fresh HEAD is compared against.
#[instrument(skip_all, fields(build = %request.build, outcome = %request.outcome))]
pub fn reconcile<V: Vcs + ?Sized>(
    vcs: &V,
    request: &ReconcileRequest,
    mut record: BuildRecord,
    log: &dyn LogSink,
) -> Result<ReconcileOutcome, VcsError> {
    let stale = stale_tag(&request.stale_tag_prefix, &request.build);
    if vcs.delete_tag(&stale)? {
        debug!(tag = %stale, "deleted stale marker tag");
    }

    if !request.outcome.is_better_or_equal(request.threshold) {
        info!(threshold = %request.threshold, "build below publish threshold, nothing to do");
        return Ok(ReconcileOutcome::NoAction);
    }

    let tag = build_tag(&request.build);
    let message = build_message(&tag);
    let remote_branch = resolve_branch(&request.target.branch, &request.default_branch).to_string();

    log.println(&format!(
        "Committing changes, tagging and pushing result of build number {tag} to {}:{remote_branch}",
        request.target.name
    ));

    vcs.stage_all()?;

    let commit = if vcs.has_pending_changes()? {
        vcs.commit(&message)?;
        CommitOutcome::Committed
    } else {
        log.println("Nothing to commit. No modifications to working tree");
        CommitOutcome::NothingToCommit
    };

    vcs.create_annotated_tag(&tag, &message)?;

    let recent = vcs.list_recent_revisions(1, "HEAD")?;
    let revision = reconcile_revision(record.last_revision(), &recent);
    if let RevisionChange::Updated { previous, current } = &revision {
        let previous = previous
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "(none)".to_string());
        log.println(&format!("Build Revision:{previous}"));
        log.println(&format!("Post-Commit Revision:{current}"));
        record.set_last_revision(current.clone());
    }

    vcs.push_ref(&request.target.uri, &head_refspec(&remote_branch))?;
    vcs.push_tags(&request.target.uri)?;

    info!(
        tag = %tag,
        branch = %remote_branch,
        ?commit,
        revision_updated = revision.is_updated(),
        "build published"
    );
    Ok(ReconcileOutcome::Published(PublishReport {
        build_tag: tag,
        remote_branch,
        commit,
        revision,
        record,
    }))
}
