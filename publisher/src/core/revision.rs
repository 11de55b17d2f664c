//! Reconciliation between the recorded build revision and the live HEAD.

use crate::core::types::RevisionId;

/// How the post-commit HEAD relates to the revision stored for the build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevisionChange {
    /// HEAD could not be determined (empty history); the stored revision is kept.
    Unknown,
    /// HEAD equals the stored revision.
    Unchanged(RevisionId),
    /// HEAD differs from the stored revision (or nothing was stored).
    Updated {
        previous: Option<RevisionId>,
        current: RevisionId,
    },
}

impl RevisionChange {
    /// Revision the build record should hold afterwards, if one is known.
    pub fn current(&self) -> Option<&RevisionId> {
        match self {
            RevisionChange::Unknown => None,
            RevisionChange::Unchanged(rev) => Some(rev),
            RevisionChange::Updated { current, .. } => Some(current),
        }
    }

    pub fn is_updated(&self) -> bool {
        matches!(self, RevisionChange::Updated { .. })
    }
}

/// Compare the freshest HEAD revision (first of `recent`) with `stored`.
pub fn reconcile_revision(stored: Option<&RevisionId>, recent: &[RevisionId]) -> RevisionChange {
    let Some(head) = recent.first() else {
        return RevisionChange::Unknown;
    };
    if stored == Some(head) {
        return RevisionChange::Unchanged(head.clone());
    }
    RevisionChange::Updated {
        previous: stored.cloned(),
        current: head.clone(),
    }
}
