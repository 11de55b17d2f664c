//! Post-build publish step.
//!
//! The host calls [`PublishStep::perform`] once the build result is final. The
//! step never lets an error escape: failures are logged under a category, the
//! build is marked FAILURE, and a [`StepReport::Failed`] comes back.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::types::{BuildIdentity, BuildOutcome};
use crate::error::FailureCategory;
use crate::io::build_record::BuildRecordStore;
use crate::io::config::{PublisherConfig, ScmKind};
use crate::io::env::{EnvError, EnvResolver};
use crate::io::git::{EnvVars, VcsBinder};
use crate::io::log_sink::LogSink;
use crate::reconcile::{PublishReport, ReconcileOutcome, ReconcileRequest, reconcile};

/// Registration data for the step. Carries no runtime state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepDescriptor {
    pub display_name: &'static str,
    /// The step runs after the build result is finalized and cannot change it to success.
    pub runs_after_finalized: bool,
    pub applicable_to_all_jobs: bool,
}

pub const DESCRIPTOR: StepDescriptor = StepDescriptor {
    display_name: "Commit project workspace updates and push code and tags to first remote",
    runs_after_finalized: true,
    applicable_to_all_jobs: true,
};

/// The host's view of the build being published.
#[derive(Debug, Clone)]
pub struct Build {
    identity: BuildIdentity,
    workspace: PathBuf,
    outcome: BuildOutcome,
}

impl Build {
    pub fn new(identity: BuildIdentity, workspace: impl Into<PathBuf>, outcome: BuildOutcome) -> Self {
        Self {
            identity,
            workspace: workspace.into(),
            outcome,
        }
    }

    pub fn identity(&self) -> &BuildIdentity {
        &self.identity
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn outcome(&self) -> BuildOutcome {
        self.outcome
    }

    pub fn set_outcome(&mut self, outcome: BuildOutcome) {
        self.outcome = outcome;
    }
}

/// What the step did, as reported to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum StepReport {
    /// The job does not use git; the step did not run.
    Declined,
    /// The build ranked below the publish threshold.
    NoAction,
    Published(PublishReport),
    Failed {
        category: FailureCategory,
        message: String,
    },
}

impl StepReport {
    /// True only when the step ran and published the build.
    pub fn ran_and_changed(&self) -> bool {
        matches!(self, StepReport::Published(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, StepReport::Failed { .. })
    }
}

/// Log a step failure under its category, one `caused by:` line per source.
///
/// Used for anything that goes wrong once the build log is open, including
/// setup the host does before [`PublishStep::perform`] can run.
pub fn report_failure(err: &anyhow::Error, log: &dyn LogSink) -> StepReport {
    let category = FailureCategory::of(err);
    warn!(%category, err = %format!("{err:#}"), "publish step failed");
    log.error(&format!("{}: {err}", category.label()));
    for cause in err.chain().skip(1) {
        log.error(&format!("  caused by: {cause}"));
    }
    StepReport::Failed {
        category,
        message: format!("{err:#}"),
    }
}

/// The publish step wired to its collaborators.
pub struct PublishStep<'a, S, E, B> {
    config: &'a PublisherConfig,
    store: &'a S,
    env: &'a E,
    binder: &'a B,
}

impl<'a, S, E, B> PublishStep<'a, S, E, B>
where
    S: BuildRecordStore,
    E: EnvResolver,
    B: VcsBinder,
{
    pub fn new(config: &'a PublisherConfig, store: &'a S, env: &'a E, binder: &'a B) -> Self {
        Self {
            config,
            store,
            env,
            binder,
        }
    }

    /// Publish `build`. Marks the build FAILURE if the step itself fails.
    #[instrument(skip_all, fields(build = %build.identity(), outcome = %build.outcome()))]
    pub fn perform(&self, build: &mut Build, log: &dyn LogSink) -> StepReport {
        if self.config.scm.kind != ScmKind::Git {
            info!(kind = ?self.config.scm.kind, "job does not use git, declining");
            return StepReport::Declined;
        }

        let env = self.resolve_env(log);

        match self.publish(build, env, log) {
            Ok(report) => report,
            Err(err) => {
                build.set_outcome(BuildOutcome::Failure);
                report_failure(&err, log)
            }
        }
    }

    fn resolve_env(&self, log: &dyn LogSink) -> EnvVars {
        match self.env.resolve() {
            Ok(vars) => vars,
            Err(EnvError::Interrupted) => {
                log.error("Interrupted exception getting environment .. trying empty environment");
                EnvVars::new()
            }
            Err(err) => {
                log.error(&format!(
                    "Unable to resolve environment: {err:#} .. trying empty environment"
                ));
                EnvVars::new()
            }
        }
    }

    fn publish(&self, build: &Build, env: EnvVars, log: &dyn LogSink) -> Result<StepReport> {
        let target = self.config.scm.remote_target()?;
        let reference = self
            .store
            .get_or_create(build.identity())
            .context("load build record")?;

        let request = ReconcileRequest {
            build: build.identity().clone(),
            outcome: build.outcome(),
            target,
            threshold: self.config.publish_threshold,
            stale_tag_prefix: self.config.stale_tag_prefix.clone(),
            default_branch: self.config.default_branch.clone(),
        };

        let vcs = self
            .binder
            .bind(build.workspace(), self.config.git_options(env), log);
        match reconcile(&*vcs, &request, reference, log)? {
            ReconcileOutcome::NoAction => Ok(StepReport::NoAction),
            ReconcileOutcome::Published(report) => {
                self.store_revision(build.identity(), &report)?;
                Ok(StepReport::Published(report))
            }
        }
    }

    /// Copy the engine's revision into the record as it stands now.
    ///
    /// Another collaborator may have rewritten the record while git ran, so
    /// only the revision field is carried over, and only when HEAD was known.
    fn store_revision(&self, build: &BuildIdentity, published: &PublishReport) -> Result<()> {
        let mut current = match self.store.get(build).context("reload build record")? {
            Some(record) => record,
            None => {
                warn!(%build, "build record vanished during publish, saving engine copy");
                published.record.clone()
            }
        };
        if let Some(revision) = published.revision.current() {
            current.set_last_revision(revision.clone());
        }
        self.store
            .save(build, &current)
            .context("save build record")
    }
}
