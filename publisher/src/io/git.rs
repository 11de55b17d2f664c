//! Git adapter for the publish step.
//!
//! Every operation is a single blocking `git` invocation in the bound working
//! copy. Failures come back as [`VcsError`] so the façade can tell VCS problems
//! apart from everything else.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::core::types::RevisionId;
use crate::error::VcsError;
use crate::io::log_sink::LogSink;
use crate::io::process::{CommandOutput, display_command, run_command_with_timeout};

/// Variables layered on top of the inherited process environment.
pub type EnvVars = BTreeMap<String, String>;

/// Version-control operations the reconciliation engine needs.
pub trait Vcs {
    /// Delete a local tag. Returns `Ok(false)` when the tag does not exist.
    fn delete_tag(&self, name: &str) -> Result<bool, VcsError>;
    /// Stage every working-tree change (new, modified, deleted).
    fn stage_all(&self) -> Result<(), VcsError>;
    /// True iff the index differs from HEAD.
    fn has_pending_changes(&self) -> Result<bool, VcsError>;
    /// Commit the index. Fails when nothing is staged.
    fn commit(&self, message: &str) -> Result<(), VcsError>;
    /// Create an annotated tag at HEAD. Fails when the tag already exists.
    fn create_annotated_tag(&self, name: &str, message: &str) -> Result<(), VcsError>;
    /// Up to `limit` revisions reachable from `reference`, most recent first.
    fn list_recent_revisions(&self, limit: usize, reference: &str)
    -> Result<Vec<RevisionId>, VcsError>;
    /// Push one refspec to the remote at `remote_uri`.
    fn push_ref(&self, remote_uri: &str, refspec: &str) -> Result<(), VcsError>;
    /// Push all local tags to the remote at `remote_uri`.
    fn push_tags(&self, remote_uri: &str) -> Result<(), VcsError>;
}

impl<T: Vcs + ?Sized> Vcs for &T {
    fn delete_tag(&self, name: &str) -> Result<bool, VcsError> {
        (**self).delete_tag(name)
    }
    fn stage_all(&self) -> Result<(), VcsError> {
        (**self).stage_all()
    }
    fn has_pending_changes(&self) -> Result<bool, VcsError> {
        (**self).has_pending_changes()
    }
    fn commit(&self, message: &str) -> Result<(), VcsError> {
        (**self).commit(message)
    }
    fn create_annotated_tag(&self, name: &str, message: &str) -> Result<(), VcsError> {
        (**self).create_annotated_tag(name, message)
    }
    fn list_recent_revisions(
        &self,
        limit: usize,
        reference: &str,
    ) -> Result<Vec<RevisionId>, VcsError> {
        (**self).list_recent_revisions(limit, reference)
    }
    fn push_ref(&self, remote_uri: &str, refspec: &str) -> Result<(), VcsError> {
        (**self).push_ref(remote_uri, refspec)
    }
    fn push_tags(&self, remote_uri: &str) -> Result<(), VcsError> {
        (**self).push_tags(remote_uri)
    }
}

/// Binds a VCS adapter to a build's working copy.
///
/// The façade goes through this seam so tests can substitute a scripted adapter.
pub trait VcsBinder {
    fn bind<'a>(
        &'a self,
        workdir: &Path,
        options: GitOptions,
        log: &'a dyn LogSink,
    ) -> Box<dyn Vcs + 'a>;
}

/// Binds the real `git` subprocess adapter.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitBinder;

impl VcsBinder for GitBinder {
    fn bind<'a>(
        &'a self,
        workdir: &Path,
        options: GitOptions,
        log: &'a dyn LogSink,
    ) -> Box<dyn Vcs + 'a> {
        Box::new(Git::new(workdir, options, log))
    }
}

/// Settings shared by every command a [`Git`] instance runs.
#[derive(Debug, Clone)]
pub struct GitOptions {
    pub executable: PathBuf,
    pub env: EnvVars,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl Default for GitOptions {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("git"),
            env: EnvVars::new(),
            timeout: Duration::from_secs(600),
            output_limit_bytes: 1_000_000,
        }
    }
}

/// `git` subprocess wrapper bound to one working copy and one build log.
pub struct Git<'a> {
    workdir: PathBuf,
    options: GitOptions,
    log: &'a dyn LogSink,
}

impl<'a> Git<'a> {
    pub fn new(workdir: impl Into<PathBuf>, options: GitOptions, log: &'a dyn LogSink) -> Self {
        Self {
            workdir: workdir.into(),
            options,
            log,
        }
    }

    /// True if `refs/tags/<name>` exists locally.
    pub fn tag_exists(&self, name: &str) -> Result<bool, VcsError> {
        let reference = format!("refs/tags/{name}");
        let args = ["show-ref", "--verify", "--quiet", reference.as_str()];
        let output = self.run(&args)?;
        if output.timed_out {
            return Err(self.timed_out(&args));
        }
        // show-ref exits 1 for a missing ref; anything else nonzero is a real failure.
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(self.failed(&args, &output)),
        }
    }

    /// Run a command whose output belongs in the build log.
    fn run_logged(&self, args: &[&str]) -> Result<CommandOutput, VcsError> {
        self.log.println(&format!("> {}", self.command_line(args)));
        let output = self.run_checked(args)?;
        for line in output
            .stdout_lossy()
            .lines()
            .chain(output.stderr_lossy().lines())
        {
            if !line.trim().is_empty() {
                self.log.println(line);
            }
        }
        Ok(output)
    }

    fn run_capture(&self, args: &[&str]) -> Result<String, VcsError> {
        let output = self.run_checked(args)?;
        Ok(output.stdout_lossy())
    }

    fn run_checked(&self, args: &[&str]) -> Result<CommandOutput, VcsError> {
        let output = self.run(args)?;
        if output.timed_out {
            warn!(command = %self.command_line(args), "git command timed out");
            return Err(self.timed_out(args));
        }
        if !output.success() {
            warn!(command = %self.command_line(args), exit_code = ?output.status.code(), "git command failed");
            return Err(self.failed(args, &output));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<CommandOutput, VcsError> {
        let mut cmd = Command::new(&self.options.executable);
        cmd.args(args)
            .current_dir(&self.workdir)
            .envs(&self.options.env)
            // Never block the build thread on a credential prompt.
            .env("GIT_TERMINAL_PROMPT", "0");
        debug!(command = %self.command_line(args), "running git");
        run_command_with_timeout(cmd, self.options.timeout, self.options.output_limit_bytes)
            .map_err(|source| VcsError::Spawn {
                command: self.command_line(args),
                source,
            })
    }

    fn command_line(&self, args: &[&str]) -> String {
        display_command(&self.options.executable.to_string_lossy(), args)
    }

    fn failed(&self, args: &[&str], output: &CommandOutput) -> VcsError {
        VcsError::Failed {
            command: self.command_line(args),
            code: output.status.code(),
            stderr: output.stderr_lossy().trim().to_string(),
        }
    }

    fn timed_out(&self, args: &[&str]) -> VcsError {
        VcsError::TimedOut {
            command: self.command_line(args),
            timeout: self.options.timeout,
        }
    }
}

impl Vcs for Git<'_> {
    #[instrument(skip_all, fields(tag = name))]
    fn delete_tag(&self, name: &str) -> Result<bool, VcsError> {
        if !self.tag_exists(name)? {
            debug!("tag absent, nothing to delete");
            return Ok(false);
        }
        self.run_logged(&["tag", "-d", name])?;
        Ok(true)
    }

    fn stage_all(&self) -> Result<(), VcsError> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    fn has_pending_changes(&self) -> Result<bool, VcsError> {
        let out = self.run_capture(&["diff", "--cached", "--name-only"])?;
        Ok(!out.trim().is_empty())
    }

    #[instrument(skip_all)]
    fn commit(&self, message: &str) -> Result<(), VcsError> {
        self.run_logged(&["commit", "-m", message])?;
        Ok(())
    }

    #[instrument(skip_all, fields(tag = name))]
    fn create_annotated_tag(&self, name: &str, message: &str) -> Result<(), VcsError> {
        self.run_logged(&["tag", "-a", name, "-m", message])?;
        Ok(())
    }

    fn list_recent_revisions(
        &self,
        limit: usize,
        reference: &str,
    ) -> Result<Vec<RevisionId>, VcsError> {
        let max_count = format!("--max-count={limit}");
        let args = ["rev-list", max_count.as_str(), reference];
        let out = self.run_capture(&args)?;
        parse_rev_list(&out).map_err(|err| VcsError::Unparseable {
            command: self.command_line(&args),
            detail: err.to_string(),
        })
    }

    #[instrument(skip_all, fields(refspec = refspec))]
    fn push_ref(&self, remote_uri: &str, refspec: &str) -> Result<(), VcsError> {
        self.run_logged(&["push", remote_uri, refspec])?;
        Ok(())
    }

    #[instrument(skip_all)]
    fn push_tags(&self, remote_uri: &str) -> Result<(), VcsError> {
        self.run_logged(&["push", "--tags", remote_uri])?;
        Ok(())
    }
}

fn parse_rev_list(out: &str) -> anyhow::Result<Vec<RevisionId>> {
    out.lines()
        .filter(|line| !line.trim().is_empty())
        .map(RevisionId::parse)
        .collect()
}
