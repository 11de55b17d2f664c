//! Test-only helpers: scripted VCS adapter, throwaway git repositories.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::types::RevisionId;
use crate::error::VcsError;
use crate::io::env::{EnvError, EnvResolver};
use crate::io::git::{EnvVars, Git, GitOptions, Vcs, VcsBinder};
use crate::io::log_sink::LogSink;

/// Deterministic revision made of one repeated hex digit.
pub fn rev(c: char) -> RevisionId {
    match RevisionId::parse(&c.to_string().repeat(40)) {
        Ok(rev) => rev,
        Err(err) => panic!("bad test revision '{c}': {err}"),
    }
}

/// A call made against [`ScriptedVcs`], with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VcsCall {
    DeleteTag(String),
    StageAll,
    HasPendingChanges,
    Commit(String),
    CreateAnnotatedTag(String, String),
    ListRecentRevisions(usize, String),
    PushRef(String, String),
    PushTags(String),
}

/// Operation kind, for failure injection and "was it called" checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VcsOp {
    DeleteTag,
    StageAll,
    HasPendingChanges,
    Commit,
    CreateAnnotatedTag,
    ListRecentRevisions,
    PushRef,
    PushTags,
}

impl VcsCall {
    pub fn op(&self) -> VcsOp {
        match self {
            VcsCall::DeleteTag(_) => VcsOp::DeleteTag,
            VcsCall::StageAll => VcsOp::StageAll,
            VcsCall::HasPendingChanges => VcsOp::HasPendingChanges,
            VcsCall::Commit(_) => VcsOp::Commit,
            VcsCall::CreateAnnotatedTag(..) => VcsOp::CreateAnnotatedTag,
            VcsCall::ListRecentRevisions(..) => VcsOp::ListRecentRevisions,
            VcsCall::PushRef(..) => VcsOp::PushRef,
            VcsCall::PushTags(_) => VcsOp::PushTags,
        }
    }
}

/// In-memory [`Vcs`] that records calls and answers from a script.
#[derive(Debug, Default)]
pub struct ScriptedVcs {
    pending_changes: bool,
    head: Option<RevisionId>,
    fail_on: Option<VcsOp>,
    calls: RefCell<Vec<VcsCall>>,
    bound: RefCell<Option<(PathBuf, GitOptions)>>,
}

impl ScriptedVcs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pending_changes(mut self, pending: bool) -> Self {
        self.pending_changes = pending;
        self
    }

    /// Revision reported for HEAD. Without one, history is empty.
    pub fn with_head(mut self, head: RevisionId) -> Self {
        self.head = Some(head);
        self
    }

    pub fn failing_on(mut self, op: VcsOp) -> Self {
        self.fail_on = Some(op);
        self
    }

    pub fn calls(&self) -> Vec<VcsCall> {
        self.calls.borrow().clone()
    }

    pub fn called(&self, op: VcsOp) -> bool {
        self.calls.borrow().iter().any(|call| call.op() == op)
    }

    /// Working directory the adapter was bound to, if it was bound.
    pub fn bound_workdir(&self) -> Option<PathBuf> {
        self.bound.borrow().as_ref().map(|(dir, _)| dir.clone())
    }

    /// Environment overlay the adapter was bound with, if it was bound.
    pub fn bound_env(&self) -> Option<EnvVars> {
        self.bound.borrow().as_ref().map(|(_, opts)| opts.env.clone())
    }

    fn record(&self, call: VcsCall) -> Result<(), VcsError> {
        let op = call.op();
        let command = format!("{call:?}");
        self.calls.borrow_mut().push(call);
        if self.fail_on == Some(op) {
            return Err(VcsError::Failed {
                command,
                code: Some(1),
                stderr: "scripted failure".to_string(),
            });
        }
        Ok(())
    }
}

impl Vcs for ScriptedVcs {
    fn delete_tag(&self, name: &str) -> Result<bool, VcsError> {
        self.record(VcsCall::DeleteTag(name.to_string()))?;
        Ok(false)
    }

    fn stage_all(&self) -> Result<(), VcsError> {
        self.record(VcsCall::StageAll)
    }

    fn has_pending_changes(&self) -> Result<bool, VcsError> {
        self.record(VcsCall::HasPendingChanges)?;
        Ok(self.pending_changes)
    }

    fn commit(&self, message: &str) -> Result<(), VcsError> {
        self.record(VcsCall::Commit(message.to_string()))
    }

    fn create_annotated_tag(&self, name: &str, message: &str) -> Result<(), VcsError> {
        self.record(VcsCall::CreateAnnotatedTag(
            name.to_string(),
            message.to_string(),
        ))
    }

    fn list_recent_revisions(
        &self,
        limit: usize,
        reference: &str,
    ) -> Result<Vec<RevisionId>, VcsError> {
        self.record(VcsCall::ListRecentRevisions(limit, reference.to_string()))?;
        Ok(self.head.iter().take(limit).cloned().collect())
    }

    fn push_ref(&self, remote_uri: &str, refspec: &str) -> Result<(), VcsError> {
        self.record(VcsCall::PushRef(
            remote_uri.to_string(),
            refspec.to_string(),
        ))
    }

    fn push_tags(&self, remote_uri: &str) -> Result<(), VcsError> {
        self.record(VcsCall::PushTags(remote_uri.to_string()))
    }
}

impl VcsBinder for ScriptedVcs {
    fn bind<'a>(
        &'a self,
        workdir: &Path,
        options: GitOptions,
        _log: &'a dyn LogSink,
    ) -> Box<dyn Vcs + 'a> {
        *self.bound.borrow_mut() = Some((workdir.to_path_buf(), options));
        Box::new(self)
    }
}

/// Environment resolver that always fails.
#[derive(Debug, Clone, Copy)]
pub struct FailingEnv {
    interrupted: bool,
}

impl FailingEnv {
    pub fn interrupted() -> Self {
        Self { interrupted: true }
    }

    pub fn failed() -> Self {
        Self { interrupted: false }
    }
}

impl EnvResolver for FailingEnv {
    fn resolve(&self) -> Result<EnvVars, EnvError> {
        if self.interrupted {
            Err(EnvError::Interrupted)
        } else {
            Err(EnvError::Failed(anyhow!("build environment unavailable")))
        }
    }
}

/// A working copy with one commit plus an empty bare remote, both in a temp dir.
pub struct TestRepo {
    temp: TempDir,
    work: PathBuf,
    remote: PathBuf,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let work = temp.path().join("work");
        let remote = temp.path().join("remote.git");
        fs::create_dir_all(&work).context("create work dir")?;

        run_git(temp.path(), &["init", "--bare", "--initial-branch=master", "remote.git"])?;
        run_git(&work, &["init", "--initial-branch=master"])?;
        run_git(&work, &["config", "user.name", "Publisher Test"])?;
        run_git(&work, &["config", "user.email", "publisher@example.com"])?;
        run_git(&work, &["config", "commit.gpgsign", "false"])?;
        run_git(&work, &["config", "tag.gpgsign", "false"])?;
        fs::write(work.join("README.md"), "# test\n").context("write README.md")?;
        run_git(&work, &["add", "-A"])?;
        run_git(&work, &["commit", "-m", "initial"])?;

        Ok(Self { temp, work, remote })
    }

    /// Path of the working copy.
    pub fn path(&self) -> &Path {
        &self.work
    }

    /// Root of the temp dir (holds the working copy and the remote).
    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn remote_uri(&self) -> String {
        self.remote.to_string_lossy().into_owned()
    }

    /// Adapter bound to the working copy with default options.
    pub fn git<'a>(&self, log: &'a dyn LogSink) -> Git<'a> {
        Git::new(&self.work, GitOptions::default(), log)
    }

    /// Run git in the working copy and return trimmed stdout.
    pub fn git_cmd(&self, args: &[&str]) -> Result<String> {
        run_git(&self.work, args)
    }

    pub fn write_file(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.work.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    pub fn head(&self) -> Result<RevisionId> {
        RevisionId::parse(&self.git_cmd(&["rev-parse", "HEAD"])?)
    }

    /// Revision a ref points at in the bare remote (tags are peeled to their commit).
    pub fn remote_rev(&self, reference: &str) -> Result<RevisionId> {
        let spec = format!("{reference}^{{commit}}");
        RevisionId::parse(&run_git(&self.remote, &["rev-parse", "--verify", &spec])?)
    }

    /// Install a `pre-receive` hook in the remote that rejects any tag push.
    pub fn reject_tag_pushes(&self) -> Result<()> {
        let hook = self.remote.join("hooks").join("pre-receive");
        let script = "#!/bin/sh\nwhile read old new ref; do\n  case \"$ref\" in\n    refs/tags/*) echo \"tag pushes are not allowed: $ref\" >&2; exit 1 ;;\n  esac\ndone\nexit 0\n";
        fs::write(&hook, script).with_context(|| format!("write {}", hook.display()))?;
        make_executable(&hook)
    }

    /// Stand-in git executable that never exits and leaves a background
    /// process holding its output pipes.
    pub fn hanging_git(&self) -> Result<PathBuf> {
        let script = self.temp.path().join("hanging-git");
        fs::write(&script, "#!/bin/sh\nsleep 30 &\nexec sleep 30\n")
            .with_context(|| format!("write {}", script.display()))?;
        make_executable(&script)?;
        Ok(script)
    }

    /// Publish the working copy's `master`, then add a commit to the remote
    /// from a second clone so the working copy is no longer a fast-forward.
    pub fn advance_remote(&self) -> Result<RevisionId> {
        let uri = self.remote_uri();
        run_git(&self.work, &["push", &uri, "HEAD:master"])?;
        run_git(self.temp.path(), &["clone", "--branch", "master", &uri, "upstream"])?;
        let upstream = self.temp.path().join("upstream");
        run_git(&upstream, &["config", "user.name", "Upstream Dev"])?;
        run_git(&upstream, &["config", "user.email", "upstream@example.com"])?;
        run_git(&upstream, &["config", "commit.gpgsign", "false"])?;
        fs::write(upstream.join("UPSTREAM.md"), "upstream change\n").context("write UPSTREAM.md")?;
        run_git(&upstream, &["add", "-A"])?;
        run_git(&upstream, &["commit", "-m", "upstream change"])?;
        run_git(&upstream, &["push", "origin", "master"])?;
        RevisionId::parse(&run_git(&upstream, &["rev-parse", "HEAD"])?)
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)
        .with_context(|| format!("stat {}", path.display()))?
        .permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).with_context(|| format!("chmod {}", path.display()))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !out.status.success() {
        return Err(anyhow!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&out.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
}
