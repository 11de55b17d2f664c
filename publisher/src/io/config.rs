//! Publisher configuration (`publisher.toml`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::{BuildOutcome, RemoteTarget};
use crate::io::atomic::write_atomic;
use crate::io::git::{EnvVars, GitOptions};

/// Publisher configuration (TOML).
///
/// Missing fields fall back to defaults, so a file only needs the `[scm]`
/// remote and branch for a working setup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PublisherConfig {
    /// Kill any single git command that runs longer than this.
    pub command_timeout_secs: u64,

    /// Keep at most this many bytes of each git command's stdout/stderr.
    pub output_limit_bytes: usize,

    /// Prefix of the marker tag left by the checkout step (`<prefix>-<project>-<number>`).
    pub stale_tag_prefix: String,

    /// Branch pushed to when the configured branch is the `**` wildcard.
    pub default_branch: String,

    /// Builds ranked below this are not committed, tagged or pushed.
    pub publish_threshold: BuildOutcome,

    pub scm: ScmConfig,
}

/// Version-control settings of the job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScmConfig {
    pub kind: ScmKind,
    /// Path (or name on `PATH`) of the git executable.
    pub git_executable: PathBuf,
    /// Configured branches, in order. Only the first is published to.
    pub branches: Vec<String>,
    /// Configured remotes, in order. Only the first is published to.
    pub remotes: Vec<RemoteConfig>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScmKind {
    #[default]
    Git,
    Subversion,
    Mercurial,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteConfig {
    pub name: String,
    pub uri: String,
}

impl Default for ScmConfig {
    fn default() -> Self {
        Self {
            kind: ScmKind::Git,
            git_executable: PathBuf::from("git"),
            branches: Vec::new(),
            remotes: Vec::new(),
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 10 * 60,
            output_limit_bytes: 1_000_000,
            stale_tag_prefix: "hudson".to_string(),
            default_branch: "master".to_string(),
            publish_threshold: BuildOutcome::Unstable,
            scm: ScmConfig::default(),
        }
    }
}

impl PublisherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.command_timeout_secs == 0 {
            return Err(anyhow!("command_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.stale_tag_prefix.trim().is_empty() {
            return Err(anyhow!("stale_tag_prefix must not be empty"));
        }
        if self.default_branch.trim().is_empty() {
            return Err(anyhow!("default_branch must not be empty"));
        }
        if self.scm.git_executable.as_os_str().is_empty() {
            return Err(anyhow!("scm.git_executable must not be empty"));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Git settings for a build, with `env` layered on the process environment.
    pub fn git_options(&self, env: EnvVars) -> GitOptions {
        GitOptions {
            executable: self.scm.git_executable.clone(),
            env,
            timeout: self.command_timeout(),
            output_limit_bytes: self.output_limit_bytes,
        }
    }
}

impl ScmConfig {
    /// First configured remote paired with the first configured branch.
    pub fn remote_target(&self) -> Result<RemoteTarget> {
        let remote = self
            .remotes
            .first()
            .ok_or_else(|| anyhow!("no remote configured (scm.remotes is empty)"))?;
        let branch = self
            .branches
            .first()
            .ok_or_else(|| anyhow!("no branch configured (scm.branches is empty)"))?;
        if remote.uri.trim().is_empty() {
            return Err(anyhow!("remote '{}' has an empty uri", remote.name));
        }
        Ok(RemoteTarget {
            name: remote.name.clone(),
            uri: remote.uri.clone(),
            branch: branch.clone(),
        })
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PublisherConfig::default()`.
pub fn load_config(path: &Path) -> Result<PublisherConfig> {
    if !path.exists() {
        let cfg = PublisherConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PublisherConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PublisherConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf).with_context(|| format!("write config {}", path.display()))
}
