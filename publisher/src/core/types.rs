//! Shared deterministic types for the publisher core.
//!
//! These types define stable contracts between the engine, the façade and the
//! host. They must not depend on external state or I/O.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Identity of the build being published, supplied by the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BuildIdentity {
    pub project: String,
    pub number: u64,
}

impl BuildIdentity {
    /// Build an identity, rejecting project names that cannot live inside a git ref.
    pub fn new(project: impl Into<String>, number: u64) -> Result<Self> {
        let project = project.into();
        validate_project_name(&project)?;
        Ok(Self { project, number })
    }
}

impl fmt::Display for BuildIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.project, self.number)
    }
}

/// Validate that a project name is safe for use in tag names.
pub fn validate_project_name(project: &str) -> Result<()> {
    if project.is_empty() {
        return Err(anyhow!("project name must not be empty"));
    }
    if project.starts_with('.') || project.starts_with('-') {
        return Err(anyhow!(
            "project name must not start with '.' or '-' (got '{project}')"
        ));
    }
    if project.contains("..") {
        return Err(anyhow!("project name must not contain '..' (got '{project}')"));
    }
    if project
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'))
    {
        return Err(anyhow!(
            "project name must be [A-Za-z0-9._-] only (got '{project}')"
        ));
    }
    Ok(())
}

/// Result rank of a build.
///
/// Variants are declared worst-first so the derived ordering reads naturally:
/// `Success > Unstable > Failure > NotBuilt > Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildOutcome {
    Aborted,
    NotBuilt,
    Failure,
    Unstable,
    Success,
}

impl BuildOutcome {
    /// True if `self` ranks at least as well as `threshold`.
    pub fn is_better_or_equal(self, threshold: BuildOutcome) -> bool {
        self >= threshold
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BuildOutcome::Aborted => "ABORTED",
            BuildOutcome::NotBuilt => "NOT_BUILT",
            BuildOutcome::Failure => "FAILURE",
            BuildOutcome::Unstable => "UNSTABLE",
            BuildOutcome::Success => "SUCCESS",
        }
    }
}

impl fmt::Display for BuildOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildOutcome {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "ABORTED" => Ok(BuildOutcome::Aborted),
            "NOT_BUILT" => Ok(BuildOutcome::NotBuilt),
            "FAILURE" => Ok(BuildOutcome::Failure),
            "UNSTABLE" => Ok(BuildOutcome::Unstable),
            "SUCCESS" => Ok(BuildOutcome::Success),
            _ => Err(anyhow!(
                "unknown build outcome '{s}' (expected success, unstable, failure, not_built or aborted)"
            )),
        }
    }
}

/// The remote and branch the build is published to.
///
/// `branch` is the raw configured name; the wildcard token is resolved by the
/// engine right before use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub name: String,
    pub uri: String,
    pub branch: String,
}

static REVISION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[0-9a-f]{40}|[0-9a-f]{64})$").expect("revision pattern is valid")
});

/// Full commit hash (SHA-1 or SHA-256 object format). Equality only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RevisionId(String);

impl RevisionId {
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        if !REVISION_RE.is_match(&normalized) {
            return Err(anyhow!("not a full commit hash: '{}'", raw.trim()));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RevisionId {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        RevisionId::parse(&value)
    }
}

impl From<RevisionId> for String {
    fn from(value: RevisionId) -> Self {
        value.0
    }
}
