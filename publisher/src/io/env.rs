//! Build environment resolution.
//!
//! The resolved variables are layered on top of the publisher's own process
//! environment for every git invocation.

use std::path::PathBuf;

use thiserror::Error;
use tracing::debug;

use crate::io::git::EnvVars;

#[derive(Debug, Error)]
pub enum EnvError {
    /// Resolution was cut short (e.g. the read was interrupted).
    #[error("environment resolution interrupted")]
    Interrupted,
    #[error("environment resolution failed: {0}")]
    Failed(#[source] anyhow::Error),
}

/// Supplies the environment a build's VCS commands run with.
pub trait EnvResolver {
    fn resolve(&self) -> Result<EnvVars, EnvError>;
}

/// No overlay: commands see exactly the publisher's process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct InheritedEnv;

impl EnvResolver for InheritedEnv {
    fn resolve(&self) -> Result<EnvVars, EnvError> {
        Ok(EnvVars::new())
    }
}

/// Fixed set of variables.
#[derive(Debug, Clone, Default)]
pub struct FixedEnv(pub EnvVars);

impl EnvResolver for FixedEnv {
    fn resolve(&self) -> Result<EnvVars, EnvError> {
        Ok(self.0.clone())
    }
}

/// Variables read from a dotenv-style `KEY=VALUE` file written by the host.
#[derive(Debug, Clone)]
pub struct EnvFile {
    path: PathBuf,
}

impl EnvFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl EnvResolver for EnvFile {
    fn resolve(&self) -> Result<EnvVars, EnvError> {
        debug!(path = %self.path.display(), "reading build environment");
        let iter = dotenvy::from_path_iter(&self.path).map_err(classify)?;
        let mut vars = EnvVars::new();
        for item in iter {
            let (key, value) = item.map_err(classify)?;
            vars.insert(key, value);
        }
        debug!(count = vars.len(), "build environment resolved");
        Ok(vars)
    }
}

fn classify(err: dotenvy::Error) -> EnvError {
    match err {
        dotenvy::Error::Io(io) if io.kind() == std::io::ErrorKind::Interrupted => {
            EnvError::Interrupted
        }
        other => EnvError::Failed(anyhow::Error::new(other)),
    }
}
