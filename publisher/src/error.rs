//! Typed failures and their build-log categories.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Failure of a single VCS command.
#[derive(Debug, Error)]
pub enum VcsError {
    /// The command ran and exited nonzero.
    #[error("`{command}` failed with status {code:?}: {stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The command did not finish within the configured timeout and was killed.
    #[error("`{command}` timed out after {timeout:?}")]
    TimedOut { command: String, timeout: Duration },

    /// The command succeeded but its output could not be parsed.
    #[error("`{command}` produced unparseable output: {detail}")]
    Unparseable { command: String, detail: String },

    /// The executable could not be started or its pipes failed.
    #[error("`{command}` could not be run: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Category a step failure is logged under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    /// A VCS command failed, timed out, or returned garbage.
    Git,
    /// Filesystem or process I/O failed underneath the step.
    Io,
    /// Anything else.
    Unexpected,
}

impl FailureCategory {
    /// Classify an error chain.
    ///
    /// A `VcsError` anywhere in the chain decides the category (spawn problems
    /// count as I/O). Otherwise any `std::io::Error` in the chain makes it I/O.
    pub fn of(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(vcs) = cause.downcast_ref::<VcsError>() {
                return match vcs {
                    VcsError::Spawn { .. } => FailureCategory::Io,
                    _ => FailureCategory::Git,
                };
            }
        }
        if err
            .chain()
            .any(|cause| cause.downcast_ref::<std::io::Error>().is_some())
        {
            return FailureCategory::Io;
        }
        FailureCategory::Unexpected
    }

    /// Prefix used on the build log line.
    pub fn label(self) -> &'static str {
        match self {
            FailureCategory::Git => "Git Exception",
            FailureCategory::Io => "IO Exception",
            FailureCategory::Unexpected => "Exception",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
