//! Build log sinks.
//!
//! The build log is the human-facing product output of a publish run. It is
//! separate from `tracing` diagnostics and is always written, whatever
//! `RUST_LOG` says.

use std::fs::{File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::warn;

/// Append-only, line-oriented sink for build log messages.
///
/// Methods take `&self` so the engine and the VCS adapter can share one sink.
pub trait LogSink {
    fn println(&self, line: &str);

    /// Record an error line. Defaults to an `ERROR: ` prefixed line.
    fn error(&self, line: &str) {
        self.println(&format!("ERROR: {line}"));
    }
}

/// Sink that writes every line to an `io::Write`.
pub struct WriterSink<W: Write> {
    inner: Mutex<W>,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: Mutex::new(writer),
        }
    }
}

impl WriterSink<LineWriter<File>> {
    /// Open `path` for appending, creating parent directories as needed.
    pub fn append_to(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create log dir {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open build log {}", path.display()))?;
        Ok(Self::new(LineWriter::new(file)))
    }
}

impl<W: Write> LogSink for WriterSink<W> {
    fn println(&self, line: &str) {
        let Ok(mut writer) = self.inner.lock() else {
            warn!("build log writer poisoned, dropping line");
            return;
        };
        // A broken build log must never fail the step itself.
        if let Err(e) = writeln!(writer, "{line}") {
            warn!(err = %e, "failed to write build log line");
        }
    }
}

/// Sink that keeps lines in memory (tests, report rendering).
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }
}

impl LogSink for MemorySink {
    fn println(&self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
    }
}
