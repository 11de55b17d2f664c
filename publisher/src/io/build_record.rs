//! Per-build records (`<state-dir>/<project>/<number>.json`).
//!
//! A record is shared with other collaborators (the checkout step writes the
//! remote and branch it built from). The publisher only ever rewrites
//! `last_revision`; every other field round-trips untouched.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::types::{BuildIdentity, RevisionId};
use crate::io::atomic::write_atomic;

/// Persisted per-build state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BuildRecord {
    /// Commit the build system associates with this build.
    pub last_revision: Option<RevisionId>,
    /// Fields owned by other collaborators, preserved verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl BuildRecord {
    pub fn last_revision(&self) -> Option<&RevisionId> {
        self.last_revision.as_ref()
    }

    pub fn set_last_revision(&mut self, revision: RevisionId) {
        self.last_revision = Some(revision);
    }
}

/// Storage for build records, keyed by build identity.
pub trait BuildRecordStore {
    /// Fetch the record, creating and persisting an empty one if absent.
    fn get_or_create(&self, build: &BuildIdentity) -> Result<BuildRecord>;
    /// Fetch the record; `None` when it does not exist.
    fn get(&self, build: &BuildIdentity) -> Result<Option<BuildRecord>>;
    fn save(&self, build: &BuildIdentity, record: &BuildRecord) -> Result<()>;
}

/// Build records stored as pretty JSON files under a state directory.
#[derive(Debug, Clone)]
pub struct JsonRecordStore {
    dir: PathBuf,
}

impl JsonRecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn record_path(&self, build: &BuildIdentity) -> PathBuf {
        self.dir
            .join(&build.project)
            .join(format!("{}.json", build.number))
    }
}

impl BuildRecordStore for JsonRecordStore {
    fn get_or_create(&self, build: &BuildIdentity) -> Result<BuildRecord> {
        if let Some(record) = self.get(build)? {
            return Ok(record);
        }
        debug!(%build, "creating empty build record");
        let record = BuildRecord::default();
        self.save(build, &record)?;
        Ok(record)
    }

    fn get(&self, build: &BuildIdentity) -> Result<Option<BuildRecord>> {
        let path = self.record_path(build);
        if !path.exists() {
            return Ok(None);
        }
        load_record(&path).map(Some)
    }

    fn save(&self, build: &BuildIdentity, record: &BuildRecord) -> Result<()> {
        write_record(&self.record_path(build), record)
    }
}

/// Load a build record from disk.
pub fn load_record(path: &Path) -> Result<BuildRecord> {
    debug!(path = %path.display(), "loading build record");
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read build record {}", path.display()))?;
    let record: BuildRecord = serde_json::from_str(&contents)
        .with_context(|| format!("parse build record {}", path.display()))?;
    Ok(record)
}

/// Atomically write a build record to disk (temp file + rename).
pub fn write_record(path: &Path, record: &BuildRecord) -> Result<()> {
    debug!(path = %path.display(), revision = ?record.last_revision, "writing build record");
    let mut buf = serde_json::to_string_pretty(record)?;
    buf.push('\n');
    write_atomic(path, &buf).with_context(|| format!("write build record {}", path.display()))
}
