//! Persisted results of one full run.
//!
//! Snapshots are written once as `data-<YYYYMMDDHHMMSS>.dat` and never
//! modified. Because the stamp sorts lexicographically, the greatest file
//! name is the latest snapshot.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::metric::{MetricName, MetricValue};

const STAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const PREFIX: &str = "data-";
const EXTENSION: &str = ".dat";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    timestamp: DateTime<Utc>,
    metrics: BTreeMap<MetricName, MetricValue>,
}

impl Snapshot {
    /// The timestamp is truncated to whole seconds, the resolution of the
    /// file name.
    pub fn new(timestamp: DateTime<Utc>, metrics: BTreeMap<MetricName, MetricValue>) -> Self {
        Self {
            timestamp: timestamp.trunc_subsecs(0),
            metrics,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn metrics(&self) -> &BTreeMap<MetricName, MetricValue> {
        &self.metrics
    }

    pub fn get(&self, name: MetricName) -> Option<&MetricValue> {
        self.metrics.get(&name)
    }

    pub fn stamp(&self) -> String {
        self.timestamp.format(STAMP_FORMAT).to_string()
    }

    pub fn file_name(&self) -> String {
        format!("{PREFIX}{}{EXTENSION}", self.stamp())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Snapshot> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Parse the stamp out of a `data-<stamp>.dat` file name.
pub fn parse_stamp(file_name: &str) -> Option<DateTime<Utc>> {
    let stamp = file_name.strip_prefix(PREFIX)?.strip_suffix(EXTENSION)?;
    if stamp.len() != 14 || !stamp.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `snapshot` atomically. An existing snapshot with the same stamp
    /// is never overwritten.
    pub fn save(&self, snapshot: &Snapshot) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let path = self.dir.join(snapshot.file_name());
        if path.exists() {
            anyhow::bail!("snapshot {} already exists", path.display());
        }
        let json = snapshot.to_json()?;
        Snapshot::from_json(&json)
            .with_context(|| format!("refusing to write unreadable {}", path.display()))?;
        let tmp = path.with_extension("dat.tmp");
        fs::write(&tmp, json)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    pub fn load(&self, path: &Path) -> Result<Snapshot> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Snapshot::from_json(&text).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Snapshot files in the store, oldest first.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", self.dir.display()));
            }
        };
        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_str().and_then(parse_stamp).is_some() && entry.file_type()?.is_file() {
                paths.push(entry.path());
            }
        }
        paths.sort();
        Ok(paths)
    }

    pub fn latest(&self) -> Result<Option<Snapshot>> {
        match self.list()?.last() {
            Some(path) => self.load(path).map(Some),
            None => Ok(None),
        }
    }

    /// Every readable snapshot, newest first. Unreadable files are skipped
    /// with a warning.
    pub fn history(&self) -> Result<Vec<Snapshot>> {
        let mut snapshots = Vec::new();
        for path in self.list()?.iter().rev() {
            match self.load(path) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => warn!("{e:#}"),
            }
        }
        Ok(snapshots)
    }
}
