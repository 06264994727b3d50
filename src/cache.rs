//! Memoized conformance-runner logs.
//!
//! A suite run can take most of an hour, so a finished log is kept in the
//! data directory and reused by later runs until `clear` (or `--clean`)
//! removes it. An entry only appears once the runner exits: output goes to a
//! staging file that is renamed into place by `commit`, so a run killed by
//! the supervisor never leaves a half-written entry behind.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::suite::{Runtime, Scope};

/// Cache key: which suite, run on which runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogKey {
    pub scope: Scope,
    pub runtime: Runtime,
}

impl LogKey {
    pub fn new(scope: Scope, runtime: Runtime) -> Self {
        Self { scope, runtime }
    }

    pub fn file_name(&self) -> String {
        format!("suite_{}_{}.log", self.scope, self.runtime)
    }
}

pub struct LogCache {
    root: PathBuf,
}

impl LogCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, key: LogKey) -> PathBuf {
        self.root.join(key.file_name())
    }

    /// Contents of a committed entry. A missing entry is `Ok(None)`.
    pub fn get(&self, key: LogKey) -> Result<Option<String>> {
        let path = self.path(key);
        match fs::read(&path) {
            // Runner output is not guaranteed to be UTF-8.
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    pub fn contains(&self, key: LogKey) -> bool {
        self.path(key).is_file()
    }

    /// Store `text` under `key`, replacing any previous entry.
    pub fn put(&self, key: LogKey, text: &str) -> Result<()> {
        let staging = self.staging_path(key)?;
        fs::write(&staging, text)
            .with_context(|| format!("failed to write {}", staging.display()))?;
        self.commit(key)
    }

    /// Where a runner should write its output before `commit`.
    pub fn staging_path(&self, key: LogKey) -> Result<PathBuf> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create {}", self.root.display()))?;
        Ok(self.path(key).with_extension("log.tmp"))
    }

    /// Promote the staging file to a cache entry.
    pub fn commit(&self, key: LogKey) -> Result<()> {
        let staging = self.path(key).with_extension("log.tmp");
        let target = self.path(key);
        fs::rename(&staging, &target).with_context(|| {
            format!("failed to move {} to {}", staging.display(), target.display())
        })
    }

    pub fn remove(&self, key: LogKey) -> Result<()> {
        for path in [self.path(key), self.path(key).with_extension("log.tmp")] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("failed to remove {}", path.display()));
                }
            }
        }
        Ok(())
    }

    /// Drop every entry, committed or staged.
    pub fn clear(&self) -> Result<()> {
        for scope in Scope::ALL {
            for runtime in [Runtime::Candidate, Runtime::Reference] {
                self.remove(LogKey::new(scope, runtime))?;
            }
        }
        Ok(())
    }
}

/// Remove logs, staged logs and downloaded archives from `dir`, leaving
/// snapshots and rendered pages. Returns the removed paths.
pub fn clean_transient(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", dir.display())),
    };

    let mut removed = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.ends_with(".log") || name.ends_with(".log.tmp") || name.ends_with(".zip") {
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
            removed.push(path);
        }
    }
    removed.sort();
    Ok(removed)
}
