//! Update batches dropped by the build into the updates directory.
//!
//! Each `*.delta.json` file holds one [`UpdateBatch`]. Files are applied in
//! name order and removed once consumed, so a restarted session never
//! replays them twice.
//!
//! Producers should write under another name and rename into place. A file
//! caught half-written fails to parse and is retried a bounded number of
//! times without waiting for another event.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::{ChangedPath, UpdateBatch};

pub const UPDATE_SUFFIX: &str = ".delta.json";

pub fn is_update_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.len() > UPDATE_SUFFIX.len() && n.ends_with(UPDATE_SUFFIX))
}

/// Update files in `changes` that are ready to be read, in name order.
pub fn arrived(changes: &[ChangedPath], updates_dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<_> = changes
        .iter()
        .filter(|c| !c.kind.is_removal())
        .filter(|c| c.path.parent() == Some(updates_dir) && is_update_file(&c.path))
        .map(|c| c.path.clone())
        .collect();
    files.sort();
    files
}

/// Update files already waiting when the session starts.
pub fn pending_files(updates_dir: &Path) -> Result<Vec<PathBuf>> {
    if !updates_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let entries = fs::read_dir(updates_dir)
        .with_context(|| format!("failed to list {}", updates_dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && is_update_file(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub fn load_batch(path: &Path) -> Result<UpdateBatch> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid update batch {}", path.display()))
}

/// Read and remove an update file.
pub fn consume(path: &Path) -> Result<UpdateBatch> {
    let batch = load_batch(path)?;
    if let Err(e) = fs::remove_file(path) {
        crate::debug!("watch"; "failed to remove {}: {}", path.display(), e);
    }
    Ok(batch)
}

/// Update files that failed to load, most likely still being written.
#[derive(Debug)]
pub struct Retries {
    attempts: BTreeMap<PathBuf, u32>,
    limit: u32,
}

impl Retries {
    pub fn new(limit: u32) -> Self {
        Self {
            attempts: BTreeMap::new(),
            limit,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    /// Record a failed load. Returns false once `path` used up its attempts.
    pub fn failed(&mut self, path: &Path) -> bool {
        let attempts = self.attempts.entry(path.to_path_buf()).or_insert(0);
        *attempts += 1;
        if *attempts > self.limit {
            self.attempts.remove(path);
            return false;
        }
        true
    }

    pub fn succeeded(&mut self, path: &Path) {
        self.attempts.remove(path);
    }

    /// Files to try again, in name order. Files that vanished are dropped.
    pub fn due(&mut self) -> Vec<PathBuf> {
        self.attempts.retain(|path, _| path.is_file());
        self.attempts.keys().cloned().collect()
    }
}
