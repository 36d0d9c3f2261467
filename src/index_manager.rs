//! Index lifecycle management: identity, staleness, and pruning.
//!
//! Each distinct source file set gets its own persisted index directory,
//! keyed by a content-derived identity: a SHA-256 hash over the sorted
//! `(path, mtime, size)` triples of the files. Unchanged files reuse the
//! same directory; any add/remove/modify yields a new identity and forces
//! a rebuild.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Manages the base directory holding persisted index directories.
pub struct IndexManager {
    base_dir: PathBuf,
}

impl IndexManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Stable short identity for a file set.
    ///
    /// Hashes the sorted `(path, mtime, size)` triples; files that no
    /// longer exist are skipped. Two calls over an unchanged file set
    /// produce the same identity.
    pub fn index_identity(&self, files: &[PathBuf]) -> String {
        let mut sorted: Vec<&PathBuf> = files.iter().collect();
        sorted.sort();

        let mut parts = Vec::with_capacity(sorted.len());
        for path in sorted {
            if let Ok(meta) = std::fs::metadata(path) {
                let mtime = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| format!("{}.{:09}", d.as_secs(), d.subsec_nanos()))
                    .unwrap_or_default();
                parts.push(format!("{}:{}:{}", path.display(), mtime, meta.len()));
            }
        }

        let mut hasher = Sha256::new();
        hasher.update(parts.join("|").as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest[..8].to_string()
    }

    /// Directory where the index for this file set lives (or would live).
    pub fn index_path(&self, files: &[PathBuf]) -> PathBuf {
        self.base_dir
            .join(format!("index_{}", self.index_identity(files)))
    }

    /// True if the index is absent or any source file is newer than the
    /// index directory.
    pub fn is_stale(&self, files: &[PathBuf], index_path: &Path) -> bool {
        let index_mtime = match std::fs::metadata(index_path).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(_) => return true,
        };

        for path in files {
            match std::fs::metadata(path).and_then(|m| m.modified()) {
                Ok(t) if t > index_mtime => return true,
                Ok(_) => {}
                Err(_) => return true,
            }
        }
        false
    }

    /// List all index directories under the base directory.
    pub fn list_indices(&self) -> Result<Vec<PathBuf>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }
        let mut dirs = Vec::new();
        for entry in std::fs::read_dir(&self.base_dir)
            .with_context(|| format!("Failed to read {}", self.base_dir.display()))?
        {
            let entry = entry?;
            if entry.path().is_dir() {
                dirs.push(entry.path());
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    /// Delete all index directories. Used before a full rebuild.
    pub fn clear_all(&self) -> Result<()> {
        for dir in self.list_indices()? {
            std::fs::remove_dir_all(&dir)
                .with_context(|| format!("Failed to remove index {}", dir.display()))?;
        }
        Ok(())
    }

    /// Retain only the `keep_latest` most-recently-modified index
    /// directories. A directory that cannot be deleted is logged and
    /// skipped, not fatal.
    pub fn prune(&self, keep_latest: usize) -> Result<usize> {
        let dirs = self.list_indices()?;
        if dirs.len() <= keep_latest {
            return Ok(0);
        }

        let mut with_mtime: Vec<(PathBuf, SystemTime)> = dirs
            .into_iter()
            .map(|d| {
                let mtime = std::fs::metadata(&d)
                    .and_then(|m| m.modified())
                    .unwrap_or(UNIX_EPOCH);
                (d, mtime)
            })
            .collect();
        with_mtime.sort_by(|a, b| b.1.cmp(&a.1));

        let mut removed = 0;
        for (dir, _) in with_mtime.into_iter().skip(keep_latest) {
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => {
                    info!(index = %dir.display(), "removed old index");
                    removed += 1;
                }
                Err(e) => {
                    warn!(index = %dir.display(), error = %e, "could not remove index");
                }
            }
        }
        Ok(removed)
    }
}
