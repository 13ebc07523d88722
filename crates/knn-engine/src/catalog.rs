//! Directory-backed group catalog.
//!
//! Groups map to subdirectories of the data root; every recognized index
//! file inside a group's directory is one cache key. Warmup walks this
//! catalog to pre-load a group ahead of query traffic.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::EngineError;
use crate::kind::EngineKind;

/// Enumerates groups and their index files under a data root.
#[derive(Debug, Clone)]
pub struct Catalog {
    root: PathBuf,
}

impl Catalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// List all group names (subdirectories of the root).
    pub fn groups(&self) -> Result<Vec<String>, EngineError> {
        let mut groups = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                groups.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        groups.sort();
        Ok(groups)
    }

    /// List the index files belonging to `group`, as (key, kind) pairs.
    ///
    /// Keys are absolute-ish path strings, the same strings used as cache
    /// keys. Files with unrecognized extensions are skipped.
    pub fn keys_for_group(&self, group: &str) -> Result<Vec<(String, EngineKind)>, EngineError> {
        let group_dir = self.root.join(group);
        if !group_dir.is_dir() {
            return Err(EngineError::NotFound(group_dir));
        }

        let mut keys = Vec::new();
        let mut pending = vec![group_dir];
        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                if entry.file_type()?.is_dir() {
                    pending.push(path);
                } else if let Ok(kind) = EngineKind::from_path(&path) {
                    keys.push((path.to_string_lossy().to_string(), kind));
                } else {
                    debug!(path = %path.display(), "Skipping non-index file");
                }
            }
        }
        keys.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(keys)
    }
}
