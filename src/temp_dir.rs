// src/temp_dir.rs

//! Scoped temporary directories
//!
//! A `TemporaryDirectory` is owned by exactly one operation and removed when
//! that operation's scope ends, on every exit path. Readers of its contents
//! must finish before the owner drops it.

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

/// A labelled directory removed on drop
#[derive(Debug)]
pub struct TemporaryDirectory {
    dir: Option<TempDir>,
    path: PathBuf,
    label: String,
}

impl TemporaryDirectory {
    /// Create a fresh directory under `root` named after `prefix`
    pub fn new_in(root: &Path, prefix: &str, label: &str) -> Result<Self> {
        fs::create_dir_all(root).map_err(|e| {
            Error::IoError(format!(
                "Failed to create scratch directory {}: {}",
                root.display(),
                e
            ))
        })?;

        let dir = tempfile::Builder::new()
            .prefix(&format!("{prefix}-"))
            .tempdir_in(root)
            .map_err(|e| {
                Error::IoError(format!(
                    "Failed to create {} directory under {}: {}",
                    label,
                    root.display(),
                    e
                ))
            })?;
        let path = dir.path().to_path_buf();
        debug!("Created {} directory {}", label, path.display());

        Ok(Self {
            dir: Some(dir),
            path,
            label: label.to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Keep the directory on disk and return its path
    pub fn persist(mut self) -> PathBuf {
        if let Some(dir) = self.dir.take() {
            #[allow(deprecated)]
            let _ = dir.into_path();
        }
        debug!("Keeping {} directory {}", self.label, self.path.display());
        self.path.clone()
    }
}

impl Drop for TemporaryDirectory {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        debug!("Removing {} directory {}", self.label, self.path.display());
        if let Err(e) = dir.close() {
            warn!(
                "Failed to remove {} directory {}: {}",
                self.label,
                self.path.display(),
                e
            );
        }
    }
}
