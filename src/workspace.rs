//! Per-run temp-file arena.
//!
//! Every file a run creates is a `tempfile` in the shared temp directory,
//! named `<prefix>_<random>.<ext>`. Creation is exclusive, so concurrent runs
//! can never collide and no locking is needed. The arena owns one
//! [`TempPath`] per file; dropping the arena drops the handles, which deletes
//! whatever is still tracked on every exit path of the pipeline (success,
//! soft failure, hard failure, panic). The one file that must outlive the run
//! is detached with [`TempArena::keep`].

use crate::error::PrepError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct TempArena {
    dir: PathBuf,
    tracked: BTreeMap<PathBuf, TempPath>,
}

impl TempArena {
    /// Open an arena over `dir`, creating the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, PrepError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| PrepError::io("creating temp directory", &dir, e))?;
        Ok(Self {
            dir,
            tracked: BTreeMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create a fresh, empty file with a unique name and track it. Writers
    /// overwrite it in place.
    pub fn allocate(&mut self, prefix: &str, extension: &str) -> Result<PathBuf, PrepError> {
        let ext = extension.trim_start_matches('.');
        let suffix = if ext.is_empty() {
            String::new()
        } else {
            format!(".{}", ext)
        };
        let handle = tempfile::Builder::new()
            .prefix(&format!("{}_", prefix))
            .suffix(&suffix)
            .tempfile_in(&self.dir)
            .map_err(|e| PrepError::io("creating temp file", &self.dir, e))?
            .into_temp_path();
        let path = handle.to_path_buf();
        self.tracked.insert(path.clone(), handle);
        Ok(path)
    }

    /// Delete a superseded file now.
    pub fn release(&mut self, path: &Path) {
        if let Some(handle) = self.tracked.remove(path) {
            match handle.close() {
                Ok(()) => debug!("Removed temp file {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Could not remove temp file {}: {}", path.display(), e),
            }
        }
    }

    /// Stop tracking `path`; the caller now owns its lifetime.
    pub fn keep(&mut self, path: &Path) -> bool {
        match self.tracked.remove(path) {
            Some(handle) => handle.keep().is_ok(),
            None => false,
        }
    }

    pub fn is_tracked(&self, path: &Path) -> bool {
        self.tracked.contains_key(path)
    }

    /// Tracked files that currently exist on disk.
    pub fn live_files(&self) -> usize {
        self.tracked.keys().filter(|p| p.exists()).count()
    }
}
