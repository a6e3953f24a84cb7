//! Shared-directory housekeeping.
//!
//! Runs clean up after themselves; these helpers are the coarse safety net
//! for what outlives a run (link deliveries, files left by a killed
//! process). The pipeline itself never calls them.

use crate::error::PrepError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Outcome of [`sweep_expired`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub deleted: usize,
    /// One message per file that could not be removed.
    pub errors: Vec<String>,
}

/// One file in the shared directory.
#[derive(Debug, Clone, Serialize)]
pub struct CachedFile {
    pub filename: String,
    pub size_kb: f64,
    pub created_at: DateTime<Utc>,
    pub age_minutes: f64,
}

/// Snapshot of the shared directory.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStatus {
    pub file_count: usize,
    pub total_size_kb: f64,
    /// Oldest first.
    pub files: Vec<CachedFile>,
}

/// Delete regular files in `dir` last modified more than `older_than` ago,
/// or every regular file when `older_than` is `None`.
///
/// A missing directory is an empty sweep.
pub fn sweep_expired(dir: &Path, older_than: Option<Duration>) -> Result<SweepReport, PrepError> {
    let mut report = SweepReport::default();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
        Err(e) => return Err(PrepError::io("listing temp directory", dir, e)),
    };
    let now = SystemTime::now();

    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(meta) = entry.metadata() else { continue };
        if !meta.is_file() {
            continue;
        }
        if let Some(limit) = older_than {
            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or_default();
            if age <= limit {
                continue;
            }
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!("Swept {}", path.display());
                report.deleted += 1;
            }
            Err(e) => {
                warn!("Could not sweep {}: {}", path.display(), e);
                report.errors.push(format!("{}: {}", path.display(), e));
            }
        }
    }

    info!(
        "Swept {} files from {} ({} errors)",
        report.deleted,
        dir.display(),
        report.errors.len()
    );
    Ok(report)
}

/// List the regular files in `dir`, oldest first.
pub fn cache_status(dir: &Path) -> Result<CacheStatus, PrepError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(CacheStatus::default()),
        Err(e) => return Err(PrepError::io("listing temp directory", dir, e)),
    };
    let now = Utc::now();

    let mut files: Vec<CachedFile> = entries
        .flatten()
        .filter_map(|entry| {
            let meta = entry.metadata().ok().filter(|m| m.is_file())?;
            let stamp = meta.created().or_else(|_| meta.modified()).ok()?;
            let created_at: DateTime<Utc> = stamp.into();
            let age = (now - created_at).num_seconds().max(0) as f64 / 60.0;
            Some(CachedFile {
                filename: entry.file_name().to_string_lossy().into_owned(),
                size_kb: round2(meta.len() as f64 / 1024.0),
                created_at,
                age_minutes: round2(age),
            })
        })
        .collect();
    files.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.filename.cmp(&b.filename)));

    let total = files.iter().map(|f| f.size_kb).sum::<f64>();
    Ok(CacheStatus {
        file_count: files.len(),
        total_size_kb: round2(total),
        files,
    })
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
