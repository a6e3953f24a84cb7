//! Pipeline stages.
//!
//! Each submodule implements one stage of the preparation pipeline:
//!
//! - [`ingest`]: obtain bytes (upload, URL or local path), sniff the type, write one temp file
//! - [`convert`]: table-driven dispatch to a PDF: passthrough, image layout or office converter
//! - [`protection`]: detect encryption, try the password dictionary, fall back to a forced strip
//! - [`geometry`]: compare page sizes with the target, fit pages when any page is off-size
//! - [`compress`]: walk the preset ladder until an output fits the size budget
//!
//! Stages after ingestion take the current [`WorkingDocument`] by value and
//! return a [`StageOutcome`]; the orchestrator in [`crate::prepare`] threads
//! the document through and applies the soft/hard failure policy.

pub mod compress;
pub mod convert;
pub mod geometry;
pub mod ingest;
pub mod protection;

use crate::config::{CompressionPreset, PageSize, PipelineConfig, PrepareOptions};
use crate::error::PrepError;
use crate::output::{CompressionAttempt, ProcessingLog, ProtectionState, Stage};
use crate::progress::ProgressCallback;
use crate::tools::{PdfInfo, Toolkit};
use crate::workspace::TempArena;
use std::path::{Path, PathBuf};

// ── Working document ─────────────────────────────────────────────────────

/// The pipeline subject: one file in the run's arena plus what is known
/// about it.
///
/// A stage that changes the document returns a new value pointing at a new
/// file; the orchestrator then releases the superseded file.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkingDocument {
    pub path: PathBuf,
    /// Lower-case extension without the dot; empty when unknown.
    pub extension: String,
    /// Content-sniffed MIME type, when sniffing was conclusive.
    pub mime: Option<String>,
    pub size_bytes: u64,
    /// Unknown until the document is a PDF that could be inspected.
    pub page_count: Option<usize>,
    pub page_sizes: Vec<PageSize>,
    pub encrypted: bool,
}

impl WorkingDocument {
    /// A PDF successor of `self` at `path`, described by `info`.
    pub(crate) fn successor(&self, path: PathBuf, size_bytes: u64, info: Option<&PdfInfo>) -> Self {
        Self {
            path,
            extension: "pdf".to_string(),
            mime: Some("application/pdf".to_string()),
            size_bytes,
            page_count: info.map(PdfInfo::page_count),
            page_sizes: info.map(|i| i.pages.clone()).unwrap_or_default(),
            encrypted: info.map(|i| i.encrypted).unwrap_or(self.encrypted),
        }
    }
}

// ── Stage outcome ────────────────────────────────────────────────────────

/// Result of one stage.
#[derive(Debug)]
pub enum StageOutcome {
    /// The stage finished. `changed` is false when it had nothing to do.
    Success {
        document: WorkingDocument,
        detail: String,
        changed: bool,
    },
    /// The stage failed; the pipeline continues with `document`, which is
    /// the stage's input.
    SoftFailure {
        reason: String,
        document: WorkingDocument,
    },
    /// The pipeline must abort.
    HardFailure(PrepError),
}

impl StageOutcome {
    pub(crate) fn advanced(document: WorkingDocument, detail: impl Into<String>) -> Self {
        Self::Success {
            document,
            detail: detail.into(),
            changed: true,
        }
    }

    pub(crate) fn unchanged(document: WorkingDocument, detail: impl Into<String>) -> Self {
        Self::Success {
            document,
            detail: detail.into(),
            changed: false,
        }
    }

    pub(crate) fn soft(document: WorkingDocument, reason: impl Into<String>) -> Self {
        Self::SoftFailure {
            reason: reason.into(),
            document,
        }
    }
}

// ── Stage context ────────────────────────────────────────────────────────

/// Everything a stage may read or record during one run.
pub struct StageContext<'a> {
    pub config: &'a PipelineConfig,
    pub toolkit: &'a Toolkit,
    pub options: &'a PrepareOptions,
    pub arena: &'a mut TempArena,
    pub log: &'a mut ProcessingLog,
    pub progress: Option<&'a ProgressCallback>,
    /// Filled in by the protection stage.
    pub protection: ProtectionState,
    /// Filled in by the compression stage.
    pub compression_trace: Vec<CompressionAttempt>,
    pub final_preset: Option<CompressionPreset>,
}

impl<'a> StageContext<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        toolkit: &'a Toolkit,
        options: &'a PrepareOptions,
        arena: &'a mut TempArena,
        log: &'a mut ProcessingLog,
    ) -> Self {
        Self {
            config,
            toolkit,
            options,
            arena,
            log,
            progress: config.progress_callback.as_ref(),
            protection: ProtectionState::NotEncrypted,
            compression_trace: Vec::new(),
            final_preset: None,
        }
    }

    /// Inspect a PDF, logging instead of failing when it cannot be read.
    pub(crate) async fn inspect_quietly(&mut self, stage: Stage, path: &Path) -> Option<PdfInfo> {
        match self.toolkit.inspector.inspect(path).await {
            Ok(info) => Some(info),
            Err(e) => {
                self.log
                    .warn(stage, format!("Could not read PDF structure: {}", e));
                None
            }
        }
    }
}

/// Size of `path`, or `None` when it does not exist.
pub(crate) async fn file_size(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path).await.ok().map(|m| m.len())
}

/// True when `path` exists and is larger than the validity threshold.
pub(crate) async fn is_plausible(path: &Path, config: &PipelineConfig) -> bool {
    file_size(path)
        .await
        .is_some_and(|len| len > config.min_valid_file_bytes)
}

/// Sanity check run between stages before compression.
pub async fn verify_intermediate(
    document: &WorkingDocument,
    config: &PipelineConfig,
    after: Stage,
) -> Result<(), PrepError> {
    match file_size(&document.path).await {
        None => Err(PrepError::CorruptedIntermediateDocument {
            stage: after.to_string(),
            detail: format!("{} is missing", document.path.display()),
        }),
        Some(len) if len <= config.min_valid_file_bytes => {
            Err(PrepError::CorruptedIntermediateDocument {
                stage: after.to_string(),
                detail: format!(
                    "{} bytes is at or below the {}-byte minimum",
                    len, config.min_valid_file_bytes
                ),
            })
        }
        Some(_) => Ok(()),
    }
}
