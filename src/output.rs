//! Result types produced by a preparation run.
//!
//! A [`PipelineResult`] is immutable once built. It carries the delivered
//! artifact ([`Delivery`]), size statistics, the protection outcome, one
//! [`StageReport`] per stage, the progressive-compression trace and the
//! verbatim [`ProcessingLog`]. Everything here is `Serialize` so the CLI can
//! print a run as JSON.

use crate::config::CompressionPreset;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use tracing::{info, warn};

// ── Stages ───────────────────────────────────────────────────────────────

/// The five ordered pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingestion,
    Normalization,
    ProtectionRemoval,
    Geometry,
    Compression,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Ingestion,
        Stage::Normalization,
        Stage::ProtectionRemoval,
        Stage::Geometry,
        Stage::Compression,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Ingestion => "ingestion",
            Stage::Normalization => "normalization",
            Stage::ProtectionRemoval => "protection_removal",
            Stage::Geometry => "geometry",
            Stage::Compression => "compression",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a stage ended, as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// The stage produced a new working document.
    Completed,
    /// Nothing to do; the document passed through unchanged.
    Skipped,
    /// The stage failed but the pipeline continued with the prior document.
    SoftFailure,
}

/// Summary of one stage within a run.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub status: StageStatus,
    pub detail: String,
    pub duration_ms: u64,
}

// ── Protection ───────────────────────────────────────────────────────────

/// Terminal state of the protection-removal state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionState {
    NotEncrypted,
    RecoveredViaDictionary,
    RecoveredViaForcedStrip,
    Irrecoverable,
    /// Removal was disabled by the caller.
    Skipped,
}

/// Overall outcome of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Success,
    /// A valid artifact was produced but it is still encrypted.
    SuccessWithProtection,
}

// ── Compression trace ────────────────────────────────────────────────────

/// One rung of the progressive-compression search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompressionAttempt {
    pub preset: CompressionPreset,
    /// Output size, when the compressor produced a file.
    pub size_bytes: Option<u64>,
    /// Output exists and exceeds the validity threshold.
    pub valid: bool,
    /// Output fits within the requested budget.
    pub within_budget: bool,
    /// Compressor failure, if any.
    pub error: Option<String>,
}

// ── Processing log ───────────────────────────────────────────────────────

/// One timestamped log line.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub stage: Stage,
    pub message: String,
}

/// Append-only, ordered record of a single run.
///
/// Every push is mirrored to `tracing` so the per-run log and the process
/// log never disagree.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct ProcessingLog {
    entries: Vec<LogEntry>,
}

impl ProcessingLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a note.
    pub fn push(&mut self, stage: Stage, message: impl Into<String>) {
        let message = message.into();
        info!(stage = %stage, "{}", message);
        self.entries.push(LogEntry {
            at: Utc::now(),
            stage,
            message,
        });
    }

    /// Record a soft failure.
    pub fn warn(&mut self, stage: Stage, message: impl Into<String>) {
        let message = message.into();
        warn!(stage = %stage, "{}", message);
        self.entries.push(LogEntry {
            at: Utc::now(),
            stage,
            message,
        });
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.message.as_str())
    }

    /// True when any message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.messages().any(|m| m.contains(needle))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Size statistics ──────────────────────────────────────────────────────

/// Before/after sizes, rounded to two decimals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SizeStats {
    pub original_size_bytes: u64,
    pub processed_size_bytes: u64,
    pub original_size_kb: f64,
    pub processed_size_kb: f64,
    pub original_size_mb: f64,
    pub processed_size_mb: f64,
    pub mb_saved: f64,
    pub percent_reduction: f64,
}

impl SizeStats {
    pub fn compute(original: u64, processed: u64) -> Self {
        let kb = |b: u64| round2(b as f64 / 1024.0);
        let mb = |b: u64| round2(b as f64 / (1024.0 * 1024.0));
        let percent_reduction = if original == 0 {
            0.0
        } else {
            round2((original as f64 - processed as f64) / original as f64 * 100.0)
        };
        Self {
            original_size_bytes: original,
            processed_size_bytes: processed,
            original_size_kb: kb(original),
            processed_size_kb: kb(processed),
            original_size_mb: mb(original),
            processed_size_mb: mb(processed),
            mb_saved: round2((original as f64 - processed as f64) / (1024.0 * 1024.0)),
            percent_reduction,
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

// ── Delivery ─────────────────────────────────────────────────────────────

/// How the prepared PDF reaches the caller.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Delivery {
    /// Bytes held in memory; the backing file has already been removed.
    Inline {
        filename: String,
        content_type: String,
        #[serde(rename = "content_base64", serialize_with = "as_base64")]
        bytes: Vec<u8>,
    },
    /// A file left in the shared directory behind a time-boxed link.
    Link {
        url: String,
        expires_at: DateTime<Utc>,
        path: PathBuf,
    },
}

impl Delivery {
    /// Inline bytes, if this is an inline delivery.
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Delivery::Inline { bytes, .. } => Some(bytes),
            Delivery::Link { .. } => None,
        }
    }

    /// Backing file, if this is a link delivery.
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Delivery::Inline { .. } => None,
            Delivery::Link { path, .. } => Some(path),
        }
    }
}

fn as_base64<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
}

// ── Pipeline result ──────────────────────────────────────────────────────

/// Outcome of a successful [`crate::DocumentPreparer::prepare`] call.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub status: PipelineStatus,
    pub is_password_protected: bool,
    pub protection: ProtectionState,
    /// Page count of the delivered PDF, when it could be read.
    pub page_count: Option<usize>,
    pub size: SizeStats,
    /// Preset whose output was delivered; `None` when compression fell back
    /// to the last-known-good document.
    pub final_preset: Option<CompressionPreset>,
    pub compression_trace: Vec<CompressionAttempt>,
    pub stage_reports: Vec<StageReport>,
    pub log: ProcessingLog,
    pub delivery: Delivery,
    pub duration_ms: u64,
}

impl PipelineResult {
    pub fn size_reduction_percent(&self) -> f64 {
        self.size.percent_reduction
    }

    /// Report for `stage`, if the stage ran.
    pub fn report(&self, stage: Stage) -> Option<&StageReport> {
        self.stage_reports.iter().find(|r| r.stage == stage)
    }
}
