//! Error types for the pdfprep library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PrepError`] is **fatal**: the pipeline cannot produce an artifact
//!   (no source, unreachable URL, unsupported type, converter crash, corrupt
//!   intermediate). Returned as `Err(PrepError)` from
//!   [`crate::DocumentPreparer::prepare`]; no temp storage survives it.
//!
//! * [`ToolError`] is **non-fatal at the capability boundary**: one external
//!   engine call failed (missing binary, non-zero exit, timeout). Each stage
//!   decides whether that becomes a hard failure or a soft failure that is
//!   only recorded in the processing log.

use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a [`PrepError`], used by callers to map errors
/// onto transport status codes or exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No source, invalid options, invalid configuration.
    Input,
    /// Remote source unreachable, non-success status, or timeout.
    Fetch,
    /// Unsupported type or converter failure during normalization.
    Conversion,
    /// An intermediate document failed a size/existence sanity check.
    CorruptedIntermediate,
    /// Local I/O or runtime failure.
    Internal,
}

/// All fatal errors returned by the pdfprep library.
#[derive(Debug, Error)]
pub enum PrepError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// No usable source or bad options.
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Fetch errors ──────────────────────────────────────────────────────
    /// The remote source could not be downloaded.
    #[error("Failed to fetch '{url}': {reason}")]
    FetchFailed { url: String, reason: String },

    /// The remote fetch exceeded its timeout.
    #[error("Fetch timed out after {secs}s for '{url}'")]
    FetchTimeout { url: String, secs: u64 },

    // ── Conversion errors ─────────────────────────────────────────────────
    /// No conversion strategy exists for the classified type.
    #[error("Unsupported document type (mime: {mime}, extension: {extension})")]
    UnsupportedType { mime: String, extension: String },

    /// A converter exited non-zero or produced no output.
    #[error("Conversion with {tool} failed: {reason}")]
    ConversionFailed { tool: String, reason: String },

    /// A converter exceeded its timeout.
    #[error("Conversion with {tool} timed out after {secs}s")]
    ConversionTimeout { tool: String, secs: u64 },

    // ── Integrity errors ──────────────────────────────────────────────────
    /// An intermediate document is missing or implausibly small.
    #[error("Intermediate document corrupted after {stage}: {detail}")]
    CorruptedIntermediateDocument { stage: String, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Local file-system failure.
    #[error("I/O error while {context} ({path:?}): {source}")]
    Io {
        context: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PrepError {
    pub(crate) fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    pub(crate) fn io(context: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            path: path.into(),
            source,
        }
    }

    /// The taxonomy bucket this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput { .. } | Self::InvalidConfig(_) => ErrorKind::Input,
            Self::FetchFailed { .. } | Self::FetchTimeout { .. } => ErrorKind::Fetch,
            Self::UnsupportedType { .. }
            | Self::ConversionFailed { .. }
            | Self::ConversionTimeout { .. } => ErrorKind::Conversion,
            Self::CorruptedIntermediateDocument { .. } => ErrorKind::CorruptedIntermediate,
            Self::Io { .. } | Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// A failed call into one external capability.
///
/// Never returned from the top-level API directly: stages translate it into
/// either a [`PrepError`] or a soft-failure log entry.
#[derive(Debug, Clone, Error, serde::Serialize)]
pub enum ToolError {
    /// The program is not on `PATH` (or the configured path is wrong).
    #[error("{program} is not installed or not executable")]
    NotInstalled { program: String },

    /// The program ran past its time budget and was killed.
    #[error("{program} timed out after {secs}s")]
    TimedOut { program: String, secs: u64 },

    /// The program exited unsuccessfully.
    #[error("{program} exited with status {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    /// An in-process engine (decoder, PDF writer, HTTP client) failed.
    #[error("{engine}: {detail}")]
    Engine { engine: String, detail: String },

    /// Reading or writing the tool's input/output failed.
    #[error("I/O error around {program}: {detail}")]
    Io { program: String, detail: String },
}

impl ToolError {
    pub(crate) fn engine(engine: impl Into<String>, detail: impl ToString) -> Self {
        Self::Engine {
            engine: engine.into(),
            detail: detail.to_string(),
        }
    }

    /// Convert into the fatal conversion error used by the normalization stage.
    pub(crate) fn into_conversion_error(self, tool: &str) -> PrepError {
        match self {
            Self::TimedOut { secs, .. } => PrepError::ConversionTimeout {
                tool: tool.to_string(),
                secs,
            },
            other => PrepError::ConversionFailed {
                tool: tool.to_string(),
                reason: other.to_string(),
            },
        }
    }
}
