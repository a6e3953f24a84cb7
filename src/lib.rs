//! # pdfprep
//!
//! Turn an arbitrary document into a letter-sized, unencrypted PDF that fits
//! a size budget.
//!
//! ## Why this crate?
//!
//! Downstream systems (fax gateways, e-filing portals, print queues) accept
//! PDFs only, reject password-protected files, expect a fixed page size and
//! cap the upload size. Users send JPEG scans, Word files and encrypted
//! statements. This crate normalises all of them through one pipeline and
//! reports exactly what it did to each document.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload / URL / path
//!  │
//!  ├─ 1. Ingest     fetch or read, sniff the type, write one temp file
//!  ├─ 2. Normalize  passthrough | image → single page | office → PDF
//!  ├─ 3. Unprotect  password dictionary, then forced strip   (soft)
//!  ├─ 4. Geometry   fit off-size pages to the target media    (soft)
//!  ├─ 5. Compress   preset ladder until the size budget holds (soft)
//!  └─ 6. Deliver    inline bytes or a time-limited link + statistics
//! ```
//!
//! Stages marked *soft* never abort the run: a failure keeps the previous
//! document and is recorded in the [`PipelineResult`]. Ingestion and
//! normalization failures abort with a [`PrepError`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdfprep::{prepare, PipelineConfig, PrepareOptions, Source};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::default();
//!     let options = PrepareOptions::builder().max_file_size_mb(2.0).build()?;
//!     let result = prepare(Source::Path("statement.docx".into()), &options, &config).await?;
//!     eprintln!(
//!         "{} pages, {:.1}% smaller, protected: {}",
//!         result.page_count.unwrap_or(0),
//!         result.size_reduction_percent(),
//!         result.is_password_protected
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## External tools
//!
//! The system [`Toolkit`] shells out to `gs` (page fitting, compression),
//! `qpdf` (forced strip) and `soffice` (office documents). Everything else
//! (PDF inspection, password attempts, image layout) is done in-process.
//! Each capability is a trait object, so any of them can be replaced.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfprep` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdfprep = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod housekeeping;
pub mod output;
pub mod pipeline;
pub mod prepare;
pub mod progress;
pub mod tools;
pub mod workspace;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    CompressionPreset, PageSize, PipelineConfig, PipelineConfigBuilder, PrepareOptions,
    PrepareOptionsBuilder, ReturnMode,
};
pub use error::{ErrorKind, PrepError, ToolError};
pub use output::{
    CompressionAttempt, Delivery, LogEntry, PipelineResult, PipelineStatus, ProcessingLog,
    ProtectionState, SizeStats, Stage, StageReport, StageStatus,
};
pub use pipeline::convert::{ConversionStrategy, Converter, DocumentKind};
pub use pipeline::ingest::Source;
pub use prepare::{prepare, prepare_sync, prepare_to_file, write_delivery, DocumentPreparer};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use tools::Toolkit;
