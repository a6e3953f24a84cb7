//! Progress-callback trait for stage events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as a run moves through its stages. The CLI uses this to drive its
//! spinner; a service would forward the events to its own telemetry.
//!
//! # Example
//!
//! ```rust
//! use pdfprep::{PipelineConfig, PipelineProgressCallback, Stage};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct StageCounter(AtomicUsize);
//!
//! impl PipelineProgressCallback for StageCounter {
//!     fn on_stage_start(&self, _stage: Stage) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(StageCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::PrepError;
use crate::output::{CompressionAttempt, PipelineResult, Stage, StageReport};
use std::sync::Arc;

/// Called by the pipeline as it runs.
///
/// All methods default to no-ops so callers only override what they need.
/// Runs may execute concurrently on different tasks sharing one callback, so
/// implementations must synchronise their own state.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once, before ingestion.
    ///
    /// # Arguments
    /// * `source`: the upload's file name, the URL, or the local path
    fn on_run_start(&self, source: &str) {
        let _ = source;
    }

    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called when a stage finishes without aborting the run.
    fn on_stage_complete(&self, stage: Stage, report: &StageReport) {
        let _ = (stage, report);
    }

    /// Called after every compressor invocation, valid or not.
    fn on_compression_attempt(&self, attempt: &CompressionAttempt) {
        let _ = attempt;
    }

    fn on_run_complete(&self, result: &PipelineResult) {
        let _ = result;
    }

    /// Called when a hard failure aborts the run.
    fn on_run_failed(&self, error: &PrepError) {
        let _ = error;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
