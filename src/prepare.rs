//! Pipeline orchestration and public entry points.
//!
//! [`DocumentPreparer::prepare`] sequences the five stages, applies the
//! failure policy and assembles the [`PipelineResult`]:
//!
//! * a hard failure from any stage aborts the run with its [`PrepError`];
//! * soft failures from protection, geometry and compression are recorded
//!   and the run carries on with the previous document;
//! * every temp file the run created is gone when the call returns, except
//!   a link delivery's final PDF.

use crate::config::{PipelineConfig, PrepareOptions, ReturnMode};
use crate::error::PrepError;
use crate::output::{
    Delivery, PipelineResult, PipelineStatus, ProcessingLog, SizeStats, Stage, StageReport,
    StageStatus,
};
use crate::pipeline::convert::{ConversionStrategy, Converter, DocumentKind};
use crate::pipeline::ingest::{self, Source};
use crate::pipeline::{
    compress, geometry, protection, verify_intermediate, StageContext, StageOutcome,
    WorkingDocument,
};
use crate::tools::Toolkit;
use crate::workspace::TempArena;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// Runs the preparation pipeline with a fixed configuration and toolkit.
///
/// Cheap to share: one preparer can serve any number of concurrent
/// [`prepare`](Self::prepare) calls, each with its own temp arena.
///
/// # Example
/// ```rust,no_run
/// use pdfprep::{DocumentPreparer, PipelineConfig, PrepareOptions, Source, Toolkit};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = PipelineConfig::default();
/// let preparer = DocumentPreparer::new(config.clone(), Toolkit::system(&config)?);
/// let result = preparer
///     .prepare(Source::Path("scan.jpg".into()), &PrepareOptions::default())
///     .await?;
/// println!("{:?} {:.1}% smaller", result.status, result.size_reduction_percent());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DocumentPreparer {
    config: PipelineConfig,
    toolkit: Toolkit,
    converter: Converter,
}

impl DocumentPreparer {
    pub fn new(config: PipelineConfig, toolkit: Toolkit) -> Self {
        Self {
            config,
            toolkit,
            converter: Converter::standard(),
        }
    }

    /// Install or replace the conversion strategy for `kind`.
    pub fn with_strategy(mut self, kind: DocumentKind, strategy: Arc<dyn ConversionStrategy>) -> Self {
        self.converter.register(kind, strategy);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// `PrepareDocument(source, options)`.
    ///
    /// # Errors
    /// Returns `Err(PrepError)` only for hard failures: bad input, fetch
    /// failure, unsupported or unconvertible input, a corrupted intermediate
    /// document, or local I/O failure. In every error case no artifact is
    /// produced and no temp file is left behind.
    pub async fn prepare(
        &self,
        source: Source,
        options: &PrepareOptions,
    ) -> Result<PipelineResult, PrepError> {
        let callback = self.config.progress_callback.clone();
        if let Some(cb) = &callback {
            cb.on_run_start(&source.label());
        }
        let outcome = self.run(source, options).await;
        if let Some(cb) = &callback {
            match &outcome {
                Ok(result) => cb.on_run_complete(result),
                Err(e) => cb.on_run_failed(e),
            }
        }
        outcome
    }

    async fn run(&self, source: Source, options: &PrepareOptions) -> Result<PipelineResult, PrepError> {
        let total_start = Instant::now();
        options.validate()?;
        info!("Preparing document: {}", source.label());

        // Declared before the context so it outlives every borrow; dropping
        // it on any exit path deletes whatever the run still tracks.
        let mut arena = TempArena::open(&self.config.temp_dir).await?;
        let mut log = ProcessingLog::new();
        let mut reports: Vec<StageReport> = Vec::new();
        let mut ctx = StageContext::new(&self.config, &self.toolkit, options, &mut arena, &mut log);

        // ── Step 1: Ingestion ────────────────────────────────────────────────
        let started = stage_started(&ctx, Stage::Ingestion);
        let ingested = ingest::run(&mut ctx, source).await?;
        let original_size = ingested.original_size;
        let document = ingested.document;
        finish_report(
            &ctx,
            &mut reports,
            Stage::Ingestion,
            StageStatus::Completed,
            format!("{} bytes ingested", original_size),
            started,
        );

        // ── Step 2: Normalization ────────────────────────────────────────────
        let started = stage_started(&ctx, Stage::Normalization);
        let outcome = self.converter.run(&mut ctx, document.clone()).await;
        let document = settle(&mut ctx, &mut reports, Stage::Normalization, started, document, outcome)?;

        // ── Step 3: Protection removal ───────────────────────────────────────
        let started = stage_started(&ctx, Stage::ProtectionRemoval);
        let outcome = protection::run(&mut ctx, document.clone()).await;
        let document = settle(&mut ctx, &mut reports, Stage::ProtectionRemoval, started, document, outcome)?;

        // ── Step 4: Geometry standardization ─────────────────────────────────
        let started = stage_started(&ctx, Stage::Geometry);
        let outcome = geometry::run(&mut ctx, document.clone()).await;
        let document = settle(&mut ctx, &mut reports, Stage::Geometry, started, document, outcome)?;
        verify_intermediate(&document, &self.config, Stage::Geometry).await?;

        // ── Step 5: Progressive compression ──────────────────────────────────
        let started = stage_started(&ctx, Stage::Compression);
        let outcome = compress::run(&mut ctx, document.clone()).await;
        let document = settle(&mut ctx, &mut reports, Stage::Compression, started, document, outcome)?;

        // ── Step 6: Delivery ─────────────────────────────────────────────────
        let final_info = ctx.inspect_quietly(Stage::Compression, &document.path).await;
        let is_password_protected = final_info
            .as_ref()
            .map_or(document.encrypted, |info| info.encrypted);
        let page_count = final_info.as_ref().map(|i| i.page_count()).or(document.page_count);
        let protection = ctx.protection;
        let compression_trace = std::mem::take(&mut ctx.compression_trace);
        let final_preset = ctx.final_preset;

        let filename = options.resolved_filename();
        let (delivery, processed_size) = match options.return_mode {
            ReturnMode::Inline => {
                let bytes = tokio::fs::read(&document.path)
                    .await
                    .map_err(|e| PrepError::io("reading prepared PDF", &document.path, e))?;
                ctx.arena.release(&document.path);
                let size = bytes.len() as u64;
                (
                    Delivery::Inline {
                        filename,
                        content_type: "application/pdf".to_string(),
                        bytes,
                    },
                    size,
                )
            }
            ReturnMode::Link => {
                let link_name = format!("{}_{}", Uuid::new_v4(), link_safe(&filename));
                let link_path = self.config.temp_dir.join(&link_name);
                tokio::fs::rename(&document.path, &link_path)
                    .await
                    .map_err(|e| PrepError::io("publishing prepared PDF", &link_path, e))?;
                ctx.arena.keep(&document.path);
                let size = tokio::fs::metadata(&link_path)
                    .await
                    .map_err(|e| PrepError::io("reading prepared PDF", &link_path, e))?
                    .len();
                let expires_at = chrono::Utc::now()
                    + chrono::Duration::minutes(self.config.link_ttl_minutes as i64);
                (
                    Delivery::Link {
                        url: self.config.link_for(&link_name),
                        expires_at,
                        path: link_path,
                    },
                    size,
                )
            }
        };
        drop(ctx);
        debug!("Run arena holds {} live files before drop", arena.live_files());
        drop(arena);

        let status = if is_password_protected {
            PipelineStatus::SuccessWithProtection
        } else {
            PipelineStatus::Success
        };
        let size = SizeStats::compute(original_size, processed_size);
        let duration_ms = total_start.elapsed().as_millis() as u64;
        info!(
            "Preparation complete: {} → {} bytes ({:.2}% reduction), {}ms",
            original_size, processed_size, size.percent_reduction, duration_ms
        );

        Ok(PipelineResult {
            status,
            is_password_protected,
            protection,
            page_count,
            size,
            final_preset,
            compression_trace,
            stage_reports: reports,
            log,
            delivery,
            duration_ms,
        })
    }
}

// ── Stage bookkeeping ────────────────────────────────────────────────────

fn stage_started(ctx: &StageContext<'_>, stage: Stage) -> Instant {
    debug!("Stage {} starting", stage);
    if let Some(cb) = ctx.progress {
        cb.on_stage_start(stage);
    }
    Instant::now()
}

fn finish_report(
    ctx: &StageContext<'_>,
    reports: &mut Vec<StageReport>,
    stage: Stage,
    status: StageStatus,
    detail: String,
    started: Instant,
) {
    let report = StageReport {
        stage,
        status,
        detail,
        duration_ms: started.elapsed().as_millis() as u64,
    };
    if let Some(cb) = ctx.progress {
        cb.on_stage_complete(stage, &report);
    }
    reports.push(report);
}

/// Apply the failure policy to one stage's outcome and return the document
/// the next stage works on. A superseded file is released immediately.
fn settle(
    ctx: &mut StageContext<'_>,
    reports: &mut Vec<StageReport>,
    stage: Stage,
    started: Instant,
    previous: WorkingDocument,
    outcome: StageOutcome,
) -> Result<WorkingDocument, PrepError> {
    match outcome {
        StageOutcome::Success {
            document,
            detail,
            changed,
        } => {
            if document.path != previous.path {
                ctx.arena.release(&previous.path);
            }
            let status = if changed {
                StageStatus::Completed
            } else {
                StageStatus::Skipped
            };
            finish_report(ctx, reports, stage, status, detail, started);
            Ok(document)
        }
        StageOutcome::SoftFailure { reason, document } => {
            finish_report(ctx, reports, stage, StageStatus::SoftFailure, reason, started);
            Ok(document)
        }
        StageOutcome::HardFailure(e) => {
            ctx.log.warn(stage, format!("Aborting: {}", e));
            Err(e)
        }
    }
}

/// File names in links keep to a URL-safe alphabet.
fn link_safe(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ── Convenience entry points ─────────────────────────────────────────────

/// Prepare a document with the system toolkit.
pub async fn prepare(
    source: Source,
    options: &PrepareOptions,
    config: &PipelineConfig,
) -> Result<PipelineResult, PrepError> {
    let toolkit = Toolkit::system(config)?;
    DocumentPreparer::new(config.clone(), toolkit)
        .prepare(source, options)
        .await
}

/// Synchronous wrapper around [`prepare`].
///
/// Creates a temporary tokio runtime internally.
pub fn prepare_sync(
    source: Source,
    options: &PrepareOptions,
    config: &PipelineConfig,
) -> Result<PipelineResult, PrepError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PrepError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(prepare(source, options, config))
}

/// Prepare a document and write the PDF to `output_path`.
///
/// The run always uses inline delivery. The file is written atomically
/// (temp file + rename) so `output_path` never holds a partial PDF.
pub async fn prepare_to_file(
    source: Source,
    output_path: impl AsRef<Path>,
    options: &PrepareOptions,
    config: &PipelineConfig,
) -> Result<PipelineResult, PrepError> {
    let options = PrepareOptions {
        return_mode: ReturnMode::Inline,
        ..options.clone()
    };
    let result = prepare(source, &options, config).await?;
    write_delivery(&result, output_path.as_ref()).await?;
    Ok(result)
}

/// Write an inline delivery to `path` atomically.
pub async fn write_delivery(result: &PipelineResult, path: &Path) -> Result<(), PrepError> {
    let bytes = match &result.delivery {
        Delivery::Inline { bytes, .. } => bytes.clone(),
        Delivery::Link { path: source, .. } => tokio::fs::read(source)
            .await
            .map_err(|e| PrepError::io("reading linked PDF", source, e))?,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PrepError::io("creating output directory", parent, e))?;
    }
    let tmp_path = path.with_extension("pdf.tmp");
    tokio::fs::write(&tmp_path, &bytes)
        .await
        .map_err(|e| PrepError::io("writing output", &tmp_path, e))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| PrepError::io("writing output", path, e))?;
    Ok(())
}
