//! Normalization: bring any supported input to PDF.
//!
//! Classification maps the sniffed MIME type (or, when sniffing was
//! inconclusive, the extension) onto a [`DocumentKind`]. The [`Converter`]
//! then looks the kind up in its strategy table:
//!
//! | Kind | Strategy |
//! |------|----------|
//! | `Pdf` | [`PassthroughStrategy`]: copy, log "skipped conversion" |
//! | `Image` | [`ImageLayoutStrategy`]: one letter page, orientation from aspect ratio |
//! | `Office` | [`OfficeStrategy`]: headless office converter, bounded by a timeout |
//!
//! Anything that does not classify, or classifies to a kind with no
//! registered strategy, is a hard `UnsupportedType` failure. Callers can
//! register extra strategies with [`Converter::register`].

use super::{StageContext, StageOutcome, WorkingDocument};
use crate::error::PrepError;
use crate::output::Stage;
use crate::tools::Orientation;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Broad input family; the key of the strategy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Pdf,
    Image,
    Office,
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Image => "image",
            DocumentKind::Office => "office",
        })
    }
}

static EXTENSION_KINDS: Lazy<HashMap<&'static str, DocumentKind>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("pdf", DocumentKind::Pdf);
    for ext in ["jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif"] {
        m.insert(ext, DocumentKind::Image);
    }
    for ext in [
        "doc", "docx", "odt", "rtf", "txt", "xls", "xlsx", "ods", "csv", "ppt", "pptx", "odp",
    ] {
        m.insert(ext, DocumentKind::Office);
    }
    m
});

static MIME_KINDS: Lazy<HashMap<&'static str, DocumentKind>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("application/pdf", DocumentKind::Pdf);
    for mime in [
        "application/msword",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "application/vnd.oasis.opendocument.text",
        "application/rtf",
        "text/rtf",
        "text/plain",
        "text/csv",
        "text/html",
        "application/vnd.ms-excel",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "application/vnd.oasis.opendocument.spreadsheet",
        "application/vnd.ms-powerpoint",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "application/vnd.oasis.opendocument.presentation",
    ] {
        m.insert(mime, DocumentKind::Office);
    }
    m
});

/// Classify by MIME type first; fall back to the extension only when the
/// MIME type is unknown.
pub fn classify(mime: Option<&str>, extension: &str) -> Option<DocumentKind> {
    match mime {
        Some(mime) => MIME_KINDS
            .get(mime)
            .copied()
            .or_else(|| mime.starts_with("image/").then_some(DocumentKind::Image)),
        None => EXTENSION_KINDS.get(extension).copied(),
    }
}

// ── Strategies ───────────────────────────────────────────────────────────

/// One way of producing a PDF from a classified document.
#[async_trait]
pub trait ConversionStrategy: Send + Sync {
    /// Name used in logs and conversion errors.
    fn name(&self) -> &'static str;

    /// Write a PDF rendition of `input` and return it as a new document.
    async fn convert(
        &self,
        ctx: &mut StageContext<'_>,
        input: &WorkingDocument,
    ) -> Result<WorkingDocument, PrepError>;
}

/// Input is already a PDF: copy it.
pub struct PassthroughStrategy;

#[async_trait]
impl ConversionStrategy for PassthroughStrategy {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    async fn convert(
        &self,
        ctx: &mut StageContext<'_>,
        input: &WorkingDocument,
    ) -> Result<WorkingDocument, PrepError> {
        let out = ctx.arena.allocate("pdf", "pdf")?;
        let size = tokio::fs::copy(&input.path, &out)
            .await
            .map_err(|e| PrepError::io("copying PDF", &out, e))?;
        ctx.log
            .push(Stage::Normalization, "Input is already a PDF; skipped conversion");
        let info = ctx.inspect_quietly(Stage::Normalization, &out).await;
        Ok(input.successor(out, size, info.as_ref()))
    }
}

/// Lay an image out on a single page.
pub struct ImageLayoutStrategy;

#[async_trait]
impl ConversionStrategy for ImageLayoutStrategy {
    fn name(&self) -> &'static str {
        "image layout"
    }

    async fn convert(
        &self,
        ctx: &mut StageContext<'_>,
        input: &WorkingDocument,
    ) -> Result<WorkingDocument, PrepError> {
        let image = tokio::fs::read(&input.path)
            .await
            .map_err(|e| PrepError::io("reading image", &input.path, e))?;
        let pdf = ctx
            .toolkit
            .rasterizer
            .rasterize(
                &image,
                ctx.config.target_page,
                Orientation::MatchImage,
                ctx.config.image_margin_pt,
            )
            .await
            .map_err(|e| e.into_conversion_error(self.name()))?;
        if pdf.is_empty() {
            return Err(PrepError::ConversionFailed {
                tool: self.name().to_string(),
                reason: "rasterizer produced no output".into(),
            });
        }

        let out = ctx.arena.allocate("pdf", "pdf")?;
        tokio::fs::write(&out, &pdf)
            .await
            .map_err(|e| PrepError::io("writing image PDF", &out, e))?;
        ctx.log.push(
            Stage::Normalization,
            format!("Converted image to a single-page PDF ({} bytes)", pdf.len()),
        );
        let info = ctx.inspect_quietly(Stage::Normalization, &out).await;
        Ok(input.successor(out, pdf.len() as u64, info.as_ref()))
    }
}

/// Delegate to the headless office converter.
pub struct OfficeStrategy;

#[async_trait]
impl ConversionStrategy for OfficeStrategy {
    fn name(&self) -> &'static str {
        "office converter"
    }

    async fn convert(
        &self,
        ctx: &mut StageContext<'_>,
        input: &WorkingDocument,
    ) -> Result<WorkingDocument, PrepError> {
        let out = ctx.arena.allocate("pdf", "pdf")?;
        ctx.toolkit
            .office
            .convert(&input.path, &out, ctx.config.office_timeout())
            .await
            .map_err(|e| e.into_conversion_error(self.name()))?;

        let size = match super::file_size(&out).await {
            Some(size) if size > 0 => size,
            _ => {
                return Err(PrepError::ConversionFailed {
                    tool: self.name().to_string(),
                    reason: "converter produced no output file".into(),
                })
            }
        };
        ctx.log.push(
            Stage::Normalization,
            format!("Converted .{} document to PDF ({} bytes)", input.extension, size),
        );
        let info = ctx.inspect_quietly(Stage::Normalization, &out).await;
        Ok(input.successor(out, size, info.as_ref()))
    }
}

// ── Dispatcher ───────────────────────────────────────────────────────────

/// Strategy table keyed by [`DocumentKind`].
#[derive(Clone)]
pub struct Converter {
    strategies: HashMap<DocumentKind, Arc<dyn ConversionStrategy>>,
}

impl Default for Converter {
    fn default() -> Self {
        Self::standard()
    }
}

impl Converter {
    /// Passthrough for PDFs, layout for images, office converter for documents.
    pub fn standard() -> Self {
        let mut converter = Self::empty();
        converter.register(DocumentKind::Pdf, Arc::new(PassthroughStrategy));
        converter.register(DocumentKind::Image, Arc::new(ImageLayoutStrategy));
        converter.register(DocumentKind::Office, Arc::new(OfficeStrategy));
        converter
    }

    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    /// Install or replace the strategy for `kind`.
    pub fn register(&mut self, kind: DocumentKind, strategy: Arc<dyn ConversionStrategy>) {
        self.strategies.insert(kind, strategy);
    }

    pub fn strategy_for(&self, kind: DocumentKind) -> Option<&Arc<dyn ConversionStrategy>> {
        self.strategies.get(&kind)
    }

    /// Run the normalization stage.
    pub async fn run(&self, ctx: &mut StageContext<'_>, document: WorkingDocument) -> StageOutcome {
        let unsupported = || PrepError::UnsupportedType {
            mime: document.mime.clone().unwrap_or_else(|| "unknown".into()),
            extension: if document.extension.is_empty() {
                "none".into()
            } else {
                document.extension.clone()
            },
        };

        let Some(kind) = classify(document.mime.as_deref(), &document.extension) else {
            return StageOutcome::HardFailure(unsupported());
        };
        let Some(strategy) = self.strategy_for(kind).cloned() else {
            return StageOutcome::HardFailure(unsupported());
        };
        debug!("Dispatching {} document to {}", kind, strategy.name());

        match strategy.convert(ctx, &document).await {
            Ok(converted) if kind == DocumentKind::Pdf => {
                StageOutcome::unchanged(converted, "already a PDF; skipped conversion")
            }
            Ok(converted) => {
                let detail = format!("converted {} input with {}", kind, strategy.name());
                StageOutcome::advanced(converted, detail)
            }
            Err(e) => StageOutcome::HardFailure(e),
        }
    }
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.strategies.keys().map(|k| k.to_string()).collect();
        kinds.sort();
        f.debug_struct("Converter").field("kinds", &kinds).finish()
    }
}
