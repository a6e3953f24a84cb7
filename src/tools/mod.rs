//! External capabilities the pipeline drives.
//!
//! The pipeline never touches a converter binary, HTTP client or PDF parser
//! directly. Each capability is a trait, and a [`Toolkit`] bundles one
//! implementation of each. [`Toolkit::system`] wires the real backends:
//!
//! | Capability | Backend |
//! |------------|---------|
//! | [`Fetcher`] | [`HttpFetcher`] (reqwest) |
//! | [`MimeSniffer`] | [`MagicSniffer`] (infer) |
//! | [`ImageRasterizer`] | [`PrintpdfRasterizer`] (image + printpdf) |
//! | [`OfficeConverter`] | [`SofficeConverter`] (`soffice --headless`) |
//! | [`Decryptor`] | [`LopdfDecryptor`] (lopdf), handing user-password documents to [`QpdfDecryptor`] |
//! | [`ProtectionStripper`] | [`QpdfStripper`] (`qpdf --decrypt`) |
//! | [`PageFitter`] | [`GhostscriptFitter`] (`gs -dPDFFitPage`) |
//! | [`Compressor`] | [`GhostscriptCompressor`] (`gs -dPDFSETTINGS`) |
//! | [`PdfInspector`] | [`LopdfInspector`] (lopdf) |
//!
//! Tests swap any entry for a mock; the stages only see `Arc<dyn Trait>`.

pub mod ghostscript;
pub mod http;
pub mod office;
pub mod pdf;
pub mod process;
pub mod qpdf;
pub mod raster;
pub mod sniff;

pub use ghostscript::{GhostscriptCompressor, GhostscriptFitter};
pub use http::HttpFetcher;
pub use office::SofficeConverter;
pub use pdf::{LopdfDecryptor, LopdfInspector};
pub use qpdf::{QpdfDecryptor, QpdfStripper};
pub use raster::{Orientation, PrintpdfRasterizer};
pub use sniff::MagicSniffer;

use crate::config::{CompressionPreset, PageSize, PipelineConfig};
use crate::error::{PrepError, ToolError};
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

// ── Capability traits ────────────────────────────────────────────────────

/// A downloaded remote resource.
#[derive(Debug, Clone)]
pub struct FetchedResource {
    pub bytes: Vec<u8>,
    /// `Content-Type` header, parameters stripped.
    pub content_type: Option<String>,
}

/// `FetchResource(url)`: download a remote document.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Must reject non-2xx responses with [`PrepError::FetchFailed`] and
    /// overruns with [`PrepError::FetchTimeout`].
    async fn fetch(&self, url: &str) -> Result<FetchedResource, PrepError>;
}

/// `SniffMimeType`: content-based type detection.
pub trait MimeSniffer: Send + Sync {
    /// MIME type from the leading bytes, `None` when inconclusive.
    fn sniff(&self, head: &[u8]) -> Option<String>;
}

/// `RasterToSinglePagePdf`: lay one image out on one page.
#[async_trait]
pub trait ImageRasterizer: Send + Sync {
    async fn rasterize(
        &self,
        image: &[u8],
        page: PageSize,
        orientation: Orientation,
        margin_pt: f64,
    ) -> Result<Vec<u8>, ToolError>;
}

/// `ConvertOfficeDocumentToPdf`.
#[async_trait]
pub trait OfficeConverter: Send + Sync {
    async fn convert(&self, input: &Path, output: &Path, timeout: Duration) -> Result<(), ToolError>;
}

/// `TryDecrypt`: open with a password and re-serialise unencrypted.
#[async_trait]
pub trait Decryptor: Send + Sync {
    /// `Ok(true)` when `password` opened the document and `output` now holds
    /// an unencrypted copy; `Ok(false)` when the password was wrong.
    async fn try_decrypt(&self, input: &Path, password: &str, output: &Path) -> Result<bool, ToolError>;
}

/// `ForceStripProtection`: remove owner/permission encryption without the password.
#[async_trait]
pub trait ProtectionStripper: Send + Sync {
    async fn strip(&self, input: &Path, output: &Path, timeout: Duration) -> Result<(), ToolError>;
}

/// `FitPagesToSize`: rewrite every page onto a fixed media size.
#[async_trait]
pub trait PageFitter: Send + Sync {
    async fn fit(
        &self,
        input: &Path,
        output: &Path,
        page: PageSize,
        timeout: Duration,
    ) -> Result<(), ToolError>;
}

/// `CompressAtPreset`.
#[async_trait]
pub trait Compressor: Send + Sync {
    async fn compress(
        &self,
        input: &Path,
        output: &Path,
        preset: CompressionPreset,
        timeout: Duration,
    ) -> Result<(), ToolError>;
}

/// Structural facts about a PDF.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PdfInfo {
    pub encrypted: bool,
    /// Effective page sizes (rotation applied), one per page. Empty when
    /// the page tree could not be read.
    pub pages: Vec<PageSize>,
}

impl PdfInfo {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

/// Page count, per-page geometry and encryption flag.
#[async_trait]
pub trait PdfInspector: Send + Sync {
    async fn inspect(&self, path: &Path) -> Result<PdfInfo, ToolError>;
}

// ── Toolkit ──────────────────────────────────────────────────────────────

/// One implementation per capability.
#[derive(Clone)]
pub struct Toolkit {
    pub fetcher: Arc<dyn Fetcher>,
    pub sniffer: Arc<dyn MimeSniffer>,
    pub rasterizer: Arc<dyn ImageRasterizer>,
    pub office: Arc<dyn OfficeConverter>,
    pub decryptor: Arc<dyn Decryptor>,
    pub stripper: Arc<dyn ProtectionStripper>,
    pub fitter: Arc<dyn PageFitter>,
    pub compressor: Arc<dyn Compressor>,
    pub inspector: Arc<dyn PdfInspector>,
}

impl Toolkit {
    /// The production backends, configured from `config`.
    pub fn system(config: &PipelineConfig) -> Result<Self, PrepError> {
        Ok(Self {
            fetcher: Arc::new(HttpFetcher::new(config.fetch_timeout())?),
            sniffer: Arc::new(MagicSniffer),
            rasterizer: Arc::new(PrintpdfRasterizer),
            office: Arc::new(SofficeConverter::new(&config.office_bin)),
            decryptor: Arc::new(LopdfDecryptor::with_external(Arc::new(QpdfDecryptor::new(
                &config.qpdf_bin,
                config.strip_timeout(),
            )))),
            stripper: Arc::new(QpdfStripper::new(&config.qpdf_bin)),
            fitter: Arc::new(GhostscriptFitter::new(&config.ghostscript_bin)),
            compressor: Arc::new(GhostscriptCompressor::new(&config.ghostscript_bin)),
            inspector: Arc::new(LopdfInspector),
        })
    }
}

impl fmt::Debug for Toolkit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Toolkit { .. }")
    }
}
