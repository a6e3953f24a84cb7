//! Configuration types for document preparation.
//!
//! Two structs split the knobs by lifetime:
//!
//! * [`PipelineConfig`]: process-wide settings fixed at startup (temp
//!   directory, tool binaries, timeouts, thresholds). Built via
//!   [`PipelineConfigBuilder`] and handed to [`crate::DocumentPreparer::new`];
//!   stage code reads it from there and never from the environment.
//! * [`PrepareOptions`]: per-call settings (compression target, size budget,
//!   delivery mode).

use crate::error::PrepError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Process-wide configuration for a [`crate::DocumentPreparer`].
///
/// # Example
/// ```rust
/// use pdfprep::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .temp_dir("/var/tmp/pdfcache")
///     .geometry_tolerance(0.05)
///     .compress_timeout_secs(90)
///     .build()
///     .unwrap();
/// assert_eq!(config.compress_timeout_secs, 90);
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Shared directory for run arenas and delivered artifacts.
    /// Default: `<os temp>/pdfcache`.
    pub temp_dir: PathBuf,

    /// Prefix of retrieval links: `{public_base_url}/temp/{file}`.
    pub public_base_url: String,

    /// Lifetime of a retrieval link in minutes. Default: 60.
    pub link_ttl_minutes: u64,

    /// Remote fetch bound in seconds. Default: 60.
    pub fetch_timeout_secs: u64,

    /// Office converter bound in seconds. Default: 120.
    pub office_timeout_secs: u64,

    /// Page-fitting converter bound in seconds. Default: 120.
    pub fit_timeout_secs: u64,

    /// Per-preset compressor bound in seconds. Default: 180.
    ///
    /// The whole ladder may take up to four times this value.
    pub compress_timeout_secs: u64,

    /// Forced-strip converter bound in seconds. Default: 60.
    pub strip_timeout_secs: u64,

    /// Page size every page is normalised to. Default: US Letter.
    pub target_page: PageSize,

    /// Relative tolerance applied to each page dimension. Default: 0.05.
    pub geometry_tolerance: f64,

    /// Files at or below this size are treated as corrupt or invalid.
    /// Default: 1000 bytes.
    pub min_valid_file_bytes: u64,

    /// Margin kept around images placed on a page, in points. Default: 36.
    pub image_margin_pt: f64,

    /// Passwords tried, in order, against encrypted PDFs.
    pub password_dictionary: Vec<String>,

    /// Ghostscript executable. Default: `gs`.
    pub ghostscript_bin: String,

    /// Headless office converter executable. Default: `soffice`.
    pub office_bin: String,

    /// qpdf executable used for forced protection removal. Default: `qpdf`.
    pub qpdf_bin: String,

    /// Optional observer for stage events.
    #[serde(skip)]
    pub progress_callback: Option<ProgressCallback>,
}

/// Passwords tried before falling back to a forced strip.
pub const DEFAULT_PASSWORDS: &[&str] = &[
    "", "123456", "password", "1234", "12345", "12345678", "0000", "1111", "admin", "user",
    "owner", "pdf",
];

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir().join("pdfcache"),
            public_base_url: "http://localhost:8000".to_string(),
            link_ttl_minutes: 60,
            fetch_timeout_secs: 60,
            office_timeout_secs: 120,
            fit_timeout_secs: 120,
            compress_timeout_secs: 180,
            strip_timeout_secs: 60,
            target_page: PageSize::LETTER,
            geometry_tolerance: 0.05,
            min_valid_file_bytes: 1000,
            image_margin_pt: 36.0,
            password_dictionary: DEFAULT_PASSWORDS.iter().map(|p| p.to_string()).collect(),
            ghostscript_bin: "gs".to_string(),
            office_bin: "soffice".to_string(),
            qpdf_bin: "qpdf".to_string(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("temp_dir", &self.temp_dir)
            .field("public_base_url", &self.public_base_url)
            .field("link_ttl_minutes", &self.link_ttl_minutes)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("office_timeout_secs", &self.office_timeout_secs)
            .field("fit_timeout_secs", &self.fit_timeout_secs)
            .field("compress_timeout_secs", &self.compress_timeout_secs)
            .field("strip_timeout_secs", &self.strip_timeout_secs)
            .field("target_page", &self.target_page)
            .field("geometry_tolerance", &self.geometry_tolerance)
            .field("min_valid_file_bytes", &self.min_valid_file_bytes)
            .field("image_margin_pt", &self.image_margin_pt)
            .field("password_dictionary", &format_args!("[{} entries]", self.password_dictionary.len()))
            .field("ghostscript_bin", &self.ghostscript_bin)
            .field("office_bin", &self.office_bin)
            .field("qpdf_bin", &self.qpdf_bin)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    pub(crate) fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub(crate) fn office_timeout(&self) -> Duration {
        Duration::from_secs(self.office_timeout_secs)
    }

    pub(crate) fn fit_timeout(&self) -> Duration {
        Duration::from_secs(self.fit_timeout_secs)
    }

    pub(crate) fn compress_timeout(&self) -> Duration {
        Duration::from_secs(self.compress_timeout_secs)
    }

    pub(crate) fn strip_timeout(&self) -> Duration {
        Duration::from_secs(self.strip_timeout_secs)
    }

    /// Retrieval link for a delivered file name.
    pub fn link_for(&self, file_name: &str) -> String {
        format!(
            "{}/temp/{}",
            self.public_base_url.trim_end_matches('/'),
            file_name
        )
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = dir.into();
        self
    }

    pub fn public_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.public_base_url = url.into();
        self
    }

    pub fn link_ttl_minutes(mut self, minutes: u64) -> Self {
        self.config.link_ttl_minutes = minutes.max(1);
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fetch_timeout_secs = secs;
        self
    }

    pub fn office_timeout_secs(mut self, secs: u64) -> Self {
        self.config.office_timeout_secs = secs;
        self
    }

    pub fn fit_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fit_timeout_secs = secs;
        self
    }

    pub fn compress_timeout_secs(mut self, secs: u64) -> Self {
        self.config.compress_timeout_secs = secs;
        self
    }

    pub fn strip_timeout_secs(mut self, secs: u64) -> Self {
        self.config.strip_timeout_secs = secs;
        self
    }

    pub fn target_page(mut self, page: PageSize) -> Self {
        self.config.target_page = page;
        self
    }

    pub fn geometry_tolerance(mut self, tolerance: f64) -> Self {
        self.config.geometry_tolerance = tolerance;
        self
    }

    pub fn min_valid_file_bytes(mut self, bytes: u64) -> Self {
        self.config.min_valid_file_bytes = bytes;
        self
    }

    pub fn image_margin_pt(mut self, margin: f64) -> Self {
        self.config.image_margin_pt = margin.max(0.0);
        self
    }

    pub fn password_dictionary<I, S>(mut self, passwords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.password_dictionary = passwords.into_iter().map(Into::into).collect();
        self
    }

    pub fn ghostscript_bin(mut self, bin: impl Into<String>) -> Self {
        self.config.ghostscript_bin = bin.into();
        self
    }

    pub fn office_bin(mut self, bin: impl Into<String>) -> Self {
        self.config.office_bin = bin.into();
        self
    }

    pub fn qpdf_bin(mut self, bin: impl Into<String>) -> Self {
        self.config.qpdf_bin = bin.into();
        self
    }

    pub fn progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.config.progress_callback = Some(callback);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PrepError> {
        let c = &self.config;
        if !(0.0..0.5).contains(&c.geometry_tolerance) {
            return Err(PrepError::InvalidConfig(format!(
                "geometry tolerance must be within [0, 0.5), got {}",
                c.geometry_tolerance
            )));
        }
        if c.min_valid_file_bytes == 0 {
            return Err(PrepError::InvalidConfig(
                "minimum valid file size must be ≥ 1 byte".into(),
            ));
        }
        let timeouts = [
            ("fetch", c.fetch_timeout_secs),
            ("office", c.office_timeout_secs),
            ("fit", c.fit_timeout_secs),
            ("compress", c.compress_timeout_secs),
            ("strip", c.strip_timeout_secs),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, secs)| *secs == 0) {
            return Err(PrepError::InvalidConfig(format!(
                "{name} timeout must be ≥ 1 second"
            )));
        }
        if !(c.public_base_url.starts_with("http://") || c.public_base_url.starts_with("https://")) {
            return Err(PrepError::InvalidConfig(format!(
                "public base URL must start with http:// or https://, got '{}'",
                c.public_base_url
            )));
        }
        if !(c.target_page.width_pt > 0.0 && c.target_page.height_pt > 0.0) {
            return Err(PrepError::InvalidConfig(
                "target page dimensions must be positive".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Per-call options ─────────────────────────────────────────────────────

/// Options for a single [`crate::DocumentPreparer::prepare`] call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareOptions {
    /// Try to remove encryption. Default: true.
    pub force_password_removal: bool,

    /// Preset the compression ladder starts at. Default: ebook.
    pub target_compression: CompressionPreset,

    /// Size budget for the delivered PDF, in megabytes. Default: 8.0.
    pub max_file_size_mb: f64,

    /// Name of the delivered file. Default: `prepared.pdf`.
    pub output_filename: Option<String>,

    /// How the artifact is handed back. Default: inline.
    pub return_mode: ReturnMode,
}

impl Default for PrepareOptions {
    fn default() -> Self {
        Self {
            force_password_removal: true,
            target_compression: CompressionPreset::default(),
            max_file_size_mb: 8.0,
            output_filename: None,
            return_mode: ReturnMode::default(),
        }
    }
}

impl PrepareOptions {
    pub fn builder() -> PrepareOptionsBuilder {
        PrepareOptionsBuilder {
            options: Self::default(),
        }
    }

    /// Reject options no run could honour.
    pub fn validate(&self) -> Result<(), PrepError> {
        if !self.max_file_size_mb.is_finite() || self.max_file_size_mb <= 0.0 {
            return Err(PrepError::invalid_input(format!(
                "max_file_size_mb must be a positive number, got {}",
                self.max_file_size_mb
            )));
        }
        Ok(())
    }

    /// Size budget in bytes.
    pub fn max_file_size_bytes(&self) -> u64 {
        (self.max_file_size_mb * 1024.0 * 1024.0) as u64
    }

    /// The delivered file name: directory components stripped, `.pdf` enforced.
    pub fn resolved_filename(&self) -> String {
        let raw = self
            .output_filename
            .as_deref()
            .map(str::trim)
            .unwrap_or_default();
        let base = raw.rsplit(['/', '\\']).next().unwrap_or_default().trim();
        if base.is_empty() || base == "." || base == ".." {
            return "prepared.pdf".to_string();
        }
        if base.to_ascii_lowercase().ends_with(".pdf") {
            base.to_string()
        } else {
            format!("{base}.pdf")
        }
    }
}

/// Builder for [`PrepareOptions`].
#[derive(Debug)]
pub struct PrepareOptionsBuilder {
    options: PrepareOptions,
}

impl PrepareOptionsBuilder {
    pub fn force_password_removal(mut self, v: bool) -> Self {
        self.options.force_password_removal = v;
        self
    }

    pub fn target_compression(mut self, preset: CompressionPreset) -> Self {
        self.options.target_compression = preset;
        self
    }

    pub fn max_file_size_mb(mut self, mb: f64) -> Self {
        self.options.max_file_size_mb = mb;
        self
    }

    pub fn output_filename(mut self, name: impl Into<String>) -> Self {
        self.options.output_filename = Some(name.into());
        self
    }

    pub fn return_mode(mut self, mode: ReturnMode) -> Self {
        self.options.return_mode = mode;
        self
    }

    pub fn build(self) -> Result<PrepareOptions, PrepError> {
        self.options.validate()?;
        Ok(self.options)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Ghostscript `-dPDFSETTINGS` preset.
///
/// Ordered as the preset ladder: progressive compression walks from the
/// requested preset towards [`CompressionPreset::Prepress`] and force-accepts
/// the last one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CompressionPreset {
    Screen,
    #[default]
    Ebook,
    Printer,
    Prepress,
}

impl CompressionPreset {
    /// The full ladder, in search order.
    pub const LADDER: [CompressionPreset; 4] = [
        CompressionPreset::Screen,
        CompressionPreset::Ebook,
        CompressionPreset::Printer,
        CompressionPreset::Prepress,
    ];

    /// The ladder suffix starting at `self`.
    pub fn ladder_from(self) -> &'static [CompressionPreset] {
        let start = Self::LADDER
            .iter()
            .position(|p| *p == self)
            .unwrap_or_default();
        &Self::LADDER[start..]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Screen => "screen",
            Self::Ebook => "ebook",
            Self::Printer => "printer",
            Self::Prepress => "prepress",
        }
    }

    /// Value for ghostscript's `-dPDFSETTINGS=`.
    pub fn as_gs_setting(self) -> String {
        format!("/{}", self.as_str())
    }
}

impl fmt::Display for CompressionPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the prepared PDF is delivered to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnMode {
    /// Bytes inline in the result; the file is removed after reading.
    #[default]
    Inline,
    /// A time-boxed retrieval link; the file stays in the shared directory.
    Link,
}

/// A page size in PDF points (1/72 inch).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width_pt: f64,
    pub height_pt: f64,
}

impl PageSize {
    pub const LETTER: PageSize = PageSize {
        width_pt: 612.0,
        height_pt: 792.0,
    };

    pub const A4: PageSize = PageSize {
        width_pt: 595.0,
        height_pt: 842.0,
    };

    /// The same size with width and height swapped.
    pub fn rotated(self) -> PageSize {
        PageSize {
            width_pt: self.height_pt,
            height_pt: self.width_pt,
        }
    }

    /// Portrait form (height ≥ width).
    pub fn portrait(self) -> PageSize {
        if self.width_pt > self.height_pt {
            self.rotated()
        } else {
            self
        }
    }

    /// Landscape form (width > height).
    pub fn landscape(self) -> PageSize {
        self.portrait().rotated()
    }
}

impl Default for PageSize {
    fn default() -> Self {
        Self::LETTER
    }
}
