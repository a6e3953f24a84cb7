//! Ghostscript-backed page fitting and compression.
//!
//! Both capabilities are the `pdfwrite` device with different switches:
//!
//! ```text
//! fit:      gs -sDEVICE=pdfwrite -dFIXEDMEDIA -dPDFFitPage
//!              -dDEVICEWIDTHPOINTS=612 -dDEVICEHEIGHTPOINTS=792 ...
//! compress: gs -sDEVICE=pdfwrite -dCompatibilityLevel=1.4
//!              -dPDFSETTINGS=/ebook ...
//! ```

use super::process::run_tool;
use super::{Compressor, PageFitter};
use crate::config::{CompressionPreset, PageSize};
use crate::error::ToolError;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

const COMMON_FLAGS: &[&str] = &["-sDEVICE=pdfwrite", "-dNOPAUSE", "-dQUIET", "-dBATCH", "-dSAFER"];

fn output_flag(output: &Path) -> OsString {
    let mut flag = OsString::from("-sOutputFile=");
    flag.push(output.as_os_str());
    flag
}

/// Arguments for rewriting every page onto `page`.
pub fn fit_args(input: &Path, output: &Path, page: PageSize) -> Vec<OsString> {
    let mut args: Vec<OsString> = COMMON_FLAGS.iter().map(OsString::from).collect();
    args.extend([
        OsString::from("-dFIXEDMEDIA"),
        OsString::from("-dPDFFitPage"),
        OsString::from(format!("-dDEVICEWIDTHPOINTS={}", page.width_pt.round() as i64)),
        OsString::from(format!("-dDEVICEHEIGHTPOINTS={}", page.height_pt.round() as i64)),
        output_flag(output),
        input.as_os_str().to_os_string(),
    ]);
    args
}

/// Arguments for recompressing at `preset`.
pub fn compress_args(input: &Path, output: &Path, preset: CompressionPreset) -> Vec<OsString> {
    let mut args: Vec<OsString> = COMMON_FLAGS.iter().map(OsString::from).collect();
    args.extend([
        OsString::from("-dCompatibilityLevel=1.4"),
        OsString::from(format!("-dPDFSETTINGS={}", preset.as_gs_setting())),
        output_flag(output),
        input.as_os_str().to_os_string(),
    ]);
    args
}

/// [`PageFitter`] backed by ghostscript.
pub struct GhostscriptFitter {
    program: String,
}

impl GhostscriptFitter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl PageFitter for GhostscriptFitter {
    async fn fit(
        &self,
        input: &Path,
        output: &Path,
        page: PageSize,
        timeout: Duration,
    ) -> Result<(), ToolError> {
        run_tool(&self.program, fit_args(input, output, page), timeout).await?;
        Ok(())
    }
}

/// [`Compressor`] backed by ghostscript.
pub struct GhostscriptCompressor {
    program: String,
}

impl GhostscriptCompressor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Compressor for GhostscriptCompressor {
    async fn compress(
        &self,
        input: &Path,
        output: &Path,
        preset: CompressionPreset,
        timeout: Duration,
    ) -> Result<(), ToolError> {
        run_tool(&self.program, compress_args(input, output, preset), timeout).await?;
        Ok(())
    }
}
