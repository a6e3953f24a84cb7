//! Office and text documents → PDF via a headless LibreOffice.

use super::process::run_tool;
use super::OfficeConverter;
use crate::error::ToolError;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info};

/// [`OfficeConverter`] that shells out to `soffice --headless --convert-to pdf`.
///
/// Each call gets its own output directory and its own LibreOffice user
/// profile. Two instances sharing a profile block on its lock file, so
/// concurrent runs would otherwise serialise or fail.
pub struct SofficeConverter {
    program: String,
}

impl SofficeConverter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl OfficeConverter for SofficeConverter {
    async fn convert(&self, input: &Path, output: &Path, timeout: Duration) -> Result<(), ToolError> {
        let io_err = |e: std::io::Error| ToolError::Io {
            program: self.program.clone(),
            detail: e.to_string(),
        };

        let scratch = TempDir::new().map_err(io_err)?;
        let out_dir = scratch.path().join("out");
        let profile = scratch.path().join("profile");
        tokio::fs::create_dir_all(&out_dir).await.map_err(io_err)?;

        let args: Vec<OsString> = vec![
            "--headless".into(),
            "--norestore".into(),
            format!("-env:UserInstallation=file://{}", profile.display()).into(),
            "--convert-to".into(),
            "pdf".into(),
            "--outdir".into(),
            out_dir.clone().into_os_string(),
            input.as_os_str().to_os_string(),
        ];

        info!("Converting {} with {}", input.display(), self.program);
        run_tool(&self.program, &args, timeout).await?;

        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let produced = out_dir.join(format!("{stem}.pdf"));
        if !produced.exists() {
            return Err(ToolError::Failed {
                program: self.program.clone(),
                code: Some(0),
                stderr: "converter exited cleanly but wrote no PDF".to_string(),
            });
        }

        tokio::fs::copy(&produced, output).await.map_err(io_err)?;
        debug!("Office conversion wrote {}", output.display());
        Ok(())
    }
}
