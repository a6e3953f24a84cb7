//! qpdf backends: password decryption and forced protection removal.

use super::process::run_tool;
use super::{Decryptor, ProtectionStripper};
use crate::error::ToolError;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

/// qpdf's exit status for "succeeded with warnings".
const EXIT_WARNINGS: i32 = 3;
/// qpdf's exit status for errors, including a wrong password.
const EXIT_ERRORS: i32 = 2;

/// True when `path` holds at least one byte. Output paths are created
/// empty before the tool runs, so existence alone proves nothing.
async fn wrote_output(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.len() > 0)
        .unwrap_or(false)
}

// ── Decryption ───────────────────────────────────────────────────────────

/// [`Decryptor`] running `qpdf --password=<pw> --decrypt <in> <out>`.
///
/// Handles documents locked with a user password, which lopdf can only
/// authenticate.
pub struct QpdfDecryptor {
    program: String,
    timeout: Duration,
}

impl QpdfDecryptor {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

fn decrypt_args(password: &str, input: &Path, output: &Path) -> Vec<OsString> {
    vec![
        format!("--password={}", password).into(),
        "--decrypt".into(),
        input.as_os_str().to_os_string(),
        output.as_os_str().to_os_string(),
    ]
}

/// Map a finished qpdf run onto the [`Decryptor`] contract.
fn decrypt_verdict(result: Result<(), ToolError>, wrote: bool) -> Result<bool, ToolError> {
    match result {
        Ok(()) if wrote => Ok(true),
        Ok(()) => Err(ToolError::Failed {
            program: "qpdf".into(),
            code: Some(0),
            stderr: "qpdf exited cleanly but wrote no output".into(),
        }),
        Err(ToolError::Failed {
            code: Some(EXIT_WARNINGS),
            ..
        }) if wrote => Ok(true),
        Err(ToolError::Failed {
            code: Some(EXIT_ERRORS),
            stderr,
            ..
        }) if stderr.contains("invalid password") => Ok(false),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl Decryptor for QpdfDecryptor {
    async fn try_decrypt(&self, input: &Path, password: &str, output: &Path) -> Result<bool, ToolError> {
        let result = run_tool(&self.program, decrypt_args(password, input, output), self.timeout)
            .await
            .map(|_| ());
        decrypt_verdict(result, wrote_output(output).await)
    }
}

// ── Forced strip ─────────────────────────────────────────────────────────

/// [`ProtectionStripper`] running `qpdf --decrypt <in> <out>`.
///
/// qpdf removes owner-password restrictions without knowing the password.
/// A document with a real user password still fails here, which the stage
/// records as irrecoverable.
pub struct QpdfStripper {
    program: String,
}

impl QpdfStripper {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl ProtectionStripper for QpdfStripper {
    async fn strip(&self, input: &Path, output: &Path, timeout: Duration) -> Result<(), ToolError> {
        let result = run_tool(
            &self.program,
            [
                std::ffi::OsStr::new("--decrypt"),
                input.as_os_str(),
                output.as_os_str(),
            ],
            timeout,
        )
        .await;
        let wrote = wrote_output(output).await;
        match result {
            Ok(_) => Ok(()),
            Err(ToolError::Failed {
                code: Some(EXIT_WARNINGS),
                ..
            }) if wrote => Ok(()),
            Err(e) => Err(e),
        }
    }
}
