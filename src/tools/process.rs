//! Bounded external-process execution.
//!
//! Every converter in this crate is a whole-file command-line tool. They all
//! go through [`run_tool`], which enforces a wall-clock bound and turns the
//! usual failure shapes (binary missing, non-zero exit, timeout) into
//! [`ToolError`] variants the stages can reason about.
//!
//! The child is spawned with `kill_on_drop(true)`: when the timeout fires the
//! wait future is dropped and the child is killed with it, so a hung
//! converter never outlives its run.

use crate::error::ToolError;
use std::ffi::OsStr;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

/// Captured output of a successful tool run.
#[derive(Debug)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub elapsed: Duration,
}

/// Longest stderr excerpt carried in a [`ToolError::Failed`].
const STDERR_EXCERPT: usize = 2000;

/// Run `program` with `args`, bounded by `timeout`.
pub async fn run_tool<I, S>(program: &str, args: I, timeout: Duration) -> Result<ToolOutput, ToolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
    debug!("Running {} {:?} (timeout {}s)", program, args, timeout.as_secs());

    let started = Instant::now();
    let child = Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                ToolError::NotInstalled {
                    program: program.to_string(),
                }
            }
            _ => ToolError::Io {
                program: program.to_string(),
                detail: e.to_string(),
            },
        })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| ToolError::Io {
            program: program.to_string(),
            detail: e.to_string(),
        })?,
        Err(_) => {
            return Err(ToolError::TimedOut {
                program: program.to_string(),
                secs: timeout.as_secs(),
            })
        }
    };

    let elapsed = started.elapsed();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    debug!("{} finished in {}ms with {}", program, elapsed.as_millis(), output.status);

    if !output.status.success() {
        return Err(ToolError::Failed {
            program: program.to_string(),
            code: output.status.code(),
            stderr: excerpt(&stderr),
        });
    }

    Ok(ToolOutput {
        stdout: output.stdout,
        stderr,
        elapsed,
    })
}

fn excerpt(stderr: &str) -> String {
    if stderr.len() <= STDERR_EXCERPT {
        return stderr.to_string();
    }
    let mut end = STDERR_EXCERPT;
    while !stderr.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &stderr[..end])
}
