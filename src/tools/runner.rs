//! # External Process Runner
//!
//! Every external tool invocation goes through the `ToolRunner` trait, so that
//! converters can be tested without spawning processes.
//!
//! `ProcessRunner` runs the program with `tokio::process`, captures its output and
//! applies a wall-clock timeout. A timed-out child is killed when its handle is dropped.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

use crate::error::ConvertError;

/// Captured output of a finished process
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl ToolOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }
}

#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run `program` with `args`, failing with `Timeout` after `timeout`
    async fn run(&self, program: &Path, args: &[String], timeout: Duration) -> Result<ToolOutput, ConvertError>;

    /// Like `run`, but a non-zero exit status is an `ExternalToolFailed`
    async fn run_checked(
        &self,
        program: &Path,
        args: &[String],
        timeout: Duration,
    ) -> Result<ToolOutput, ConvertError> {
        let output = self.run(program, args, timeout).await?;
        if !output.success {
            let detail = match output.exit_code {
                Some(code) if output.stderr.trim().is_empty() => format!("exited with status {}", code),
                _ => output.stderr.clone(),
            };
            return Err(ConvertError::tool_failed(tool_name(program), detail));
        }
        Ok(output)
    }
}

/// Short tool name for messages
pub fn tool_name(program: &Path) -> String {
    program
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| program.display().to_string())
}

/// Runs tools as child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(&self, program: &Path, args: &[String], timeout: Duration) -> Result<ToolOutput, ConvertError> {
        let name = tool_name(program);
        debug!("Running {} {}", name, args.join(" "));

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ConvertError::ExternalToolUnavailable(name.clone())
                } else {
                    ConvertError::tool_failed(&name, format!("failed to start: {}", e))
                }
            })?;

        let start = Instant::now();
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ConvertError::Timeout {
                    tool: name,
                    timeout_secs: timeout.as_secs(),
                })
            }
        };

        debug!(
            "{} finished in {:.1}s with {}",
            name,
            start.elapsed().as_secs_f64(),
            output.status
        );

        Ok(ToolOutput {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_tool_name() {
        assert_eq!(tool_name(Path::new("/usr/bin/ffmpeg")), "ffmpeg");
        assert_eq!(tool_name(Path::new("C:/tools/qpdf.exe")), "qpdf");
    }

    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let err = ProcessRunner
            .run(Path::new("/definitely/not/here/ffmpeg"), &[], Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalToolUnavailable);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_output() {
        let output = ProcessRunner
            .run(Path::new("/bin/sh"), &crate::args!["-c", "echo out; echo err >&2"], Duration::from_secs(5))
            .await
            .unwrap();
        assert!(output.success);
        assert_eq!(output.stdout_text().trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_fails_checked_run() {
        let err = ProcessRunner
            .run_checked(Path::new("/bin/sh"), &crate::args!["-c", "echo broken >&2; exit 3"], Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalToolFailed);
        assert!(err.to_string().contains("broken"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout() {
        let err = ProcessRunner
            .run(Path::new("/bin/sh"), &crate::args!["-c", "sleep 5"], Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Timeout { .. }));
    }
}
