use std::{io, path::Path, process::Stdio};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::error::ProcessError;

/// Exit code and merged output of one tool invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessResult {
    pub combined_output: String,
    pub exit_code: i32,
}

impl ProcessResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.combined_output
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
    }
}

/// Runs an external executable. The device channel owns exactly one of these.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, executable: &Path, args: &[String]) -> Result<ProcessResult, ProcessError>;
}

/// Spawns real processes.
///
/// stdout and stderr are captured separately and joined stdout-first, so
/// their relative interleaving is lost. There is no timeout: tools may wait on
/// the user (bootloader unlock prompts) and an in-flight flash is never killed.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessSession;

#[async_trait]
impl ToolRunner for ProcessSession {
    async fn run(&self, executable: &Path, args: &[String]) -> Result<ProcessResult, ProcessError> {
        if is_explicit_path(executable) && !executable.exists() {
            return Err(ProcessError::ExecutableNotFound {
                path: executable.to_path_buf(),
            });
        }

        debug!("Running: {} {}", executable.display(), args.join(" "));
        let output = Command::new(executable)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    ProcessError::ExecutableNotFound {
                        path: executable.to_path_buf(),
                    }
                } else {
                    ProcessError::Launch {
                        path: executable.to_path_buf(),
                        message: e.to_string(),
                    }
                }
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        Ok(ProcessResult {
            combined_output: combine_output(&stdout, &stderr),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

pub fn combine_output(stdout: &str, stderr: &str) -> String {
    let mut out = String::with_capacity(stdout.len() + stderr.len());
    out.push_str(stdout);
    if !stdout.is_empty() && !stdout.ends_with('\n') && !stderr.is_empty() {
        out.push('\n');
    }
    out.push_str(stderr);
    out.trim().to_string()
}

// A bare name such as "adb" is left to PATH lookup at spawn time.
fn is_explicit_path(path: &Path) -> bool {
    path.components().count() > 1 || path.is_absolute()
}
