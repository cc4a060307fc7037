//! Shell-level validation commands (install, compile, format, lint, test).
//!
//! Commands run through `sh -c` in the destination directory with stdout and
//! stderr captured together. A spawn failure or timeout is reported as a
//! failed outcome carrying the reason, never as an error: the caller only
//! cares whether the check passed and what to show the repair step.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::CommandOutcome;
use crate::synth::Artifact;

/// Placeholder replaced by the space-separated file list in templates.
pub const FILES_PLACEHOLDER: &str = "{files}";

/// Executes a validation command line.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str) -> CommandOutcome;
}

/// Runs commands with `sh -c` inside a working directory.
pub struct ShellRunner {
    working_dir: PathBuf,
    timeout: Duration,
}

impl ShellRunner {
    pub fn new(working_dir: impl AsRef<Path>, timeout_secs: u64) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str) -> CommandOutcome {
        info!(command, cwd = %self.working_dir.display(), "Running command");

        if let Err(e) = tokio::fs::create_dir_all(&self.working_dir).await {
            return CommandOutcome::failure(format!(
                "Failed to prepare working directory {}: {}",
                self.working_dir.display(),
                e
            ));
        }

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("FORCE_COLOR", "0")
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!(command, error = %e, "Failed to spawn command");
                return CommandOutcome::failure(format!("Failed to spawn '{}': {}", command, e));
            }
        };

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return CommandOutcome::failure(format!("Failed to wait for '{}': {}", command, e));
            }
            Err(_) => {
                warn!(command, secs = self.timeout.as_secs(), "Command timed out");
                return CommandOutcome::failure(format!(
                    "Command '{}' timed out after {} seconds",
                    command,
                    self.timeout.as_secs()
                ));
            }
        };

        let mut text = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(stderr.trim_end());
        }

        let success = output.status.success();
        debug!(command, exit = output.status.code().unwrap_or(-1), "Command finished");
        if success {
            info!(command, "Command succeeded");
        } else {
            warn!(command, "Command failed");
        }
        CommandOutcome {
            success,
            output: text,
        }
    }
}

/// Substitute the artifacts' paths into a `{files}` template.
///
/// Templates without the placeholder get the paths appended.
pub fn render_files_command(template: &str, files: &[Artifact]) -> String {
    let paths = files
        .iter()
        .map(|f| quote_path(f.relative_path()))
        .collect::<Vec<_>>()
        .join(" ");
    if template.contains(FILES_PLACEHOLDER) {
        template.replace(FILES_PLACEHOLDER, &paths)
    } else if paths.is_empty() {
        template.to_string()
    } else {
        format!("{} {}", template, paths)
    }
}

fn quote_path(path: &str) -> String {
    if path
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "/._-".contains(c))
    {
        path.to_string()
    } else {
        format!("'{}'", path.replace('\'', r"'\''"))
    }
}
