use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::prompt::PromptBuilder;
use super::{Artifact, SynthesisRequest, SynthesisService};
use crate::errors::PipelineError;
use crate::util::{extract_json_array, extract_json_object};

#[derive(Debug, Deserialize)]
struct FilesEnvelope {
    files: Vec<Artifact>,
}

/// Synthesizes artifacts by piping a prompt into an external CLI.
///
/// The command receives the prompt on stdin and must print a JSON
/// `{"files": [...]}` object (or a bare array) somewhere in its stdout.
/// Prompts and raw outputs are kept in the log directory when one is set.
pub struct CommandSynthesizer {
    cmd: String,
    args: Vec<String>,
    timeout: Duration,
    working_dir: PathBuf,
    log_dir: Option<PathBuf>,
    prompts: PromptBuilder,
    sequence: AtomicU32,
}

impl CommandSynthesizer {
    pub fn new(cmd: &str, args: Vec<String>, timeout_secs: u64, working_dir: PathBuf) -> Self {
        Self {
            cmd: cmd.to_string(),
            args,
            timeout: Duration::from_secs(timeout_secs),
            working_dir,
            log_dir: None,
            prompts: PromptBuilder::new(None),
            sequence: AtomicU32::new(0),
        }
    }

    pub fn with_log_dir(mut self, log_dir: PathBuf) -> Self {
        self.log_dir = Some(log_dir);
        self
    }

    pub fn with_prompts_dir(mut self, prompts_dir: Option<PathBuf>) -> Self {
        self.prompts = PromptBuilder::new(prompts_dir);
        self
    }

    async fn invoke(&self, prompt: &str) -> Result<String> {
        let mut child = Command::new(&self.cmd)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(&self.working_dir)
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn synthesis command '{}'", self.cmd))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.as_bytes()).await?;
            stdin.shutdown().await.context("Failed to close stdin")?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                PipelineError::Synthesis(format!(
                    "'{}' timed out after {}s",
                    self.cmd,
                    self.timeout.as_secs()
                ))
            })?
            .context("Failed to wait for synthesis command")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::Synthesis(format!(
                "'{}' exited with {}: {}",
                self.cmd,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            ))
            .into());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn log_exchange(&self, kind: &str, prompt: &str, output: &str) {
        let Some(dir) = &self.log_dir else {
            return;
        };
        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let write = || -> std::io::Result<()> {
            std::fs::create_dir_all(dir)?;
            std::fs::write(dir.join(format!("{:04}-{}-prompt.md", n, kind)), prompt)?;
            std::fs::write(dir.join(format!("{:04}-{}-output.log", n, kind)), output)
        };
        if let Err(e) = write() {
            warn!(error = %e, "Failed to write synthesis log");
        }
    }
}

#[async_trait]
impl SynthesisService for CommandSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<Artifact>> {
        let prompt = self.prompts.build(request);
        let start = Instant::now();
        info!(kind = request.kind(), chars = prompt.len(), "Requesting synthesis");

        let output = self.invoke(&prompt).await?;
        self.log_exchange(request.kind(), &prompt, &output);
        debug!(
            kind = request.kind(),
            secs = start.elapsed().as_secs_f64(),
            "Synthesis finished"
        );

        parse_artifacts(&output)
    }
}

/// Pull the artifact list out of free-form command output.
pub fn parse_artifacts(output: &str) -> Result<Vec<Artifact>> {
    if let Some(json) = extract_json_object(output)
        && let Ok(envelope) = serde_json::from_str::<FilesEnvelope>(&json)
    {
        return Ok(envelope.files);
    }
    if let Some(json) = extract_json_array(output)
        && let Ok(files) = serde_json::from_str::<Vec<Artifact>>(&json)
    {
        return Ok(files);
    }

    let preview: String = output.chars().take(200).collect();
    Err(PipelineError::EmptySynthesis(format!("no file list found in output: {}", preview)).into())
}
