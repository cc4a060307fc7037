//! Code synthesis collaborator.
//!
//! The pipeline treats synthesis as an opaque, slow, fallible call: a request
//! goes in, a list of `{path, content}` artifacts comes out. `CommandSynthesizer`
//! drives an external CLI; tests substitute their own `SynthesisService`.

pub mod command;
pub mod prompt;

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use command::CommandSynthesizer;

/// A generated file, addressed relative to the destination folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: String,
    #[serde(alias = "fileContent")]
    pub content: String,
}

impl Artifact {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    /// Path with any leading `./` or `/` removed.
    pub fn relative_path(&self) -> &str {
        self.path
            .trim_start_matches("./")
            .trim_start_matches('/')
    }

    /// Where the artifact lives under `destination`.
    ///
    /// Fails for paths that would leave the destination (`..`, drive prefixes).
    pub fn target(&self, destination: &Path) -> Result<PathBuf> {
        let relative = Path::new(self.relative_path());
        let confined = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !confined || relative.as_os_str().is_empty() {
            anyhow::bail!(
                "Refusing to write artifact outside the destination: {}",
                self.path
            );
        }
        Ok(destination.join(relative))
    }
}

/// What the synthesis service is asked to produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SynthesisRequest {
    /// `.env` file for the API's base definition
    DotEnv { definition: String },
    /// Models for one resource
    Models { definition: String },
    /// The first test for one operation, given the resource's models
    FirstTest {
        definition: String,
        models: Vec<Artifact>,
    },
    /// More tests for an operation that already has a first test
    AdditionalTests {
        definition: String,
        tests: Vec<Artifact>,
        models: Vec<Artifact>,
    },
    /// Rewrite files so that they pass validation
    Fix {
        files: Vec<Artifact>,
        diagnostics: String,
    },
}

impl SynthesisRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DotEnv { .. } => "dot_env",
            Self::Models { .. } => "models",
            Self::FirstTest { .. } => "first_test",
            Self::AdditionalTests { .. } => "additional_tests",
            Self::Fix { .. } => "fix",
        }
    }
}

#[async_trait]
pub trait SynthesisService: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<Artifact>>;
}

/// Write artifacts under `destination`, creating parent directories.
pub fn write_artifacts(destination: &Path, artifacts: &[Artifact]) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        let path = artifact.target(destination)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        fs::write(&path, &artifact.content)
            .with_context(|| format!("Failed to write artifact {}", path.display()))?;
        debug!(path = %path.display(), "Created file");
        written.push(path);
    }
    Ok(written)
}

/// Re-read artifacts from disk so a repair sees the current contents.
pub fn read_artifacts(destination: &Path, artifacts: &[Artifact]) -> Vec<Artifact> {
    artifacts
        .iter()
        .map(|a| {
            let content = a
                .target(destination)
                .and_then(|path| Ok(fs::read_to_string(path)?))
                .unwrap_or_else(|_| a.content.clone());
            Artifact::new(a.path.clone(), content)
        })
        .collect()
}
