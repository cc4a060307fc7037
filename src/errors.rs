//! Typed error hierarchy for the generator.
//!
//! Two top-level enums cover the two subsystems:
//! - `CheckpointError` — durable store failures
//! - `PipelineError` — stage and collaborator failures surfaced by the orchestrator

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the checkpoint store.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize checkpoint '{tag}': {source}")]
    Serialize {
        tag: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Checkpoint record at {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },
}

impl CheckpointError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error means "a record exists but cannot be read back".
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }
}

/// Errors surfaced by pipeline stages.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid API definition {location}: {message}")]
    InvalidDefinition { location: String, message: String },

    #[error("Synthesis service failed: {0}")]
    Synthesis(String),

    #[error("Synthesis service returned no usable artifacts: {0}")]
    EmptySynthesis(String),

    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Another run holds the lock at {0}")]
    RunInProgress(PathBuf),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}
