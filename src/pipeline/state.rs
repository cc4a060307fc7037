use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::checkpoint::store::StoreResult;
use crate::checkpoint::{CheckpointStore, StateSaver};
use crate::quality::CommandOutcome;
use crate::synth::Artifact;

/// Tag of the orchestrator snapshot, distinct from every stage tag.
pub const SNAPSHOT_TAG: &str = "generator_state";
/// Tag under which the run's arguments are stored for resumption.
pub const RUN_ARGS_TAG: &str = "run_args";

pub const STAGE_DECOMPOSE: &str = "process_api_definition";
pub const STAGE_SETUP: &str = "setup_framework";
pub const STAGE_ENV_FILE: &str = "create_env_file";
pub const STAGE_GENERATE: &str = "process_definitions";
pub const STAGE_FINAL_CHECKS: &str = "run_final_checks";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    NotStarted,
    Decomposing,
    EnvironmentReady,
    Generating,
    FinalChecks,
    Done,
    Interrupted,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not started",
            Self::Decomposing => "decomposing",
            Self::EnvironmentReady => "environment ready",
            Self::Generating => "generating",
            Self::FinalChecks => "final checks",
            Self::Done => "done",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What the generate stage produces per work item.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum GenerateOptions {
    /// Models only; verb items are skipped
    Models,
    /// Models plus one first test per operation
    ModelsAndFirstTest,
    /// Models, first test and additional tests per operation
    #[default]
    ModelsAndTests,
}

impl GenerateOptions {
    pub fn generates_tests(self) -> bool {
        !matches!(self, Self::Models)
    }

    pub fn generates_additional_tests(self) -> bool {
        matches!(self, Self::ModelsAndTests)
    }
}

/// Orchestrator object state, snapshotted under [`SNAPSHOT_TAG`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub state: RunState,
    pub models_count: usize,
    pub tests_count: usize,
}

/// Arguments a run was started with; a resumed run reuses them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunArgs {
    /// File path or http(s) URL of the definition
    pub api_definition: String,
    pub destination: PathBuf,
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub generate: GenerateOptions,
    #[serde(default)]
    pub use_existing_framework: bool,
}

impl RunArgs {
    /// Namespace for this run, derived from the destination folder.
    pub fn namespace(&self) -> String {
        namespace_for(&self.destination)
    }
}

pub fn namespace_for(destination: &Path) -> String {
    let trimmed = destination
        .to_string_lossy()
        .trim_end_matches(['/', '\\'])
        .to_string();
    if trimmed.is_empty() || trimmed == "." {
        crate::checkpoint::DEFAULT_NAMESPACE.to_string()
    } else {
        trimmed
    }
}

// Stage results. Each stage returns one of these; the memoizer stores it.

pub use crate::decompose::DecomposeResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupResult {
    pub template_copied: bool,
    pub files_copied: usize,
    pub install: CommandOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvFileResult {
    pub files: Vec<Artifact>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalCheckResult {
    pub compile: CommandOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests: Option<CommandOutcome>,
}

impl FinalCheckResult {
    pub fn passed(&self) -> bool {
        self.compile.success && self.tests.as_ref().is_none_or(|t| t.success)
    }
}

/// Accumulator threaded through the generate loop.
///
/// Generated models are kept per base resource; a verb item is given the
/// models of its own resource as context. The stage's counters are kept here
/// as well, so they are persisted in the same write as the processed-item
/// list and are never counted twice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateProgress {
    #[serde(default)]
    pub models: BTreeMap<String, Vec<Artifact>>,
    /// Model files written
    #[serde(default)]
    pub models_count: usize,
    /// Verb items that produced tests
    #[serde(default)]
    pub tests_count: usize,
    /// Items whose quality gate still failed after all repair attempts
    #[serde(default)]
    pub unresolved: Vec<String>,
}

/// Read a saved orchestrator snapshot for `namespace`, if any.
pub fn restore_state(store: &CheckpointStore, namespace: &str) -> StoreResult<Option<RunSnapshot>> {
    store.get(namespace, SNAPSHOT_TAG)
}

/// Shared, lockable snapshot plus the means to persist it.
///
/// The generator mutates it between stages; the interrupt task and the
/// failure path call [`StateSaver::save_state`], which copies it under the
/// lock and writes it outside the lock.
#[derive(Clone)]
pub struct RunStateSaver {
    store: CheckpointStore,
    namespace: String,
    snapshot: Arc<Mutex<RunSnapshot>>,
}

impl RunStateSaver {
    pub fn new(store: CheckpointStore, namespace: &str) -> Self {
        Self {
            store,
            namespace: namespace.to_string(),
            snapshot: Arc::new(Mutex::new(RunSnapshot::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunSnapshot> {
        self.snapshot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> RunSnapshot {
        self.lock().clone()
    }

    pub fn replace(&self, snapshot: RunSnapshot) {
        *self.lock() = snapshot;
    }

    pub fn set_state(&self, state: RunState) {
        self.lock().state = state;
    }

    pub fn set_counts(&self, models: usize, tests: usize) {
        let mut snapshot = self.lock();
        snapshot.models_count = models;
        snapshot.tests_count = tests;
    }
}

impl StateSaver for RunStateSaver {
    fn save_state(&self) -> Result<()> {
        let snapshot = self.snapshot();
        self.store.put(&self.namespace, SNAPSHOT_TAG, &snapshot)?;
        debug!(namespace = %self.namespace, state = %snapshot.state, "State saved");
        Ok(())
    }

    fn mark_interrupted(&self) {
        self.set_state(RunState::Interrupted);
    }

    fn mark_failed(&self) {
        self.set_state(RunState::Failed);
    }
}
