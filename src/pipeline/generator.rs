//! The generation run: four stages driven through the checkpoint engine.
//!
//! ```text
//! process_api_definition  (memoized)   decompose the definition into work items
//! setup_framework         (memoized)   copy the template, install dependencies
//! create_env_file         (memoized)   synthesize `.env` from the base definition
//! process_definitions     (per item)   models for paths, tests for verbs, quality gate
//! run_final_checks        (memoized)   whole-project compile, then tests
//! ```
//!
//! A finished run clears the checkpoint store; an interrupted or failed run
//! leaves it in place so the next invocation resumes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::state::{
    DecomposeResult, EnvFileResult, FinalCheckResult, GenerateOptions, GenerateProgress,
    RunArgs, RunSnapshot, RunState, RunStateSaver, STAGE_DECOMPOSE, STAGE_ENV_FILE,
    STAGE_FINAL_CHECKS, STAGE_GENERATE, STAGE_SETUP, SetupResult, restore_state,
};
use crate::checkpoint::{
    CheckpointStore, ItemTracker, StageMemo, StageObserver, StateSaver, capture_failure,
};
use crate::config::CommandsSection;
use crate::decompose::{WorkItem, WorkItemKind, decompose_source};
use crate::errors::PipelineError;
use crate::quality::{
    CommandOutcome, CommandRunner, Repair, RepairLoop, Validate, render_files_command,
};
use crate::synth::{
    Artifact, SynthesisRequest, SynthesisService, read_artifacts, write_artifacts,
};
use crate::ui::GeneratorUI;

/// Settings that do not change between a run and its resumption.
#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    pub max_fix_attempts: u32,
    pub template_dir: Option<PathBuf>,
    pub commands: CommandsSection,
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub snapshot: RunSnapshot,
    pub final_checks: FinalCheckResult,
    /// Items whose files still failed to compile after every repair attempt
    pub unresolved: Vec<String>,
}

pub struct Generator {
    store: CheckpointStore,
    namespace: String,
    args: RunArgs,
    settings: GeneratorSettings,
    synth: Arc<dyn SynthesisService>,
    runner: Arc<dyn CommandRunner>,
    saver: RunStateSaver,
    memo: StageMemo,
    ui: Option<Arc<GeneratorUI>>,
}

impl Generator {
    pub fn new(
        store: CheckpointStore,
        args: RunArgs,
        settings: GeneratorSettings,
        synth: Arc<dyn SynthesisService>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let namespace = args.namespace();
        let saver = RunStateSaver::new(store.clone(), &namespace);
        let memo = StageMemo::new(store.clone(), &namespace, Arc::new(saver.clone()));
        Self {
            store,
            namespace,
            args,
            settings,
            synth,
            runner,
            saver,
            memo,
            ui: None,
        }
    }

    pub fn with_ui(mut self, ui: Arc<GeneratorUI>) -> Self {
        let observer: Arc<dyn StageObserver> = ui.clone();
        self.memo = self.memo.with_observer(observer);
        self.ui = Some(ui);
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Hook for the interrupt handler; shares the live snapshot.
    pub fn state_saver(&self) -> Arc<dyn StateSaver> {
        Arc::new(self.saver.clone())
    }

    pub fn snapshot(&self) -> RunSnapshot {
        self.saver.snapshot()
    }

    /// Load the saved snapshot for this namespace into memory.
    ///
    /// Returns the restored snapshot, or `None` when there was nothing to restore.
    pub fn restore_state(&self) -> Result<Option<RunSnapshot>> {
        let restored = restore_state(&self.store, &self.namespace)?;
        if let Some(snapshot) = &restored {
            info!(
                namespace = %self.namespace,
                state = %snapshot.state,
                models = snapshot.models_count,
                tests = snapshot.tests_count,
                "Restored generator state"
            );
            self.saver.replace(snapshot.clone());
        }
        Ok(restored)
    }

    /// Run every stage, flushing state if any of them fails.
    pub async fn run(&self) -> Result<RunSummary> {
        capture_failure(&self.saver, self.run_stages()).await
    }

    async fn run_stages(&self) -> Result<RunSummary> {
        self.enter(RunState::Decomposing)?;
        let decomposition: DecomposeResult = self
            .memo
            .run(STAGE_DECOMPOSE, move || async move { self.process_api_definition().await })
            .await?;

        let _setup: SetupResult = self
            .memo
            .run(STAGE_SETUP, move || async move { self.setup_framework().await })
            .await?;
        self.enter(RunState::EnvironmentReady)?;

        let base = &decomposition.base;
        let _env: EnvFileResult = self
            .memo
            .run(STAGE_ENV_FILE, move || async move { self.create_env_file(base).await })
            .await?;

        self.enter(RunState::Generating)?;
        let progress = self.process_definitions(decomposition.items).await?;

        self.enter(RunState::FinalChecks)?;
        let final_checks: FinalCheckResult = self
            .memo
            .run(STAGE_FINAL_CHECKS, move || async move { self.run_final_checks().await })
            .await?;

        self.enter(RunState::Done)?;
        let snapshot = self.saver.snapshot();
        self.store
            .clear()
            .context("Failed to clear checkpoints after a completed run")?;
        info!(
            namespace = %self.namespace,
            models = snapshot.models_count,
            tests = snapshot.tests_count,
            "Generation complete, checkpoints cleared"
        );

        if let Some(ui) = &self.ui {
            ui.run_complete(&snapshot, final_checks.passed());
        }

        Ok(RunSummary {
            snapshot,
            final_checks,
            unresolved: progress.unresolved,
        })
    }

    fn enter(&self, state: RunState) -> Result<()> {
        debug!(namespace = %self.namespace, %state, "State transition");
        self.saver.set_state(state);
        self.saver.save_state()
    }

    async fn process_api_definition(&self) -> Result<DecomposeResult> {
        Ok(decompose_source(&self.args.api_definition).await?)
    }

    async fn setup_framework(&self) -> Result<SetupResult> {
        let destination = &self.args.destination;
        std::fs::create_dir_all(destination).with_context(|| {
            format!("Failed to create destination {}", destination.display())
        })?;

        let mut files_copied = 0;
        let template_copied = match &self.settings.template_dir {
            Some(template) if !self.args.use_existing_framework => {
                files_copied = copy_template(template, destination)?;
                info!(template = %template.display(), files_copied, "Template copied");
                true
            }
            _ => false,
        };

        let install = self.runner.run(&self.settings.commands.install).await;
        if !install.success {
            return Err(PipelineError::Stage {
                stage: STAGE_SETUP.to_string(),
                source: anyhow::anyhow!("install failed: {}", install.output),
            }
            .into());
        }

        Ok(SetupResult {
            template_copied,
            files_copied,
            install,
        })
    }

    async fn create_env_file(&self, base: &str) -> Result<EnvFileResult> {
        let files = self
            .synth
            .synthesize(&SynthesisRequest::DotEnv {
                definition: base.to_string(),
            })
            .await?;
        self.write(&files)?;
        Ok(EnvFileResult { files })
    }

    async fn process_definitions(&self, items: Vec<WorkItem>) -> Result<GenerateProgress> {
        let generate = self.args.generate;
        let items: Vec<WorkItem> = items
            .into_iter()
            .filter(|item| item.matches_endpoints(&self.args.endpoints))
            .filter(|item| item.kind == WorkItemKind::Path || generate.generates_tests())
            .collect();
        let total = items.len();

        if let Some(ui) = &self.ui {
            ui.stage_started(STAGE_GENERATE);
        }

        let mut acc = GenerateProgress::default();
        let mut tracker =
            ItemTracker::begin(&self.store, &self.namespace, STAGE_GENERATE, items, &mut acc)?;

        // Counters for this stage live in the accumulator so they are committed
        // together with the processed list.
        self.saver.set_counts(acc.models_count, acc.tests_count);
        if let Some(ui) = &self.ui {
            ui.start_items(total, tracker.processed().len());
        }

        while let Some(item) = tracker.next(&acc)? {
            if let Some(ui) = &self.ui {
                ui.start_item(&item.label());
            }
            let (files, passed) = match item.kind {
                WorkItemKind::Path => self.generate_models(&item, &mut acc).await?,
                WorkItemKind::Verb => self.generate_tests(&item, generate, &mut acc).await?,
            };
            if !passed {
                acc.unresolved.push(item.key.clone());
            }
            self.saver.set_counts(acc.models_count, acc.tests_count);
            self.saver.save_state()?;
            if let Some(ui) = &self.ui {
                ui.item_done(&item.label(), files, passed);
            }
        }

        if let Some(ui) = &self.ui {
            ui.finish_items();
            ui.stage_completed(STAGE_GENERATE);
            if !acc.unresolved.is_empty() {
                ui.show_warning(&format!(
                    "{} item(s) still fail to compile: {}",
                    acc.unresolved.len(),
                    acc.unresolved.join(", ")
                ));
            }
        }
        Ok(acc)
    }

    async fn generate_models(
        &self,
        item: &WorkItem,
        acc: &mut GenerateProgress,
    ) -> Result<(usize, bool)> {
        info!(item = %item.key, "Generating models");
        let models = self
            .synth
            .synthesize(&SynthesisRequest::Models {
                definition: item.definition.clone(),
            })
            .await?;
        self.write(&models)?;
        acc.models_count += models.len();

        let passed = self.quality_gate(&models).await?;
        let count = models.len();
        acc.models
            .insert(item.resource(), read_artifacts(&self.args.destination, &models));
        Ok((count, passed))
    }

    async fn generate_tests(
        &self,
        item: &WorkItem,
        generate: GenerateOptions,
        acc: &mut GenerateProgress,
    ) -> Result<(usize, bool)> {
        info!(item = %item.key, "Generating tests");
        let models = acc.models.get(&item.resource()).cloned().unwrap_or_default();
        if models.is_empty() {
            warn!(item = %item.key, resource = %item.resource(), "No models available as context for tests");
        }

        let tests = self
            .synth
            .synthesize(&SynthesisRequest::FirstTest {
                definition: item.definition.clone(),
                models: models.clone(),
            })
            .await?;
        self.write(&tests)?;
        if !tests.is_empty() {
            acc.tests_count += 1;
        }
        let mut passed = self.quality_gate(&tests).await?;
        let mut count = tests.len();

        if generate.generates_additional_tests() {
            let more = self
                .synth
                .synthesize(&SynthesisRequest::AdditionalTests {
                    definition: item.definition.clone(),
                    tests: read_artifacts(&self.args.destination, &tests),
                    models,
                })
                .await?;
            self.write(&more)?;
            passed &= self.quality_gate(&more).await?;
            count += more.len();
        }

        Ok((count, passed))
    }

    /// Compile the files with repair, then format and lint them.
    ///
    /// Returns whether the compile check ended up passing.
    async fn quality_gate(&self, files: &[Artifact]) -> Result<bool> {
        if files.is_empty() {
            return Ok(true);
        }
        let check = CompileFiles {
            runner: self.runner.as_ref(),
            template: &self.settings.commands.compile_files,
        };
        let repair = SynthesisRepair {
            synth: self.synth.as_ref(),
            destination: &self.args.destination,
        };
        let outcome = RepairLoop::new(self.settings.max_fix_attempts)
            .run::<[Artifact]>(&check, Some(&repair), files)
            .await?;

        for command in [&self.settings.commands.format, &self.settings.commands.lint] {
            let result = self.runner.run(command).await;
            if !result.success {
                warn!(command = %command, "Post-generation command failed");
            }
        }
        Ok(outcome.success)
    }

    async fn run_final_checks(&self) -> Result<FinalCheckResult> {
        let compile = self.runner.run(&self.settings.commands.compile).await;
        let tests = if compile.success && self.args.generate.generates_tests() {
            Some(self.runner.run(&self.settings.commands.test).await)
        } else {
            if !compile.success {
                warn!("Compilation failed, skipping tests");
            }
            None
        };
        Ok(FinalCheckResult { compile, tests })
    }

    fn write(&self, files: &[Artifact]) -> Result<()> {
        write_artifacts(&self.args.destination, files)?;
        if let Some(ui) = &self.ui {
            let paths: Vec<String> = files.iter().map(|f| f.relative_path().to_string()).collect();
            ui.show_files(&paths);
        }
        Ok(())
    }
}

/// The per-item compile check, scoped to the item's files.
struct CompileFiles<'a> {
    runner: &'a dyn CommandRunner,
    template: &'a str,
}

#[async_trait]
impl Validate<[Artifact]> for CompileFiles<'_> {
    async fn validate(&self, files: &[Artifact]) -> CommandOutcome {
        self.runner.run(&render_files_command(self.template, files)).await
    }
}

/// Repair by asking the synthesis service to fix the files on disk.
struct SynthesisRepair<'a> {
    synth: &'a dyn SynthesisService,
    destination: &'a Path,
}

#[async_trait]
impl Repair<[Artifact]> for SynthesisRepair<'_> {
    async fn repair(&self, files: &[Artifact], diagnostics: &str) -> Result<()> {
        let current = read_artifacts(self.destination, files);
        let fixed = self
            .synth
            .synthesize(&SynthesisRequest::Fix {
                files: current,
                diagnostics: diagnostics.to_string(),
            })
            .await?;
        write_artifacts(self.destination, &fixed)?;
        Ok(())
    }
}

/// Copy every file under `template` into `destination`, keeping relative paths.
fn copy_template(template: &Path, destination: &Path) -> Result<usize> {
    let mut copied = 0;
    for entry in WalkDir::new(template) {
        let entry = entry
            .with_context(|| format!("Failed to read template {}", template.display()))?;
        let relative = entry
            .path()
            .strip_prefix(template)
            .context("Template entry outside template directory")?;
        if relative.components().any(|c| c.as_os_str() == "node_modules") {
            continue;
        }
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
        } else {
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
            copied += 1;
        }
    }
    Ok(copied)
}
