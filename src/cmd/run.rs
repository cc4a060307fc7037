//! `apigen run`: start or resume a generation run.

use anyhow::{Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use apigen::checkpoint::{CheckpointStore, DEFAULT_NAMESPACE, InterruptGuard};
use apigen::config::Config;
use apigen::errors::PipelineError;
use apigen::pipeline::state::RUN_ARGS_TAG;
use apigen::pipeline::{GenerateOptions, Generator, GeneratorSettings, RunArgs};
use apigen::quality::ShellRunner;
use apigen::synth::CommandSynthesizer;
use apigen::ui::GeneratorUI;
use fs2::FileExt;
use tracing::{info, warn};

/// Arguments given on the command line for a fresh run.
pub struct RunRequest {
    pub api_definition: Option<String>,
    pub destination_folder: PathBuf,
    pub endpoints: Vec<String>,
    pub generate: Option<GenerateOptions>,
    pub use_existing_framework: bool,
}

/// Exclusive lock on `.apigen/run.lock`, held for the whole run.
struct RunLock {
    file: File,
}

impl RunLock {
    fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = File::create(path)
            .with_context(|| format!("Failed to open lock file {}", path.display()))?;
        file.try_lock_exclusive()
            .map_err(|_| PipelineError::RunInProgress(path.to_path_buf()))?;
        Ok(Self { file })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

pub async fn cmd_run(config: &Config, request: RunRequest) -> Result<()> {
    use dialoguer::Confirm;

    for warning in config.validate() {
        warn!("{}", warning);
        eprintln!("Warning: {}", warning);
    }

    let _lock = RunLock::acquire(&config.lock_file())?;
    let store = CheckpointStore::new(config.checkpoint_dir());

    // Offer to resume the last run recorded in the store
    let last = store.get_last_namespace()?;
    let mut resumed_args = None;
    if last != DEFAULT_NAMESPACE && store.exists() {
        // Only an explicit "no" discards progress
        let resume = config.yes
            || match Confirm::new()
                .with_prompt(format!("Resume the previous run for '{}'?", last))
                .default(true)
                .interact()
            {
                Ok(answer) => answer,
                Err(e) => anyhow::bail!(
                    "No terminal to confirm resuming '{}' ({}); pass --yes to resume or run `apigen reset` to start over",
                    last,
                    e
                ),
            };

        if resume {
            resumed_args = store.get::<RunArgs>(&last, RUN_ARGS_TAG)?;
            if resumed_args.is_none() {
                warn!(namespace = %last, "No saved run arguments, using command line");
            }
        } else {
            info!(namespace = %last, "Discarding previous progress");
            store.clear()?;
        }
    }

    let resuming = resumed_args.is_some();
    let args = match resumed_args {
        Some(args) => args,
        None => RunArgs {
            api_definition: request
                .api_definition
                .context("An API definition file is required to start a new run")?,
            destination: request.destination_folder,
            endpoints: request.endpoints,
            generate: request.generate.unwrap_or(config.toml.generation.generate),
            use_existing_framework: request.use_existing_framework,
        },
    };

    let namespace = args.namespace();
    store.set_last_namespace(&namespace)?;
    store.put(&namespace, RUN_ARGS_TAG, &args)?;

    let synth = CommandSynthesizer::new(
        &config.toml.synthesis.cmd,
        config.toml.synthesis.args.clone(),
        config.toml.synthesis.timeout_secs,
        args.destination.clone(),
    )
    .with_log_dir(config.synthesis_log_dir())
    .with_prompts_dir(config.prompts_dir());
    let runner = ShellRunner::new(&args.destination, config.toml.commands.timeout_secs);
    let settings = GeneratorSettings {
        max_fix_attempts: config.max_fix_attempts(),
        template_dir: config.template_dir(),
        commands: config.toml.commands.clone(),
    };

    let ui = Arc::new(GeneratorUI::new(config.verbose));
    ui.print_header(&args.api_definition, &args.destination, &namespace);

    let generator = Generator::new(store, args, settings, Arc::new(synth), Arc::new(runner))
        .with_ui(ui.clone());
    if resuming && let Some(snapshot) = generator.restore_state()? {
        ui.show_resumed(&snapshot);
    }

    let _guard = InterruptGuard::install(generator.state_saver());
    match generator.run().await {
        Ok(summary) => {
            if !summary.final_checks.passed() {
                let failed = if summary.final_checks.compile.success {
                    summary.final_checks.tests.as_ref()
                } else {
                    Some(&summary.final_checks.compile)
                };
                if let Some(outcome) = failed {
                    ui.show_warning("Final checks failed:");
                    eprintln!("{}", outcome.output);
                }
            }
            Ok(())
        }
        Err(e) => {
            ui.run_failed(&format!("{:#}", e));
            Err(e)
        }
    }
}
