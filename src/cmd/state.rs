//! Checkpoint inspection and housekeeping: `status`, `reset`, `endpoints`.

use anyhow::Result;

use apigen::checkpoint::{CheckpointStore, DEFAULT_NAMESPACE};
use apigen::config::Config;
use apigen::decompose::{list_paths, load_definition};
use apigen::errors::PipelineError;
use apigen::pipeline::RunArgs;
use apigen::pipeline::state::{RUN_ARGS_TAG, restore_state};

pub fn cmd_status(config: &Config) -> Result<()> {
    let store = CheckpointStore::new(config.checkpoint_dir());

    println!();
    println!("apigen Status");
    println!("=============");
    println!();
    println!("Checkpoints: {}", store.root().display());

    if !store.exists() {
        println!("State:       No saved progress");
        println!();
        return Ok(());
    }

    let last = store.get_last_namespace()?;
    if last != DEFAULT_NAMESPACE {
        println!("Last run:    {}", last);
    }

    for namespace in store.namespaces()? {
        println!();
        println!("[{}]", namespace);

        if let Some(args) = store.get::<RunArgs>(&namespace, RUN_ARGS_TAG).ok().flatten() {
            println!("  Definition: {}", args.api_definition);
            println!("  Generate:   {:?}", args.generate);
            if !args.endpoints.is_empty() {
                println!("  Endpoints:  {}", args.endpoints.join(", "));
            }
        }

        match restore_state(&store, &namespace) {
            Ok(Some(snapshot)) => println!(
                "  State:      {} ({} models, {} tests)",
                snapshot.state, snapshot.models_count, snapshot.tests_count
            ),
            Ok(None) => {}
            Err(e) => println!("  State:      unreadable ({})", e),
        }

        for record in store.records(&namespace)? {
            println!(
                "  {:<24} {}",
                record.tag,
                record.saved_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
    }
    println!();
    Ok(())
}

pub fn cmd_reset(config: &Config, force: bool) -> Result<()> {
    use dialoguer::Confirm;

    let store = CheckpointStore::new(config.checkpoint_dir());
    if !store.exists() {
        println!("Nothing to reset");
        return Ok(());
    }

    if !force && !config.yes {
        let confirm = Confirm::new()
            .with_prompt("This will discard all saved progress. Are you sure?")
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Reset cancelled");
            return Ok(());
        }
    }

    store.clear()?;
    println!("Reset complete");
    Ok(())
}

pub async fn cmd_endpoints(api_definition: &str) -> Result<()> {
    let text = load_definition(api_definition).await?;
    let paths = list_paths(&text).map_err(|message| PipelineError::InvalidDefinition {
        location: api_definition.to_string(),
        message,
    })?;

    for path in paths {
        println!("{}", path);
    }
    Ok(())
}
