use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

use apigen::config::Config;
use apigen::pipeline::GenerateOptions;

mod cmd;

#[derive(Parser)]
#[command(name = "apigen")]
#[command(version, about = "Resumable API test framework generator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Answer yes to resume and reset prompts
    #[arg(long, global = true)]
    pub yes: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Path to apigen.toml. Defaults to <project-dir>/apigen.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a test framework from an API definition, resuming if possible
    Run {
        /// OpenAPI definition or Postman collection, as a file or http(s) URL;
        /// optional when resuming
        api_definition: Option<String>,

        /// Where the framework is generated; also names the checkpoint namespace
        #[arg(long, default_value = "generated")]
        destination_folder: PathBuf,

        /// Only process these paths or base resources (e.g. /pets)
        #[arg(long, num_args = 1..)]
        endpoints: Vec<String>,

        /// What to generate. Overrides apigen.toml
        #[arg(long, value_enum)]
        generate: Option<GenerateOptions>,

        /// Skip copying the template; the destination already has one
        #[arg(long)]
        use_existing_framework: bool,

        /// Repair attempts for a failing compile check. Overrides apigen.toml
        #[arg(long)]
        max_fix_attempts: Option<u32>,
    },
    /// Show saved progress in the checkpoint store
    Status,
    /// Discard all saved progress
    Reset {
        #[arg(long)]
        force: bool,
    },
    /// List the paths of an API definition
    Endpoints { api_definition: String },
}

/// Stderr gets warnings (everything with `--verbose`); the log file gets the
/// `RUST_LOG` filter, `apigen=info` by default.
fn init_tracing(verbose: bool, log_dir: &Path) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "apigen=debug" } else { "apigen=info" })
    });
    let stderr_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };

    let (file_layer, guard) = match std::fs::create_dir_all(log_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::never(log_dir, "apigen.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(stderr_level),
        )
        .with(file_layer)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let max_fix_attempts = match &cli.command {
        Commands::Run {
            max_fix_attempts, ..
        } => *max_fix_attempts,
        _ => None,
    };
    let config = Config::load(project_dir, cli.config.as_deref())?.with_cli_args(
        cli.verbose,
        cli.yes,
        max_fix_attempts,
    );
    let _log_guard = init_tracing(cli.verbose, &config.log_dir());

    match cli.command {
        Commands::Run {
            api_definition,
            destination_folder,
            endpoints,
            generate,
            use_existing_framework,
            max_fix_attempts: _,
        } => {
            let request = cmd::RunRequest {
                api_definition,
                destination_folder,
                endpoints,
                generate,
                use_existing_framework,
            };
            cmd::cmd_run(&config, request).await?;
        }
        Commands::Status => cmd::cmd_status(&config)?,
        Commands::Reset { force } => cmd::cmd_reset(&config, force)?,
        Commands::Endpoints { api_definition } => cmd::cmd_endpoints(&api_definition).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use apigen::checkpoint::INTERRUPT_EXIT_CODE;

    #[test]
    fn test_cli_parses_run_options() {
        let cli = Cli::try_parse_from([
            "apigen",
            "run",
            "api.yaml",
            "--destination-folder",
            "out",
            "--endpoints",
            "/pets",
            "/store",
            "--generate",
            "models_and_first_test",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                api_definition,
                destination_folder,
                endpoints,
                generate,
                ..
            } => {
                assert_eq!(api_definition.as_deref(), Some("api.yaml"));
                assert_eq!(destination_folder, PathBuf::from("out"));
                assert_eq!(endpoints, vec!["/pets", "/store"]);
                assert_eq!(generate, Some(GenerateOptions::ModelsAndFirstTest));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_interrupt_exit_code_is_sigint_convention() {
        assert_eq!(INTERRUPT_EXIT_CODE, 128 + 2);
    }
}
