//! tinytune CLI - low-memory LoRA fine-tuning and GGUF export
//!
//! This CLI provides a `tinytune` command that trains an adapter on a local
//! dataset, merges it, and exports the merged model to GGUF.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use commands::{ExportArgs, InspectArgs, TrainArgs, export, inspect, train};
use std::path::PathBuf;
use std::process::ExitCode;
use tinytune_training::TrainingError;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::ChronoLocal;

/// tinytune - fine-tune small language models on machines with little RAM
#[derive(Parser, Debug)]
#[command(
    name = "tinytune",
    author,
    version,
    about = "tinytune - low-memory LoRA fine-tuning and GGUF export",
    long_about = "tinytune trains LoRA adapters for small causal language models on CPU-only machines,\nmerges them into the base model and exports the result as a (quantized) GGUF file."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Configuration file (defaults to ./tinytune.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fine-tune a LoRA adapter on a dataset
    ///
    /// Ingests the dataset, trains the adapter through the model worker, then
    /// writes the adapter, the merged model and a manifest to the output directory.
    Train(TrainArgs),

    /// Convert a merged model directory to GGUF
    ///
    /// Runs the llama.cpp F16 conversion, then quantizes when a quantizer binary
    /// is available. Without one the F16 file is kept as the result.
    Export(ExportArgs),

    /// Validate a dataset file and count its rows
    Inspect(InspectArgs),
}

impl Command {
    const fn stage(&self) -> &'static str {
        match self {
            Self::Train(_) => "training",
            Self::Export(_) => "export",
            Self::Inspect(_) => "dataset inspection",
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let stage = args.command.stage();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{stage} failed: {e:#}");
            if let Some(hint) = failure_hint(&e) {
                info!("{hint}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = config::AppConfig::load(args.config.as_deref())?;

    match args.command {
        Command::Train(cmd) => train::execute(cmd, &config).await,
        Command::Export(cmd) => export::execute(cmd, &config).await,
        Command::Inspect(cmd) => inspect::execute(&cmd),
    }
}

/// Next step for the operator, when the cause is something they can fix.
fn failure_hint(err: &anyhow::Error) -> Option<&'static str> {
    let cause = err.chain().find_map(|cause| cause.downcast_ref::<TrainingError>())?;
    match cause {
        TrainingError::OutOfMemory(_) => Some("lower --batch-size or --max-length and retry"),
        e if e.is_input_error() => Some("the job input is invalid; fix the dataset or arguments before retrying"),
        _ => None,
    }
}
