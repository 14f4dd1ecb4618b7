//! Training command implementation.

use super::{TrainArgs, resolve_format};
use crate::config::AppConfig;
use anyhow::{Context, Result};
use colored::Colorize;
use tinytune_training::{
    DatasetSpec, LoraTrainer, RuntimeConfig, StdoutProgressSink, Trainer, TrainingHyperParams, TrainingJobId,
    TrainingJobSpec, WorkerBackend, WorkerCommand,
};
use tracing::{info, warn};

pub async fn execute(args: TrainArgs, config: &AppConfig) -> Result<()> {
    let format = resolve_format(&args.dataset, args.format.as_deref())?;
    let dataset = DatasetSpec::new(&args.dataset, Some(format), args.stream)?;

    let job_id = args.job_id.as_deref().map_or_else(TrainingJobId::new, TrainingJobId::from);
    let hyperparams = TrainingHyperParams {
        learning_rate: args.learning_rate,
        epochs: args.epochs,
        batch_size: args.batch_size,
        grad_accum: args.grad_accum,
        max_length: args.max_length,
        lora_rank: args.lora_rank,
        lora_alpha: args.lora_alpha,
        logging_steps: args.logging_steps,
        ..TrainingHyperParams::default()
    };
    let job = TrainingJobSpec::new(job_id, &args.base_model, dataset, &args.output_dir).with_hyperparams(hyperparams);

    let worker_command = args.worker.as_deref().unwrap_or(&config.worker.command);
    let command = WorkerCommand::parse(worker_command).context("invalid worker command")?;
    let runtime = RuntimeConfig::from_env(config.runtime.intra_op_threads);
    info!(worker = %command, "using model worker");

    let trainer = LoraTrainer::new(WorkerBackend::new(command), runtime);
    let outcome = trainer
        .run(&job, &StdoutProgressSink)
        .await
        .with_context(|| format!("training job {} did not complete", job.job_id))?;

    let metrics = &outcome.manifest.metrics;
    println!();
    println!("{}", "Training complete".bold().green());
    println!("  Job: {}", job.job_id.to_string().cyan());
    println!("  Steps: {}/{}", metrics.steps, metrics.total_steps);
    if let Some(loss) = metrics.final_loss {
        println!("  Final loss: {loss:.4}");
    }
    println!("  Adapter: {}", outcome.adapter_dir.display());
    match &outcome.merged_dir {
        Some(dir) => println!("  Merged model: {}", dir.display()),
        None => {
            warn!("merged model was not written; export needs a merged model directory");
            println!("  Merged model: {}", "not available".yellow());
        }
    }
    println!();
    Ok(())
}
