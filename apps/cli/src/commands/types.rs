//! Command type definitions shared between main.rs and the command modules.

use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug, Clone)]
pub struct TrainArgs {
    /// Job identifier recorded in the manifest (generated when omitted)
    #[arg(long)]
    pub job_id: Option<String>,

    /// Dataset file (.jsonl, .csv or .txt)
    #[arg(long)]
    pub dataset: PathBuf,

    /// Base model id or local model directory, as understood by the worker
    #[arg(long)]
    pub base_model: String,

    /// Directory receiving the adapter, merged model and manifest
    #[arg(long)]
    pub output_dir: PathBuf,

    /// Dataset format (record-json, tabular, free-text); inferred from the extension by default
    #[arg(long)]
    pub format: Option<String>,

    #[arg(long, default_value_t = 1e-4)]
    pub learning_rate: f64,

    #[arg(long, default_value_t = 3)]
    pub epochs: u32,

    #[arg(long, default_value_t = 1)]
    pub batch_size: u32,

    /// Gradient accumulation steps
    #[arg(long, default_value_t = 8)]
    pub grad_accum: u32,

    /// Token length every record is padded or truncated to
    #[arg(long, default_value_t = 128)]
    pub max_length: u32,

    /// Read the dataset lazily instead of loading it into memory
    #[arg(long)]
    pub stream: bool,

    #[arg(long, default_value_t = 16)]
    pub lora_rank: u32,

    #[arg(long, default_value_t = 32)]
    pub lora_alpha: u32,

    /// Optimizer steps between progress lines
    #[arg(long, default_value_t = 10)]
    pub logging_steps: u64,

    /// Worker command line speaking the JSON-lines model protocol (overrides worker.command)
    #[arg(long)]
    pub worker: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    /// Merged model directory produced by `tinytune train`
    #[arg(long)]
    pub model_dir: PathBuf,

    /// Target .gguf file
    #[arg(long)]
    pub output_file: PathBuf,

    /// Quantization level (Q4_K_M, Q5_K_M, Q8_0)
    #[arg(long, default_value = "Q4_K_M")]
    pub quantization: String,

    /// llama.cpp checkout (overrides export.llama_cpp_dir)
    #[arg(long)]
    pub llama_cpp_dir: Option<PathBuf>,

    /// Python interpreter for the conversion script (overrides export.python)
    #[arg(long)]
    pub python: Option<String>,

    /// Output result as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct InspectArgs {
    /// Dataset file to validate
    #[arg(long)]
    pub dataset: PathBuf,

    /// Dataset format; inferred from the extension by default
    #[arg(long)]
    pub format: Option<String>,

    /// Output summary as JSON
    #[arg(long)]
    pub json: bool,
}
