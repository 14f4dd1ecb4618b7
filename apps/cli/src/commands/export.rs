//! GGUF export command implementation.

use super::ExportArgs;
use crate::config::AppConfig;
use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::json;
use tinytune_export::{ExportPipeline, ExportRequest, ExportTools, QuantizationLevel};

pub async fn execute(args: ExportArgs, config: &AppConfig) -> Result<()> {
    let level: QuantizationLevel = args.quantization.parse()?;
    let tools = ExportTools::new(
        args.python.unwrap_or_else(|| config.export.python.clone()),
        args.llama_cpp_dir.unwrap_or_else(|| config.export.llama_cpp_dir.clone()),
    );

    let request = ExportRequest { model_dir: args.model_dir, output_file: args.output_file, level };
    let mut pipeline = ExportPipeline::new(tools);
    let artifact = pipeline
        .run(&request)
        .await
        .with_context(|| format!("GGUF export to {} did not complete", request.output_file.display()))?;

    if args.json {
        let out = json!({
            "artifact": artifact,
            "states": pipeline.history(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("{}", "GGUF export complete".bold().green());
    println!("  File: {}", artifact.path().display().to_string().cyan());
    println!("  Size: {:.2} MB", artifact.size_bytes as f64 / (1024.0 * 1024.0));
    if artifact.is_quantized() {
        println!("  Quantization: {}", artifact.quantization_level);
    } else {
        println!("  Quantization: {}", "skipped (F16)".yellow());
        println!("  {}", "Build llama.cpp's quantize tool to produce smaller files.".dimmed());
    }
    println!();
    Ok(())
}
