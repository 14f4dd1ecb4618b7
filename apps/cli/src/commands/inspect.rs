//! Dataset inspection command implementation.

use super::{InspectArgs, resolve_format};
use anyhow::{Context, Result};
use colored::Colorize;
use tinytune_training::inspect_dataset;

pub fn execute(args: &InspectArgs) -> Result<()> {
    let format = resolve_format(&args.dataset, args.format.as_deref())?;
    let summary = inspect_dataset(&args.dataset, format)
        .with_context(|| format!("cannot use {} as a dataset", args.dataset.display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!();
    println!("{}", "Dataset".bold().cyan());
    println!("  Path: {}", summary.path.display());
    println!("  Format: {}", summary.format);
    println!("  Size: {} bytes", summary.size_bytes);
    println!("  Rows: {}", summary.rows);
    println!();
    Ok(())
}
