//! Command implementations for the tinytune CLI.

pub mod export;
pub mod inspect;
pub mod train;
pub mod types;

pub use types::{ExportArgs, InspectArgs, TrainArgs};

use anyhow::{Context, Result};
use std::path::Path;
use tinytune_training::DatasetFormat;

/// `--format` when given, otherwise inferred from the file extension.
fn resolve_format(path: &Path, format: Option<&str>) -> Result<DatasetFormat> {
    match format {
        Some(name) => name.parse().with_context(|| format!("invalid --format `{name}`")),
        None => DatasetFormat::from_path(path).context("pass --format to override"),
    }
}
