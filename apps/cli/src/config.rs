//! CLI configuration loading and merging.

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Picked up from the working directory when present.
pub const LOCAL_CONFIG_FILE: &str = "tinytune.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub runtime: RuntimeSection,
    pub worker: WorkerSection,
    pub export: ExportSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    pub intra_op_threads: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    pub command: String,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self { command: tinytune_training::WorkerCommand::default().to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExportSection {
    pub python: String,
    pub llama_cpp_dir: PathBuf,
}

impl Default for ExportSection {
    fn default() -> Self {
        let tools = tinytune_export::ExportTools::default();
        Self { python: tools.python, llama_cpp_dir: tools.llama_cpp_dir }
    }
}

impl AppConfig {
    /// Load and merge configuration.
    ///
    /// Precedence (highest first):
    /// 1. CLI arguments (applied by the commands)
    /// 2. `TINYTUNE_*` environment variables, `__` between section and key
    /// 3. `--config <file>`, or `./tinytune.toml` when no file is given
    /// 4. Built-in defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::from_str(include_str!("../config/default.toml"), FileFormat::Toml));

        builder = match explicit {
            Some(path) => builder.add_source(File::from(path).format(FileFormat::Toml).required(true)),
            None => builder.add_source(File::from(Path::new(LOCAL_CONFIG_FILE)).format(FileFormat::Toml).required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix("TINYTUNE").prefix_separator("_").separator("__").try_parsing(true),
        );

        let config = builder.build().context("failed to load configuration")?;
        config.try_deserialize().context("invalid configuration")
    }
}
