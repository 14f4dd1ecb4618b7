use crate::pipeline::ExportState;
use std::path::PathBuf;
use thiserror::Error;

pub type ExportResult<T> = std::result::Result<T, ExportError>;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("model directory not found: {0}")]
    ModelDirMissing(PathBuf),

    #[error("conversion script not found: {0}")]
    ConverterMissing(PathBuf),

    #[error("unknown quantization level `{0}` (expected Q4_K_M, Q5_K_M or Q8_0)")]
    InvalidLevel(String),

    #[error("failed to start {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage} failed ({status}): {stderr}")]
    ToolFailed { stage: &'static str, status: String, stderr: String },

    #[error("expected output file is missing: {0}")]
    OutputMissing(PathBuf),

    #[error("export pipeline already ran (state: {0})")]
    AlreadyRun(ExportState),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
