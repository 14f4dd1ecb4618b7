use crate::error::{ExportError, ExportResult};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

pub const CONVERTER_SCRIPT: &str = "convert_hf_to_gguf.py";

/// Quantizer locations searched in order, relative to the llama.cpp directory.
pub const QUANTIZER_CANDIDATES: &[&str] = &[
    "quantize",
    "quantize.exe",
    "llama-quantize",
    "llama-quantize.exe",
    "build/bin/Release/llama-quantize.exe",
    "build/bin/Release/quantize.exe",
    "build/bin/llama-quantize",
];

/// Keep at most this much of a failing tool's stderr in the error.
const STDERR_TAIL_BYTES: usize = 4096;

/// External llama.cpp tooling used by the export pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTools {
    pub python: String,
    pub llama_cpp_dir: PathBuf,
}

impl Default for ExportTools {
    fn default() -> Self {
        Self { python: "python3".to_string(), llama_cpp_dir: PathBuf::from("llama.cpp") }
    }
}

impl ExportTools {
    #[must_use]
    pub fn new(python: impl Into<String>, llama_cpp_dir: impl Into<PathBuf>) -> Self {
        Self { python: python.into(), llama_cpp_dir: llama_cpp_dir.into() }
    }

    #[must_use]
    pub fn converter_script(&self) -> PathBuf {
        self.llama_cpp_dir.join(CONVERTER_SCRIPT)
    }

    /// First existing quantizer candidate, if any.
    #[must_use]
    pub fn find_quantizer(&self) -> Option<PathBuf> {
        QUANTIZER_CANDIDATES
            .iter()
            .map(|candidate| self.llama_cpp_dir.join(candidate))
            .find(|path| path.is_file())
    }
}

/// Run a tool to completion, logging each stdout line.
///
/// A non-zero exit becomes [`ExportError::ToolFailed`] carrying the tail of
/// the tool's stderr.
pub async fn run_tool<I, S>(stage: &'static str, program: impl AsRef<OsStr>, args: I) -> ExportResult<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let program = program.as_ref();
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);
    debug!(stage, command = ?cmd.as_std(), "running export tool");

    let mut child = cmd.spawn().map_err(|source| ExportError::Spawn {
        tool: Path::new(program).display().to_string(),
        source,
    })?;

    let stderr_task = child.stderr.take().map(|mut stderr| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        })
    });

    if let Some(stdout) = child.stdout.take() {
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            if !line.trim().is_empty() {
                info!(stage, "{line}");
            }
        }
    }

    let status = child.wait().await?;
    let stderr = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => Vec::new(),
    };

    if status.success() {
        return Ok(());
    }
    let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    Err(ExportError::ToolFailed {
        stage,
        status: status.to_string(),
        stderr: String::from_utf8_lossy(&stderr[start..]).trim().to_string(),
    })
}
