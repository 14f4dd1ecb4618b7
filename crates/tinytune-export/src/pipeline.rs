use crate::error::{ExportError, ExportResult};
use crate::quantization::QuantizationLevel;
use crate::tools::{run_tool, ExportTools};
use serde::{Deserialize, Serialize};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExportState {
    NotStarted,
    ConvertingF16,
    Quantizing,
    Skipped,
    Completed,
    Failed,
}

impl ExportState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for ExportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not started",
            Self::ConvertingF16 => "converting to F16",
            Self::Quantizing => "quantizing",
            Self::Skipped => "quantization skipped",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub model_dir: PathBuf,
    pub output_file: PathBuf,
    pub level: QuantizationLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportArtifact {
    /// Where the F16 file was written. When quantization was skipped this is
    /// the final output path; otherwise the intermediate, already deleted.
    pub f16_path: PathBuf,
    pub quantized_path: Option<PathBuf>,
    pub quantization_level: QuantizationLevel,
    pub size_bytes: u64,
}

impl ExportArtifact {
    /// The deliverable file.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.quantized_path.as_deref().unwrap_or(&self.f16_path)
    }

    #[must_use]
    pub fn is_quantized(&self) -> bool {
        self.quantized_path.is_some()
    }
}

/// `out/model.gguf` -> `out/model_f16_temp.gguf`.
#[must_use]
pub fn f16_temp_path(output: &Path) -> PathBuf {
    let stem = output.file_stem().map(OsString::from).unwrap_or_default();
    let mut name = stem;
    name.push("_f16_temp");
    if let Some(ext) = output.extension() {
        name.push(".");
        name.push(ext);
    }
    output.with_file_name(name)
}

/// Two-phase GGUF export: F16 conversion, then optional quantization.
///
/// One pipeline handles one export; it keeps the full state history so the
/// caller can report how far it got.
#[derive(Debug)]
pub struct ExportPipeline {
    tools: ExportTools,
    history: Vec<ExportState>,
}

impl ExportPipeline {
    #[must_use]
    pub fn new(tools: ExportTools) -> Self {
        Self { tools, history: vec![ExportState::NotStarted] }
    }

    #[must_use]
    pub fn state(&self) -> ExportState {
        self.history.last().copied().unwrap_or(ExportState::NotStarted)
    }

    #[must_use]
    pub fn history(&self) -> &[ExportState] {
        &self.history
    }

    fn transition(&mut self, next: ExportState) {
        info!(from = %self.state(), to = %next, "export state");
        self.history.push(next);
    }

    pub async fn run(&mut self, request: &ExportRequest) -> ExportResult<ExportArtifact> {
        if self.state() != ExportState::NotStarted {
            return Err(ExportError::AlreadyRun(self.state()));
        }

        info!(
            model_dir = %request.model_dir.display(),
            output = %request.output_file.display(),
            level = %request.level,
            "starting GGUF export"
        );
        let result = self.execute(request).await;
        if let Err(e) = &result {
            warn!(error = %e, state = %self.state(), "export failed");
            self.transition(ExportState::Failed);
        }
        result
    }

    async fn execute(&mut self, request: &ExportRequest) -> ExportResult<ExportArtifact> {
        if !request.model_dir.is_dir() {
            return Err(ExportError::ModelDirMissing(request.model_dir.clone()));
        }

        self.transition(ExportState::ConvertingF16);
        let temp = f16_temp_path(&request.output_file);
        self.convert_f16(&request.model_dir, &temp).await?;

        let quantized_path = match self.tools.find_quantizer() {
            None => {
                warn!(
                    llama_cpp_dir = %self.tools.llama_cpp_dir.display(),
                    "quantizer binary not found, keeping the F16 GGUF as the final artifact"
                );
                self.transition(ExportState::Skipped);
                if let Err(e) = std::fs::rename(&temp, &request.output_file) {
                    remove_if_exists(&temp);
                    return Err(e.into());
                }
                None
            }
            Some(quantizer) => {
                self.transition(ExportState::Quantizing);
                let result = run_tool(
                    "quantization",
                    &quantizer,
                    [temp.as_os_str(), request.output_file.as_os_str(), OsStr::new(request.level.as_str())],
                )
                .await;
                remove_if_exists(&temp);
                result?;
                Some(request.output_file.clone())
            }
        };

        let size_bytes = match std::fs::metadata(&request.output_file) {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return Err(ExportError::OutputMissing(request.output_file.clone())),
        };
        info!(
            output = %request.output_file.display(),
            "GGUF export complete: {:.2} MB",
            size_bytes as f64 / (1024.0 * 1024.0)
        );
        self.transition(ExportState::Completed);

        let f16_path = if quantized_path.is_some() { temp } else { request.output_file.clone() };
        Ok(ExportArtifact { f16_path, quantized_path, quantization_level: request.level, size_bytes })
    }

    async fn convert_f16(&self, model_dir: &Path, temp: &Path) -> ExportResult<()> {
        let script = self.tools.converter_script();
        if !script.is_file() {
            return Err(ExportError::ConverterMissing(script));
        }
        if let Some(parent) = temp.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let result = run_tool(
            "F16 conversion",
            &self.tools.python,
            [
                script.as_os_str(),
                model_dir.as_os_str(),
                OsStr::new("--outtype"),
                OsStr::new("f16"),
                OsStr::new("--outfile"),
                temp.as_os_str(),
            ],
        )
        .await;
        if let Err(e) = result {
            remove_if_exists(temp);
            return Err(e);
        }
        if !temp.is_file() {
            return Err(ExportError::OutputMissing(temp.to_path_buf()));
        }
        info!(path = %temp.display(), "F16 GGUF created");
        Ok(())
    }
}

fn remove_if_exists(path: &Path) {
    if let Err(e) = std::fs::remove_file(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "could not remove intermediate file");
    }
}
