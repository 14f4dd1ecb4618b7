use crate::dataset::{DatasetFormat, DatasetHandle, IngestMode, TrainingRecord};
use crate::error::{TrainingError, TrainingResult};
use crate::ingest::{open_dataset, IngestOptions, DEFAULT_CHUNK_SIZE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Identifier for a training job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrainingJobId(pub String);

impl TrainingJobId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for TrainingJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for TrainingJobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for TrainingJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Where the training data lives and how it is brought into memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSpec {
    pub path: PathBuf,
    pub format: DatasetFormat,
    pub mode: IngestMode,
    pub chunk_size: usize,
}

impl DatasetSpec {
    /// The format is inferred from the file extension when not given.
    pub fn new(path: impl Into<PathBuf>, format: Option<DatasetFormat>, stream: bool) -> TrainingResult<Self> {
        let path = path.into();
        let format = match format {
            Some(format) => format,
            None => DatasetFormat::from_path(&path)?,
        };
        Ok(Self { path, format, mode: IngestMode::from_stream_flag(stream), chunk_size: DEFAULT_CHUNK_SIZE })
    }

    /// Open (or re-open) the source in this spec's mode.
    pub fn open(&self) -> TrainingResult<DatasetHandle<TrainingRecord>> {
        open_dataset(&self.path, self.format, self.mode, &IngestOptions { chunk_size: self.chunk_size })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingJobSpec {
    pub job_id: TrainingJobId,
    pub created_at: DateTime<Utc>,
    /// Model identifier understood by the backend (hub id or local directory).
    pub base_model: String,
    pub dataset: DatasetSpec,
    pub output_dir: PathBuf,
    pub hyperparams: TrainingHyperParams,
}

impl TrainingJobSpec {
    #[must_use]
    pub fn new(
        job_id: TrainingJobId,
        base_model: impl Into<String>,
        dataset: DatasetSpec,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            job_id,
            created_at: Utc::now(),
            base_model: base_model.into(),
            dataset,
            output_dir: output_dir.into(),
            hyperparams: TrainingHyperParams::default(),
        }
    }

    #[must_use]
    pub fn with_hyperparams(mut self, hyperparams: TrainingHyperParams) -> Self {
        self.hyperparams = hyperparams;
        self
    }

    pub fn validate(&self) -> TrainingResult<()> {
        if self.job_id.0.trim().is_empty() {
            return Err(TrainingError::InvalidSpec("job_id is required".to_string()));
        }
        if self.base_model.trim().is_empty() {
            return Err(TrainingError::InvalidSpec("base_model is required".to_string()));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(TrainingError::InvalidSpec("output_dir is required".to_string()));
        }
        if self.dataset.chunk_size == 0 {
            return Err(TrainingError::InvalidSpec("chunk_size must be >= 1".to_string()));
        }
        self.hyperparams.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingHyperParams {
    pub learning_rate: f64,
    pub epochs: u32,
    pub batch_size: u32,
    pub grad_accum: u32,
    pub max_length: u32,
    pub lora_rank: u32,
    pub lora_alpha: u32,
    pub lora_dropout: f64,
    /// Optimizer steps between progress events.
    pub logging_steps: u64,
}

impl Default for TrainingHyperParams {
    fn default() -> Self {
        Self {
            learning_rate: 1e-4,
            epochs: 3,
            batch_size: 1,
            grad_accum: 8,
            max_length: 128,
            lora_rank: 16,
            lora_alpha: 32,
            lora_dropout: crate::adaptation::DEFAULT_LORA_DROPOUT,
            logging_steps: 10,
        }
    }
}

impl TrainingHyperParams {
    pub fn validate(&self) -> TrainingResult<()> {
        if self.epochs == 0 {
            return Err(TrainingError::InvalidSpec("epochs must be >= 1".to_string()));
        }
        if !(self.learning_rate.is_finite()) || self.learning_rate <= 0.0 {
            return Err(TrainingError::InvalidSpec("learning_rate must be > 0".to_string()));
        }
        if self.batch_size == 0 {
            return Err(TrainingError::InvalidSpec("batch_size must be >= 1".to_string()));
        }
        if self.grad_accum == 0 {
            return Err(TrainingError::InvalidSpec("grad_accum must be >= 1".to_string()));
        }
        if self.max_length == 0 {
            return Err(TrainingError::InvalidSpec("max_length must be >= 1".to_string()));
        }
        if self.lora_rank == 0 || self.lora_alpha == 0 {
            return Err(TrainingError::InvalidSpec("lora_rank and lora_alpha must be >= 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.lora_dropout) {
            return Err(TrainingError::InvalidSpec("lora_dropout must be in [0, 1]".to_string()));
        }
        if self.logging_steps == 0 {
            return Err(TrainingError::InvalidSpec("logging_steps must be >= 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> DatasetSpec {
        DatasetSpec::new("data/train.jsonl", None, false).unwrap()
    }

    #[test]
    fn test_dataset_spec_infers_format() {
        let spec = DatasetSpec::new("notes.txt", None, true).unwrap();
        assert_eq!(spec.format, DatasetFormat::FreeText);
        assert_eq!(spec.mode, IngestMode::Streaming);
        assert_eq!(spec.chunk_size, DEFAULT_CHUNK_SIZE);

        let explicit = DatasetSpec::new("notes.dat", Some(DatasetFormat::Tabular), false).unwrap();
        assert_eq!(explicit.format, DatasetFormat::Tabular);

        assert!(matches!(
            DatasetSpec::new("notes.parquet", None, false),
            Err(TrainingError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_job_spec_validate_requires_fields() {
        let spec = TrainingJobSpec::new(TrainingJobId::from("job-1"), "", dataset(), "out");
        assert!(spec.validate().is_err());

        let spec = TrainingJobSpec::new(TrainingJobId::from("job-1"), "gpt2", dataset(), "out");
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_hyperparams_defaults_and_validation() {
        let params = TrainingHyperParams::default();
        assert!((params.learning_rate - 1e-4).abs() < f64::EPSILON);
        assert_eq!((params.epochs, params.batch_size, params.grad_accum), (3, 1, 8));
        assert_eq!((params.max_length, params.lora_rank, params.lora_alpha), (128, 16, 32));
        assert_eq!(params.logging_steps, 10);

        let bad = TrainingHyperParams { grad_accum: 0, ..TrainingHyperParams::default() };
        assert!(bad.validate().is_err());
        let bad = TrainingHyperParams { learning_rate: f64::NAN, ..TrainingHyperParams::default() };
        assert!(bad.validate().is_err());
    }
}
