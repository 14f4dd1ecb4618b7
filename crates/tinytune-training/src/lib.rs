//! tinytune training
//!
//! Low-memory LoRA fine-tuning pipeline:
//! - Ingesting raw datasets as materialized or streaming record sequences
//! - Tokenizing records to fixed-length id/mask pairs
//! - Selecting adapter targets and estimating the step budget
//! - Driving the training loop against a model backend (`Trainer`)
//! - Writing adapter artifacts + manifests

pub mod adaptation;
pub mod artifacts;
pub mod backend;
pub mod batch;
pub mod dataset;
pub mod error;
pub mod ingest;
pub mod inspect;
pub mod job;
pub mod layout;
pub mod metrics;
pub mod progress;
pub mod runtime;
pub mod steps;
pub mod tokenize;
pub mod trainer;
pub mod worker;

pub use adaptation::{AdaptationConfig, BiasMode, TargetRule, TargetSelector, TaskKind};
pub use artifacts::{ArtifactKind, TrainingArtifact, TrainingManifest, TrainingMetrics};
pub use backend::{AdapterSummary, CausalModel, CheckpointMode, ModelBackend};
pub use batch::{Batch, IGNORE_INDEX};
pub use dataset::{DatasetFormat, DatasetHandle, IngestMode, LengthHint, TrainingRecord};
pub use error::{TrainingError, TrainingResult};
pub use ingest::{open_dataset, IngestOptions, DEFAULT_CHUNK_SIZE};
pub use inspect::{inspect_dataset, DatasetSummary};
pub use job::{DatasetSpec, TrainingHyperParams, TrainingJobId, TrainingJobSpec};
pub use layout::TrainingLayout;
pub use metrics::{parse_metrics_line, ParsedMetrics};
pub use progress::{
    calculate_eta, format_log_line, Eta, LogLineSink, ProgressEvent, ProgressSink, StdoutProgressSink,
    TrainingProgressEvent,
};
pub use runtime::{OptimizerConfig, OptimizerKind, Precision, RuntimeConfig};
pub use steps::{estimate_max_steps, exact_total_steps, StepEstimate};
pub use tokenize::{HfTokenizer, TextTokenizer, TokenizeAdapter, TokenizedRecord};
pub use trainer::{LoraTrainer, Trainer, TrainerStatus, TrainingOutcome};
pub use worker::{WorkerBackend, WorkerCommand};
