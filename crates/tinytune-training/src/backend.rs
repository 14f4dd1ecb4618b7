//! Boundary between the job pipeline and the numerical training primitives.
//!
//! The pipeline never touches tensors. It drives a [`CausalModel`] obtained
//! from a [`ModelBackend`] and only sees names, ids, losses and directories.

use crate::adaptation::AdaptationConfig;
use crate::batch::Batch;
use crate::error::TrainingResult;
use crate::runtime::{OptimizerConfig, RuntimeConfig};
use crate::tokenize::TextTokenizer;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Activation checkpointing variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointMode {
    NonReentrant,
    Reentrant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterSummary {
    pub trainable_params: u64,
    pub total_params: u64,
}

impl AdapterSummary {
    #[must_use]
    pub fn trainable_percent(&self) -> f64 {
        if self.total_params == 0 {
            return 0.0;
        }
        100.0 * self.trainable_params as f64 / self.total_params as f64
    }
}

#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn id(&self) -> &'static str;

    /// Load the pretrained model and its tokenizer. An `OutOfMemory` error is
    /// reported as such so the caller can suggest a smaller batch.
    async fn load(&self, model_id: &str, runtime: &RuntimeConfig) -> TrainingResult<Box<dyn CausalModel>>;
}

/// A loaded causal language model owned by exactly one job.
#[async_trait]
pub trait CausalModel: Send {
    /// Fully qualified names of the model's substructures.
    fn module_names(&self) -> &[String];

    fn tokenizer(&self) -> Arc<dyn TextTokenizer>;

    async fn apply_adaptation(&mut self, config: &AdaptationConfig) -> TrainingResult<AdapterSummary>;

    /// May fail with `Unsupported`.
    async fn enable_checkpointing(&mut self, mode: CheckpointMode) -> TrainingResult<()>;

    async fn configure_optimizer(&mut self, config: &OptimizerConfig) -> TrainingResult<()>;

    /// Accumulate gradients for one micro-batch; the loss is multiplied by
    /// `loss_scale` before backward. Returns the unscaled loss.
    async fn forward_backward(&mut self, batch: &Batch, loss_scale: f64) -> TrainingResult<f64>;

    /// Apply accumulated gradients and reset them.
    async fn optimizer_step(&mut self) -> TrainingResult<()>;

    async fn save_adapter(&mut self, dir: &Path) -> TrainingResult<()>;

    /// Fold the adapter into the base weights and save model plus tokenizer.
    async fn merge_and_save(&mut self, dir: &Path) -> TrainingResult<()>;

    async fn shutdown(&mut self) -> TrainingResult<()> {
        Ok(())
    }
}
