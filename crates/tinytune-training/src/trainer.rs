use crate::adaptation::{AdaptationConfig, TargetSelector};
use crate::artifacts::{make_artifact, ArtifactKind, TrainingManifest, TrainingMetrics};
use crate::backend::{CausalModel, CheckpointMode, ModelBackend};
use crate::batch::Batch;
use crate::dataset::{DatasetHandle, LengthHint, TrainingRecord};
use crate::error::{TrainingError, TrainingResult};
use crate::job::{TrainingJobId, TrainingJobSpec};
use crate::layout::TrainingLayout;
use crate::progress::{calculate_eta, samples_per_second, ProgressEvent, ProgressSink, TrainingProgressEvent};
use crate::runtime::{OptimizerConfig, RuntimeConfig};
use crate::steps::{estimate_max_steps, exact_total_steps, StepEstimate};
use crate::tokenize::{TokenizeAdapter, TokenizedRecord};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainerStatus {
    Idle,
    Preparing,
    Running,
    Finished,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub manifest: TrainingManifest,
    pub adapter_dir: PathBuf,
    /// `None` when merging failed; export will likely fail on the adapter alone.
    pub merged_dir: Option<PathBuf>,
}

#[async_trait]
pub trait Trainer: Send + Sync {
    fn id(&self) -> &'static str;

    async fn prepare(&self, job: &TrainingJobSpec) -> TrainingResult<()>;

    async fn run(&self, job: &TrainingJobSpec, progress: &dyn ProgressSink) -> TrainingResult<TrainingOutcome>;

    async fn status(&self, job_id: &TrainingJobId) -> TrainingResult<TrainerStatus>;
}

/// Parameter-efficient fine-tuning driver over any [`ModelBackend`].
pub struct LoraTrainer<B> {
    backend: B,
    runtime: RuntimeConfig,
    selector: TargetSelector,
    statuses: Arc<Mutex<HashMap<String, TrainerStatus>>>,
}

impl<B: ModelBackend> LoraTrainer<B> {
    #[must_use]
    pub fn new(backend: B, runtime: RuntimeConfig) -> Self {
        Self {
            backend,
            runtime,
            selector: TargetSelector::default(),
            statuses: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn with_selector(mut self, selector: TargetSelector) -> Self {
        self.selector = selector;
        self
    }

    fn set_status(&self, job_id: &TrainingJobId, status: TrainerStatus) {
        if let Ok(mut s) = self.statuses.lock() {
            s.insert(job_id.0.clone(), status);
        }
    }

    async fn execute(&self, job: &TrainingJobSpec, progress: &dyn ProgressSink) -> TrainingResult<TrainingOutcome> {
        let job_id = job.job_id.clone();
        let params = &job.hyperparams;
        let say = |message: String| {
            progress.on_event(ProgressEvent::Message { job_id: job_id.clone(), message });
        };

        progress.on_event(ProgressEvent::Started { job_id: job_id.clone() });
        info!(
            job_id = %job_id,
            base_model = %job.base_model,
            dataset = %job.dataset.path.display(),
            output_dir = %job.output_dir.display(),
            runtime = %self.runtime,
            "starting training job"
        );
        say(format!("Base model: {}", job.base_model));
        say(format!("Dataset: {} ({}, {:?})", job.dataset.path.display(), job.dataset.format, job.dataset.mode));
        say(format!("Output: {}", job.output_dir.display()));
        say(format!("Runtime: {}", self.runtime));

        let layout = TrainingLayout::new(job.output_dir.clone());
        layout.ensure_dirs()?;

        let dataset = job.dataset.open()?;
        match dataset.len_hint() {
            LengthHint::Exact(n) => say(format!("Loaded {n} training examples")),
            LengthHint::Approximate(n) => say(format!("Streaming dataset (~{n} lines)")),
            LengthHint::Unknown => say("Streaming dataset (size unknown)".to_string()),
        }

        say(format!("Loading model {}", job.base_model));
        let mut model = self.backend.load(&job.base_model, &self.runtime).await.inspect_err(|e| {
            if matches!(e, TrainingError::OutOfMemory(_)) {
                error!(batch_size = params.batch_size, "model load ran out of memory, reduce batch size");
            }
        })?;

        let result = self.train_loaded(job, &layout, model.as_mut(), dataset, progress).await;
        if let Err(e) = model.shutdown().await {
            warn!(error = %e, "model backend shutdown failed");
        }
        let outcome = result?;

        progress.on_event(ProgressEvent::Finished { job_id });
        Ok(outcome)
    }

    async fn train_loaded(
        &self,
        job: &TrainingJobSpec,
        layout: &TrainingLayout,
        model: &mut dyn CausalModel,
        dataset: DatasetHandle<TrainingRecord>,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<TrainingOutcome> {
        let job_id = &job.job_id;
        let params = &job.hyperparams;
        let say = |message: String| {
            progress.on_event(ProgressEvent::Message { job_id: job_id.clone(), message });
        };

        let tokenizer = TokenizeAdapter::new(model.tokenizer(), params.max_length as usize)?;
        let tokenized = tokenizer.tokenize(dataset)?;

        let adaptation = self.selector.configure(
            model.module_names().iter().map(String::as_str),
            params.lora_rank,
            params.lora_alpha,
            params.lora_dropout,
        )?;
        info!(targets = ?adaptation.target_modules(), rank = adaptation.rank(), "applying LoRA adapter");
        let summary = model.apply_adaptation(&adaptation).await?;
        say(format!(
            "trainable params: {} || all params: {} || trainable%: {:.4}",
            summary.trainable_params,
            summary.total_params,
            summary.trainable_percent()
        ));

        enable_checkpointing(model).await?;
        model.configure_optimizer(&OptimizerConfig::adafactor(params.learning_rate)).await?;

        let mut run = TrainingRun::new(job, tokenized.len_hint(), progress);
        say(format!(
            "Training for {} steps ({} per epoch, {} epochs)",
            run.plan.max_steps, run.plan.updates_per_epoch, params.epochs
        ));

        match tokenized {
            DatasetHandle::Materialized(records) => {
                if records.is_empty() {
                    return Err(TrainingError::Dataset("dataset contains no usable records".to_string()));
                }
                for _ in 0..params.epochs {
                    run.pass(model, records.iter().cloned().map(Ok)).await?;
                }
            }
            streaming @ DatasetHandle::Streaming { .. } => {
                let mut records = streaming.into_iter();
                loop {
                    let consumed = run.pass(model, &mut records).await?;
                    if run.is_done() {
                        break;
                    }
                    if consumed == 0 {
                        return Err(TrainingError::Dataset("dataset yielded no usable records".to_string()));
                    }
                    debug!(step = run.step, "stream exhausted before step budget, re-opening dataset");
                    records = tokenizer.tokenize(job.dataset.open()?)?.into_iter();
                }
            }
        }
        run.flush_progress();
        say(format!("Training complete after {} steps", run.step));

        let adapter_dir = layout.adapter_dir();
        model.save_adapter(&adapter_dir).await?;
        write_json(&layout.adaptation_config_path(), &adaptation)?;
        say(format!("Adapter saved to {}", adapter_dir.display()));

        let merged_dir = merge(model, &layout.merged_dir()).await;
        if merged_dir.is_some() {
            say(format!("Merged model saved to {}", layout.merged_dir().display()));
        } else {
            say("Continuing without merge - GGUF export may fail".to_string());
        }

        let manifest = write_manifest(job, layout, adaptation, &run, merged_dir.as_deref())?;
        Ok(TrainingOutcome { manifest, adapter_dir, merged_dir })
    }
}

/// Non-reentrant first, then reentrant; skipped when the backend has neither.
async fn enable_checkpointing(model: &mut dyn CausalModel) -> TrainingResult<()> {
    match model.enable_checkpointing(CheckpointMode::NonReentrant).await {
        Ok(()) => {
            debug!("activation checkpointing enabled (non-reentrant)");
            return Ok(());
        }
        Err(TrainingError::Unsupported(reason)) => {
            debug!(%reason, "non-reentrant checkpointing unavailable, trying reentrant");
        }
        Err(e) => return Err(e),
    }

    match model.enable_checkpointing(CheckpointMode::Reentrant).await {
        Ok(()) => debug!("activation checkpointing enabled (reentrant)"),
        Err(TrainingError::Unsupported(reason)) => debug!(%reason, "activation checkpointing not supported, skipping"),
        Err(e) => return Err(e),
    }
    Ok(())
}

async fn merge(model: &mut dyn CausalModel, merged_dir: &Path) -> Option<PathBuf> {
    if let Err(e) = std::fs::create_dir_all(merged_dir) {
        warn!(error = %e, dir = %merged_dir.display(), "could not create merged model directory");
        return None;
    }
    match model.merge_and_save(merged_dir).await {
        Ok(()) => Some(merged_dir.to_path_buf()),
        Err(e) => {
            warn!(error = %e, "adapter merge failed, continuing without merged model; export may fail");
            None
        }
    }
}

fn write_manifest(
    job: &TrainingJobSpec,
    layout: &TrainingLayout,
    adaptation: AdaptationConfig,
    run: &TrainingRun<'_>,
    merged_dir: Option<&Path>,
) -> TrainingResult<TrainingManifest> {
    let mut artifacts = vec![
        make_artifact(ArtifactKind::Adapter, layout.adapter_dir())?,
        make_artifact(ArtifactKind::AdaptationConfig, layout.adaptation_config_path())?,
    ];
    if let Some(dir) = merged_dir {
        artifacts.push(make_artifact(ArtifactKind::MergedModel, dir.to_path_buf())?);
    }

    let manifest = TrainingManifest {
        job_id: job.job_id.clone(),
        created_at: chrono::Utc::now(),
        base_model: job.base_model.clone(),
        dataset: job.dataset.clone(),
        hyperparams: job.hyperparams.clone(),
        adaptation,
        metrics: TrainingMetrics {
            final_loss: run.last_loss,
            steps: run.step,
            total_steps: run.plan.max_steps,
            merged: merged_dir.is_some(),
        },
        artifacts,
    };
    manifest.write(&layout.manifest_path())?;
    Ok(manifest)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> TrainingResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Step accounting and progress cadence for one job.
struct TrainingRun<'a> {
    job_id: TrainingJobId,
    progress: &'a dyn ProgressSink,
    plan: StepEstimate,
    batch_size: usize,
    grad_accum: usize,
    epochs: u32,
    logging_steps: u64,
    started: Instant,
    step: u64,
    last_logged_step: u64,
    window_loss: f64,
    window_batches: u64,
    last_loss: Option<f64>,
}

impl<'a> TrainingRun<'a> {
    fn new(job: &TrainingJobSpec, hint: LengthHint, progress: &'a dyn ProgressSink) -> Self {
        let params = &job.hyperparams;
        let (batch, accum, epochs) =
            (u64::from(params.batch_size), u64::from(params.grad_accum), u64::from(params.epochs));
        let plan = match hint {
            LengthHint::Exact(n) => exact_total_steps(n, batch, accum, epochs),
            LengthHint::Approximate(n) => estimate_max_steps(Some(n), batch, accum, epochs),
            LengthHint::Unknown => estimate_max_steps(None, batch, accum, epochs),
        };

        Self {
            job_id: job.job_id.clone(),
            progress,
            plan,
            batch_size: params.batch_size.max(1) as usize,
            grad_accum: params.grad_accum.max(1) as usize,
            epochs: params.epochs,
            logging_steps: params.logging_steps.max(1),
            started: Instant::now(),
            step: 0,
            last_logged_step: 0,
            window_loss: 0.0,
            window_batches: 0,
            last_loss: None,
        }
    }

    fn is_done(&self) -> bool {
        self.step >= self.plan.max_steps
    }

    /// One pass over `records`, stopping early at the step budget. Returns the
    /// number of records consumed. A short trailing accumulation window still
    /// produces an optimizer step.
    async fn pass<I>(&mut self, model: &mut dyn CausalModel, records: I) -> TrainingResult<u64>
    where
        I: Iterator<Item = TrainingResult<TokenizedRecord>> + Send,
    {
        let loss_scale = 1.0 / self.grad_accum as f64;
        let mut consumed = 0u64;
        let mut micro: Vec<TokenizedRecord> = Vec::with_capacity(self.batch_size);
        let mut accumulated = 0usize;

        for record in records {
            if self.is_done() {
                break;
            }
            micro.push(record?);
            consumed += 1;
            if micro.len() < self.batch_size {
                continue;
            }

            self.forward(model, std::mem::take(&mut micro), loss_scale).await?;
            accumulated += 1;
            if accumulated == self.grad_accum {
                self.optimizer_step(model).await?;
                accumulated = 0;
            }
        }

        if !self.is_done() {
            if !micro.is_empty() {
                self.forward(model, micro, loss_scale).await?;
                accumulated += 1;
            }
            if accumulated > 0 {
                self.optimizer_step(model).await?;
            }
        }
        Ok(consumed)
    }

    async fn forward(&mut self, model: &mut dyn CausalModel, records: Vec<TokenizedRecord>, scale: f64) -> TrainingResult<()> {
        let loss = model.forward_backward(&Batch::collate(records), scale).await?;
        self.window_loss += loss;
        self.window_batches += 1;
        Ok(())
    }

    async fn optimizer_step(&mut self, model: &mut dyn CausalModel) -> TrainingResult<()> {
        model.optimizer_step().await?;
        self.step += 1;
        if self.step % self.logging_steps == 0 {
            self.emit_progress();
        }
        Ok(())
    }

    /// Emit a final event when the last step fell between logging intervals.
    fn flush_progress(&mut self) {
        if self.step > self.last_logged_step {
            self.emit_progress();
        }
    }

    fn emit_progress(&mut self) {
        let loss = if self.window_batches > 0 { self.window_loss / self.window_batches as f64 } else { 0.0 };
        let elapsed = self.started.elapsed();
        let event = TrainingProgressEvent {
            epoch: self.step as f64 / self.plan.updates_per_epoch.max(1) as f64,
            total_epochs: self.epochs,
            step: self.step,
            total_steps: self.plan.max_steps,
            loss,
            samples_per_second: samples_per_second(self.step, elapsed),
            eta: calculate_eta(self.step, self.plan.max_steps, elapsed),
        };
        debug!(step = event.step, loss = event.loss, "training progress");
        self.progress.on_event(ProgressEvent::Step { job_id: self.job_id.clone(), progress: event });

        self.last_loss = Some(loss);
        self.last_logged_step = self.step;
        self.window_loss = 0.0;
        self.window_batches = 0;
    }
}

#[async_trait]
impl<B: ModelBackend> Trainer for LoraTrainer<B> {
    fn id(&self) -> &'static str {
        "lora"
    }

    async fn prepare(&self, job: &TrainingJobSpec) -> TrainingResult<()> {
        job.validate()?;
        if !job.dataset.path.is_file() {
            return Err(TrainingError::Dataset(format!(
                "dataset file not found: {}",
                job.dataset.path.display()
            )));
        }
        TrainingLayout::new(job.output_dir.clone()).ensure_dirs()?;
        Ok(())
    }

    async fn run(&self, job: &TrainingJobSpec, progress: &dyn ProgressSink) -> TrainingResult<TrainingOutcome> {
        self.set_status(&job.job_id, TrainerStatus::Preparing);
        if let Err(e) = self.prepare(job).await {
            self.set_status(&job.job_id, TrainerStatus::Failed(e.to_string()));
            return Err(e);
        }

        self.set_status(&job.job_id, TrainerStatus::Running);
        match self.execute(job, progress).await {
            Ok(outcome) => {
                self.set_status(&job.job_id, TrainerStatus::Finished);
                Ok(outcome)
            }
            Err(e) => {
                self.set_status(&job.job_id, TrainerStatus::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn status(&self, job_id: &TrainingJobId) -> TrainingResult<TrainerStatus> {
        Ok(self
            .statuses
            .lock()
            .ok()
            .and_then(|s| s.get(&job_id.0).cloned())
            .unwrap_or(TrainerStatus::Idle))
    }
}
