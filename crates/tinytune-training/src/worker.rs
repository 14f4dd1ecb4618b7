//! Out-of-process model backend.
//!
//! The numerical work runs in a worker process that speaks one JSON object per
//! line on stdin/stdout. Requests carry an `op` tag; replies carry a `status`
//! of `ok` (with an optional `result`) or `error` (with `kind` and `message`).
//! Any stdout line that is not a reply is treated as worker chatter and logged.
//!
//! Operations, in the order a training job issues them:
//!
//! | `op` | request fields | `result` on success |
//! |---|---|---|
//! | `load` | `model_id`, `runtime` | `{"modules": [..], "tokenizer_dir": ".."}` |
//! | `apply_adapter` | `config` (adaptation config) | `{"trainable_params": n, "total_params": n}` |
//! | `enable_checkpointing` | `mode` (`non_reentrant` / `reentrant`) | none |
//! | `configure_optimizer` | `config` | none |
//! | `forward_backward` | `batch` (`input_ids`, `attention_mask`, `labels`), `loss_scale` | `{"loss": x}` |
//! | `optimizer_step` | none | none |
//! | `save_adapter` / `merge_and_save` | `dir` | none |
//! | `shutdown` | none | none; the worker then exits |
//!
//! Error replies use `kind` `oom`, `unsupported` or anything else for a
//! generic failure. A worker that is still running after stdin is closed and
//! the shutdown grace period has passed is killed.

use crate::adaptation::AdaptationConfig;
use crate::backend::{AdapterSummary, CausalModel, CheckpointMode, ModelBackend};
use crate::batch::Batch;
use crate::error::{TrainingError, TrainingResult};
use crate::runtime::{OptimizerConfig, RuntimeConfig};
use crate::tokenize::{HfTokenizer, TextTokenizer};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

/// Any program speaking the protocol above works; pass it with `--worker` or
/// `worker.command`. This default expects a `tinytune_worker.py` in the
/// working directory.
pub const DEFAULT_WORKER_COMMAND: &str = "python3 -u tinytune_worker.py";

/// How long a worker gets to answer `shutdown` and to exit afterwards.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl WorkerCommand {
    /// Split a whitespace-separated command line. No shell quoting is applied.
    pub fn parse(command: &str) -> TrainingResult<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| TrainingError::InvalidSpec("worker command is empty".to_string()))?;
        Ok(Self { program, args: parts.collect() })
    }
}

impl Default for WorkerCommand {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["-u".to_string(), "tinytune_worker.py".to_string()],
        }
    }
}

impl std::fmt::Display for WorkerCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum WorkerRequest<'a> {
    Load { model_id: &'a str, runtime: &'a RuntimeConfig },
    ApplyAdapter { config: &'a AdaptationConfig },
    EnableCheckpointing { mode: CheckpointMode },
    ConfigureOptimizer { config: &'a OptimizerConfig },
    ForwardBackward { batch: &'a Batch, loss_scale: f64 },
    OptimizerStep,
    SaveAdapter { dir: &'a Path },
    MergeAndSave { dir: &'a Path },
    Shutdown,
}

impl WorkerRequest<'_> {
    fn op(&self) -> &'static str {
        match self {
            Self::Load { .. } => "load",
            Self::ApplyAdapter { .. } => "apply_adapter",
            Self::EnableCheckpointing { .. } => "enable_checkpointing",
            Self::ConfigureOptimizer { .. } => "configure_optimizer",
            Self::ForwardBackward { .. } => "forward_backward",
            Self::OptimizerStep => "optimizer_step",
            Self::SaveAdapter { .. } => "save_adapter",
            Self::MergeAndSave { .. } => "merge_and_save",
            Self::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum WorkerReply {
    Ok {
        #[serde(default)]
        result: Value,
    },
    Error {
        #[serde(default)]
        kind: WorkerErrorKind,
        message: String,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum WorkerErrorKind {
    Oom,
    Unsupported,
    #[default]
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct LoadResult {
    modules: Vec<String>,
    tokenizer_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct LossResult {
    loss: f64,
}

/// Spawns one worker process per loaded model.
#[derive(Debug, Clone)]
pub struct WorkerBackend {
    command: WorkerCommand,
    shutdown_grace: Duration,
}

impl Default for WorkerBackend {
    fn default() -> Self {
        Self::new(WorkerCommand::default())
    }
}

impl WorkerBackend {
    #[must_use]
    pub fn new(command: WorkerCommand) -> Self {
        Self { command, shutdown_grace: DEFAULT_SHUTDOWN_GRACE }
    }

    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    #[must_use]
    pub fn command(&self) -> &WorkerCommand {
        &self.command
    }
}

#[async_trait]
impl ModelBackend for WorkerBackend {
    fn id(&self) -> &'static str {
        "worker"
    }

    async fn load(&self, model_id: &str, runtime: &RuntimeConfig) -> TrainingResult<Box<dyn CausalModel>> {
        let mut channel = WorkerChannel::spawn(&self.command, runtime, self.shutdown_grace)?;
        let result = channel.call(&WorkerRequest::Load { model_id, runtime }).await?;
        let loaded: LoadResult = serde_json::from_value(result)
            .map_err(|e| TrainingError::Backend(format!("invalid load reply: {e}")))?;

        let tokenizer = HfTokenizer::from_dir(&loaded.tokenizer_dir)?;
        info!(model_id, modules = loaded.modules.len(), "worker loaded model");

        Ok(Box::new(WorkerModel { channel, modules: loaded.modules, tokenizer: Arc::new(tokenizer) }))
    }
}

struct WorkerChannel {
    child: Child,
    /// `None` once the channel is closed.
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
    shutdown_grace: Duration,
}

impl WorkerChannel {
    fn spawn(command: &WorkerCommand, runtime: &RuntimeConfig, shutdown_grace: Duration) -> TrainingResult<Self> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(runtime.worker_env())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| TrainingError::Backend(format!("failed to spawn worker `{command}`: {e}")))?;
        debug!(pid = ?child.id(), %command, "worker spawned");

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TrainingError::Backend("worker stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TrainingError::Backend("worker stdout unavailable".to_string()))?;

        Ok(Self { child, stdin: Some(stdin), stdout: BufReader::new(stdout).lines(), shutdown_grace })
    }

    async fn call(&mut self, request: &WorkerRequest<'_>) -> TrainingResult<Value> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| TrainingError::Backend(format!("worker channel closed before `{}`", request.op())))?;
        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        stdin.write_all(&line).await?;
        stdin.flush().await?;

        loop {
            let Some(line) = self.stdout.next_line().await? else {
                return Err(TrainingError::Backend(format!(
                    "worker exited before answering `{}`",
                    request.op()
                )));
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<WorkerReply>(trimmed) {
                Ok(WorkerReply::Ok { result }) => return Ok(result),
                Ok(WorkerReply::Error { kind, message }) => {
                    return Err(match kind {
                        WorkerErrorKind::Oom => TrainingError::OutOfMemory(message),
                        WorkerErrorKind::Unsupported => TrainingError::Unsupported(message),
                        WorkerErrorKind::Other => {
                            TrainingError::Backend(format!("{} failed: {message}", request.op()))
                        }
                    });
                }
                Err(_) => debug!(target: "tinytune::worker", "{trimmed}"),
            }
        }
    }

    /// Close stdin and reap the worker, killing it after the grace period.
    async fn close(&mut self) -> TrainingResult<()> {
        drop(self.stdin.take());
        if let Ok(status) = tokio::time::timeout(self.shutdown_grace, self.child.wait()).await {
            let status = status?;
            debug!(%status, "worker exited");
            return Ok(());
        }

        warn!(grace = ?self.shutdown_grace, "worker still running after shutdown, killing it");
        self.child.start_kill()?;
        let status = self.child.wait().await?;
        debug!(%status, "worker killed");
        Ok(())
    }
}

/// A model living inside a worker process.
pub struct WorkerModel {
    channel: WorkerChannel,
    modules: Vec<String>,
    tokenizer: Arc<dyn TextTokenizer>,
}

#[async_trait]
impl CausalModel for WorkerModel {
    fn module_names(&self) -> &[String] {
        &self.modules
    }

    fn tokenizer(&self) -> Arc<dyn TextTokenizer> {
        Arc::clone(&self.tokenizer)
    }

    async fn apply_adaptation(&mut self, config: &AdaptationConfig) -> TrainingResult<AdapterSummary> {
        let result = self.channel.call(&WorkerRequest::ApplyAdapter { config }).await?;
        serde_json::from_value(result).map_err(|e| TrainingError::Backend(format!("invalid adapter reply: {e}")))
    }

    async fn enable_checkpointing(&mut self, mode: CheckpointMode) -> TrainingResult<()> {
        self.channel.call(&WorkerRequest::EnableCheckpointing { mode }).await.map(drop)
    }

    async fn configure_optimizer(&mut self, config: &OptimizerConfig) -> TrainingResult<()> {
        self.channel.call(&WorkerRequest::ConfigureOptimizer { config }).await.map(drop)
    }

    async fn forward_backward(&mut self, batch: &Batch, loss_scale: f64) -> TrainingResult<f64> {
        let result = self.channel.call(&WorkerRequest::ForwardBackward { batch, loss_scale }).await?;
        let LossResult { loss } =
            serde_json::from_value(result).map_err(|e| TrainingError::Backend(format!("invalid loss reply: {e}")))?;
        if !loss.is_finite() {
            return Err(TrainingError::Backend(format!("non-finite loss {loss}")));
        }
        Ok(loss)
    }

    async fn optimizer_step(&mut self) -> TrainingResult<()> {
        self.channel.call(&WorkerRequest::OptimizerStep).await.map(drop)
    }

    async fn save_adapter(&mut self, dir: &Path) -> TrainingResult<()> {
        self.channel.call(&WorkerRequest::SaveAdapter { dir }).await.map(drop)
    }

    async fn merge_and_save(&mut self, dir: &Path) -> TrainingResult<()> {
        self.channel.call(&WorkerRequest::MergeAndSave { dir }).await.map(drop)
    }

    async fn shutdown(&mut self) -> TrainingResult<()> {
        let grace = self.channel.shutdown_grace;
        match tokio::time::timeout(grace, self.channel.call(&WorkerRequest::Shutdown)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "worker did not acknowledge shutdown"),
            Err(_) => warn!(?grace, "worker did not answer shutdown in time"),
        }
        self.channel.close().await
    }
}
