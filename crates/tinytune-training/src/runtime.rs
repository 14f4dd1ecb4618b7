use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_INTRA_OP_THREADS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    Fp32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    Adafactor,
}

/// Process-wide numerical settings, fixed at start and handed to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub intra_op_threads: usize,
    pub interop_threads: usize,
    pub precision: Precision,
    pub optimizer: OptimizerKind,
    pub dataloader_workers: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            intra_op_threads: DEFAULT_INTRA_OP_THREADS,
            interop_threads: 1,
            precision: Precision::Fp32,
            optimizer: OptimizerKind::Adafactor,
            dataloader_workers: 0,
        }
    }
}

impl RuntimeConfig {
    /// `intra_op_threads` comes from `configured`, else `OMP_NUM_THREADS`, else 4.
    #[must_use]
    pub fn from_env(configured: Option<usize>) -> Self {
        let env_threads = std::env::var("OMP_NUM_THREADS").ok().and_then(|v| v.trim().parse().ok());
        Self::with_threads(configured.or(env_threads))
    }

    #[must_use]
    pub fn with_threads(threads: Option<usize>) -> Self {
        Self {
            intra_op_threads: threads.filter(|&t| t > 0).unwrap_or(DEFAULT_INTRA_OP_THREADS),
            ..Self::default()
        }
    }

    /// Environment handed to a worker process so its math libraries honour the limits.
    #[must_use]
    pub fn worker_env(&self) -> Vec<(&'static str, String)> {
        vec![
            ("OMP_NUM_THREADS", self.intra_op_threads.to_string()),
            ("MKL_NUM_THREADS", self.intra_op_threads.to_string()),
            ("TOKENIZERS_PARALLELISM", "false".to_string()),
        ]
    }
}

impl fmt::Display for RuntimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} intra-op threads, {} inter-op thread(s), {} dataloader workers",
            self.intra_op_threads, self.interop_threads, self.dataloader_workers
        )
    }
}

/// Optimizer settings for one job. Mixed and half precision stay off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub kind: OptimizerKind,
    pub learning_rate: f64,
    pub fp16: bool,
    pub bf16: bool,
}

impl OptimizerConfig {
    #[must_use]
    pub fn adafactor(learning_rate: f64) -> Self {
        Self { kind: OptimizerKind::Adafactor, learning_rate, fp16: false, bf16: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_resolution() {
        assert_eq!(RuntimeConfig::with_threads(None).intra_op_threads, 4);
        assert_eq!(RuntimeConfig::with_threads(Some(0)).intra_op_threads, 4);

        let config = RuntimeConfig::with_threads(Some(2));
        assert_eq!(config.intra_op_threads, 2);
        assert_eq!(config.interop_threads, 1);
        assert_eq!(config.dataloader_workers, 0);
        assert!(config.worker_env().contains(&("OMP_NUM_THREADS", "2".to_string())));
    }

    #[test]
    fn test_optimizer_defaults() {
        let optimizer = OptimizerConfig::adafactor(1e-4);
        assert_eq!(optimizer.kind, OptimizerKind::Adafactor);
        assert!(!optimizer.fp16 && !optimizer.bf16);
        assert_eq!(serde_json::to_value(&optimizer).unwrap()["kind"], "adafactor");
    }
}
