use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("invalid training job spec: {0}")]
    InvalidSpec(String),

    #[error("unsupported dataset format: {0}")]
    UnsupportedFormat(String),

    #[error("malformed record at line {line}: {message}")]
    MalformedRecord { line: usize, message: String },

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("adaptation error: {0}")]
    Adaptation(String),

    #[error("out of memory: {0} (try reducing batch size)")]
    OutOfMemory(String),

    #[error("operation not supported by backend: {0}")]
    Unsupported(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("artifact error: {0}")]
    Artifact(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl TrainingError {
    /// Input errors mean the job can never succeed with the data it was given.
    #[must_use]
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidSpec(_)
                | Self::UnsupportedFormat(_)
                | Self::MalformedRecord { .. }
                | Self::Dataset(_)
                | Self::Csv(_)
        )
    }
}
