use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// A single unit of training text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub text: String,
}

impl TrainingRecord {
    /// Returns `None` when the text is empty after trimming; such records are dropped.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Option<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return None;
        }
        Some(Self { text })
    }
}

/// Declared on-disk format of a raw dataset file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatasetFormat {
    /// One JSON object per line.
    RecordJson,
    /// Delimited rows with a header.
    Tabular,
    /// Plain text, split into fixed-size chunks.
    FreeText,
}

impl DatasetFormat {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RecordJson => "record-json",
            Self::Tabular => "tabular",
            Self::FreeText => "free-text",
        }
    }

    /// Infer the format from a file extension (`.jsonl`, `.csv`, `.txt`).
    pub fn from_path(path: &Path) -> TrainingResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        match ext.as_str() {
            "jsonl" => Ok(Self::RecordJson),
            "csv" => Ok(Self::Tabular),
            "txt" => Ok(Self::FreeText),
            _ => Err(TrainingError::UnsupportedFormat(format!(
                "cannot infer dataset format from extension `.{ext}` ({})",
                path.display()
            ))),
        }
    }
}

impl fmt::Display for DatasetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetFormat {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "record-json" | "jsonl" => Ok(Self::RecordJson),
            "tabular" | "csv" => Ok(Self::Tabular),
            "free-text" | "txt" | "text" => Ok(Self::FreeText),
            other => Err(TrainingError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// How a dataset is brought into memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestMode {
    /// Build the full sequence eagerly; exact length known.
    Materialized,
    /// Forward-only lazy sequence with an approximate length.
    Streaming,
}

impl IngestMode {
    #[must_use]
    pub fn from_stream_flag(stream: bool) -> Self {
        if stream { Self::Streaming } else { Self::Materialized }
    }
}

impl Default for IngestMode {
    fn default() -> Self {
        Self::Materialized
    }
}

/// What is known about the number of records in a [`DatasetHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthHint {
    Exact(u64),
    Approximate(u64),
    Unknown,
}

pub type RecordIter<T> = Box<dyn Iterator<Item = TrainingResult<T>> + Send>;

/// A dataset that is either fully materialized or a forward-only stream.
///
/// Both variants are consumed through the same `IntoIterator` contract. A
/// materialized handle can be iterated again via [`DatasetHandle::as_slice`];
/// a streaming handle is consumed at most once and restarting it means
/// re-opening the source file.
pub enum DatasetHandle<T> {
    Materialized(Vec<T>),
    Streaming { records: RecordIter<T>, approx_len: Option<u64> },
}

impl<T: Send + 'static> DatasetHandle<T> {
    pub fn streaming<I>(records: I, approx_len: Option<u64>) -> Self
    where
        I: Iterator<Item = TrainingResult<T>> + Send + 'static,
    {
        Self::Streaming { records: Box::new(records), approx_len: approx_len.filter(|n| *n > 0) }
    }

    #[must_use]
    pub fn len_hint(&self) -> LengthHint {
        match self {
            Self::Materialized(records) => LengthHint::Exact(records.len() as u64),
            Self::Streaming { approx_len: Some(n), .. } => LengthHint::Approximate(*n),
            Self::Streaming { approx_len: None, .. } => LengthHint::Unknown,
        }
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming { .. })
    }

    #[must_use]
    pub fn as_slice(&self) -> Option<&[T]> {
        match self {
            Self::Materialized(records) => Some(records),
            Self::Streaming { .. } => None,
        }
    }

    /// Record-preserving map. Materialized handles are mapped eagerly (the
    /// first error wins); streaming handles are mapped lazily per record.
    pub fn try_map<U, F>(self, mut f: F) -> TrainingResult<DatasetHandle<U>>
    where
        U: Send + 'static,
        F: FnMut(T) -> TrainingResult<U> + Send + 'static,
    {
        match self {
            Self::Materialized(records) => {
                let mapped = records.into_iter().map(f).collect::<TrainingResult<Vec<U>>>()?;
                Ok(DatasetHandle::Materialized(mapped))
            }
            Self::Streaming { records, approx_len } => Ok(DatasetHandle::Streaming {
                records: Box::new(records.map(move |item| item.and_then(&mut f))),
                approx_len,
            }),
        }
    }

    /// Drain the handle into memory.
    pub fn collect_records(self) -> TrainingResult<Vec<T>> {
        match self {
            Self::Materialized(records) => Ok(records),
            Self::Streaming { records, .. } => records.collect(),
        }
    }
}

impl<T: Send + 'static> IntoIterator for DatasetHandle<T> {
    type Item = TrainingResult<T>;
    type IntoIter = RecordIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        match self {
            Self::Materialized(records) => Box::new(records.into_iter().map(Ok)),
            Self::Streaming { records, .. } => records,
        }
    }
}

impl<T> fmt::Debug for DatasetHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Materialized(records) => {
                f.debug_struct("Materialized").field("len", &records.len()).finish()
            }
            Self::Streaming { approx_len, .. } => {
                f.debug_struct("Streaming").field("approx_len", approx_len).finish_non_exhaustive()
            }
        }
    }
}
