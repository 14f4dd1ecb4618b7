use crate::dataset::DatasetFormat;
use crate::error::{TrainingError, TrainingResult};
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Largest dataset file accepted for a job.
pub const MAX_DATASET_BYTES: u64 = 10 * 1024 * 1024 * 1024;

/// Lines of free text assumed per 2048-character chunk when estimating rows.
const LINES_PER_TEXT_CHUNK: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetSummary {
    pub path: PathBuf,
    pub format: DatasetFormat,
    pub size_bytes: u64,
    /// Record count for record-json and tabular; an estimated chunk count for free text.
    pub rows: u64,
}

/// Validate a dataset file before a job is queued and count its rows.
pub fn inspect_dataset(path: &Path, format: DatasetFormat) -> TrainingResult<DatasetSummary> {
    let size_bytes = std::fs::metadata(path)?.len();
    if size_bytes > MAX_DATASET_BYTES {
        return Err(TrainingError::Dataset(format!(
            "{} exceeds the 10 GiB dataset limit",
            path.display()
        )));
    }
    if size_bytes == 0 {
        return Err(TrainingError::Dataset(format!("{} is empty", path.display())));
    }

    let reader = BufReader::new(File::open(path)?);
    let rows = match format {
        DatasetFormat::RecordJson => count_json_lines(reader)?,
        DatasetFormat::Tabular => count_tabular_rows(reader)?,
        DatasetFormat::FreeText => estimate_text_chunks(reader)?,
    };

    Ok(DatasetSummary { path: path.to_path_buf(), format, size_bytes, rows })
}

fn count_json_lines(reader: impl BufRead) -> TrainingResult<u64> {
    let mut rows = 0;
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !line.starts_with('{') || !line.ends_with('}') {
            return Err(TrainingError::MalformedRecord {
                line: idx + 1,
                message: "each line must be a JSON object".to_string(),
            });
        }
        rows += 1;
    }
    if rows == 0 {
        return Err(TrainingError::Dataset("record-json file contains no records".to_string()));
    }
    Ok(rows)
}

fn count_tabular_rows(reader: impl BufRead) -> TrainingResult<u64> {
    let mut lines = reader.lines();
    let header = lines.next().transpose()?.unwrap_or_default();
    if header.trim().is_empty() {
        return Err(TrainingError::Dataset("tabular file has no header row".to_string()));
    }

    let mut rows = 0;
    for line in lines {
        if !line?.trim().is_empty() {
            rows += 1;
        }
    }
    if rows == 0 {
        return Err(TrainingError::Dataset("tabular file contains no data rows".to_string()));
    }
    Ok(rows)
}

fn estimate_text_chunks(reader: impl BufRead) -> TrainingResult<u64> {
    let mut lines = 0u64;
    for line in reader.lines() {
        if !line?.trim().is_empty() {
            lines += 1;
        }
    }
    if lines == 0 {
        return Err(TrainingError::Dataset("text file is empty".to_string()));
    }
    Ok((lines / LINES_PER_TEXT_CHUNK).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn inspect(content: &str, name: &str, format: DatasetFormat) -> TrainingResult<DatasetSummary> {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(name);
        std::fs::write(&path, content).unwrap();
        inspect_dataset(&path, format)
    }

    #[test]
    fn test_inspect_counts_records() {
        let summary =
            inspect("{\"text\":\"a\"}\n\n{\"text\":\"b\"}\n", "d.jsonl", DatasetFormat::RecordJson).unwrap();
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.size_bytes, 27);

        let summary = inspect("a,b\n1,2\n\n3,4\n", "d.csv", DatasetFormat::Tabular).unwrap();
        assert_eq!(summary.rows, 2);

        let text = "line\n".repeat(25);
        assert_eq!(inspect(&text, "d.txt", DatasetFormat::FreeText).unwrap().rows, 2);
        assert_eq!(inspect("one line", "e.txt", DatasetFormat::FreeText).unwrap().rows, 1);
    }

    #[test]
    fn test_inspect_rejects_bad_inputs() {
        assert!(matches!(
            inspect("", "d.jsonl", DatasetFormat::RecordJson),
            Err(TrainingError::Dataset(_))
        ));
        assert!(matches!(
            inspect("{\"a\":1}\n[1,2]\n", "d.jsonl", DatasetFormat::RecordJson),
            Err(TrainingError::MalformedRecord { line: 2, .. })
        ));
        assert!(inspect("a,b\n\n", "d.csv", DatasetFormat::Tabular).is_err());
        assert!(inspect("\n \n", "d.txt", DatasetFormat::FreeText).is_err());
    }
}
