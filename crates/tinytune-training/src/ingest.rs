use crate::dataset::{DatasetFormat, DatasetHandle, IngestMode, RecordIter, TrainingRecord};
use crate::error::{TrainingError, TrainingResult};
use csv::StringRecord;
use serde::Serialize;
use serde_json::ser::{Formatter, Serializer};
use serde_json::Value;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use tracing::{debug, info, warn};

pub const DEFAULT_CHUNK_SIZE: usize = 2048;

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Characters per free-text chunk.
    pub chunk_size: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self { chunk_size: DEFAULT_CHUNK_SIZE }
    }
}

/// Open a raw dataset file as a [`DatasetHandle`] of training records.
///
/// Both modes run the same per-format record iterator, so output semantics do
/// not depend on the mode: materialized mode drains it eagerly, streaming mode
/// hands it out together with an approximate count from a cheap pre-scan.
pub fn open_dataset(
    path: &Path,
    format: DatasetFormat,
    mode: IngestMode,
    options: &IngestOptions,
) -> TrainingResult<DatasetHandle<TrainingRecord>> {
    let records = record_iter(path, format, options)?;

    match mode {
        IngestMode::Materialized => {
            let records = records.collect::<TrainingResult<Vec<_>>>()?;
            info!(path = %path.display(), %format, count = records.len(), "dataset materialized");
            Ok(DatasetHandle::Materialized(records))
        }
        IngestMode::Streaming => {
            let approx = approximate_count(path, format);
            info!(path = %path.display(), %format, approx = ?approx, "dataset opened for streaming");
            Ok(DatasetHandle::streaming(records, approx))
        }
    }
}

fn record_iter(
    path: &Path,
    format: DatasetFormat,
    options: &IngestOptions,
) -> TrainingResult<RecordIter<TrainingRecord>> {
    let file = File::open(path)?;

    match format {
        DatasetFormat::RecordJson => Ok(Box::new(json_lines(BufReader::new(file)))),
        DatasetFormat::Tabular => Ok(Box::new(tabular_rows(file)?)),
        DatasetFormat::FreeText => {
            if options.chunk_size == 0 {
                return Err(TrainingError::InvalidSpec("chunk_size must be >= 1".to_string()));
            }
            Ok(Box::new(TextChunks::new(BufReader::new(file), options.chunk_size)))
        }
    }
}

/// Map one decoded JSON value to training text.
///
/// Precedence: `{instruction, response}`, then `{input, output}`, then
/// `{text}`, else the whole value serialized.
#[must_use]
pub fn record_text(value: &Value) -> String {
    if let Value::Object(map) = value {
        if let (Some(instruction), Some(response)) = (map.get("instruction"), map.get("response")) {
            return format!(
                "### Instruction:\n{}\n\n### Response:\n{}",
                render_value(instruction),
                render_value(response)
            );
        }
        if let (Some(input), Some(output)) = (map.get("input"), map.get("output")) {
            return format!(
                "### Input:\n{}\n\n### Output:\n{}",
                render_value(input),
                render_value(output)
            );
        }
        if let Some(text) = map.get("text") {
            return render_value(text);
        }
    }
    dumps(value)
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => dumps(other),
    }
}

/// JSON text in the layout the upstream Python tooling writes: `", "` between
/// items, `": "` after keys, non-ASCII escaped as `\uXXXX`.
fn dumps(value: &Value) -> String {
    let mut buf = Vec::new();
    let mut ser = Serializer::with_formatter(&mut buf, SpacedAsciiFormatter);
    if value.serialize(&mut ser).is_err() {
        return value.to_string();
    }
    String::from_utf8_lossy(&buf).into_owned()
}

struct SpacedAsciiFormatter;

impl Formatter for SpacedAsciiFormatter {
    fn begin_array_value<W: ?Sized + Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_key<W: ?Sized + Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W: ?Sized + Write>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()> {
        for ch in fragment.chars() {
            if ch.is_ascii() {
                writer.write_all(&[ch as u8])?;
            } else {
                let mut units = [0u16; 2];
                for unit in ch.encode_utf16(&mut units) {
                    write!(writer, "\\u{unit:04x}")?;
                }
            }
        }
        Ok(())
    }
}

fn parse_record_line(index: usize, line: &str) -> TrainingResult<Option<TrainingRecord>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(line).map_err(|e| TrainingError::MalformedRecord {
        line: index + 1,
        message: e.to_string(),
    })?;
    Ok(TrainingRecord::new(record_text(&value)))
}

fn json_lines<R: BufRead + Send + 'static>(
    reader: R,
) -> impl Iterator<Item = TrainingResult<TrainingRecord>> + Send {
    reader.lines().enumerate().filter_map(|(idx, line)| match line {
        Ok(line) => parse_record_line(idx, &line).transpose(),
        Err(e) => Some(Err(e.into())),
    })
}

fn tabular_text(headers: &StringRecord, row: &StringRecord) -> Option<TrainingRecord> {
    let parts: Vec<String> = headers
        .iter()
        .zip(row.iter())
        .filter(|(_, value)| !value.trim().is_empty())
        .map(|(column, value)| format!("{column}: {value}"))
        .collect();

    if parts.is_empty() {
        return None;
    }
    TrainingRecord::new(parts.join("\n"))
}

fn tabular_rows(
    file: File,
) -> TrainingResult<impl Iterator<Item = TrainingResult<TrainingRecord>> + Send> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).flexible(true).from_reader(file);
    let headers = reader.headers()?.clone();

    Ok(reader.into_records().filter_map(move |row| match row {
        Ok(row) => tabular_text(&headers, &row).map(Ok),
        Err(e) => Some(Err(e.into())),
    }))
}

/// Reads a text source incrementally and yields `chunk_size`-character chunks.
///
/// Whitespace-only chunks are skipped. Chunk boundaries are counted in
/// characters, so multi-byte text splits the same way it would if the whole
/// file were read at once.
pub struct TextChunks<R> {
    reader: R,
    chunk_size: usize,
    pending: String,
    pending_chars: usize,
    raw: Vec<u8>,
    eof: bool,
}

impl<R: BufRead> TextChunks<R> {
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
            pending: String::new(),
            pending_chars: 0,
            raw: Vec::new(),
            eof: false,
        }
    }

    fn take_chunk(&mut self) -> String {
        let split_at = self
            .pending
            .char_indices()
            .nth(self.chunk_size)
            .map_or(self.pending.len(), |(idx, _)| idx);
        let rest = self.pending.split_off(split_at);
        self.pending_chars -= self.chunk_size.min(self.pending_chars);
        std::mem::replace(&mut self.pending, rest)
    }

    fn fill(&mut self) -> std::io::Result<()> {
        let buf = self.reader.fill_buf()?;
        if buf.is_empty() {
            self.eof = true;
            if !self.raw.is_empty() {
                return Err(invalid_utf8());
            }
            return Ok(());
        }
        let consumed = buf.len();
        self.raw.extend_from_slice(buf);
        self.reader.consume(consumed);

        let valid = match std::str::from_utf8(&self.raw) {
            Ok(_) => self.raw.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => return Err(invalid_utf8()),
        };
        let decoded = std::str::from_utf8(&self.raw[..valid]).map_err(|_| invalid_utf8())?;
        self.pending_chars += decoded.chars().count();
        self.pending.push_str(decoded);
        self.raw.drain(..valid);
        Ok(())
    }
}

fn invalid_utf8() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, "stream did not contain valid UTF-8")
}

impl<R: BufRead> Iterator for TextChunks<R> {
    type Item = TrainingResult<TrainingRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.pending_chars >= self.chunk_size {
                let chunk = self.take_chunk();
                if let Some(record) = TrainingRecord::new(chunk) {
                    return Some(Ok(record));
                }
                continue;
            }

            if self.eof {
                if self.pending.is_empty() {
                    return None;
                }
                self.pending_chars = 0;
                return TrainingRecord::new(std::mem::take(&mut self.pending)).map(Ok);
            }

            if let Err(e) = self.fill() {
                self.eof = true;
                self.pending.clear();
                self.raw.clear();
                return Some(Err(e.into()));
            }
        }
    }
}

/// Cheap pre-scan used to size a streaming run.
///
/// Line count for record-json and free text, line count minus one (the
/// header) for tabular. For free text this is a proxy, not a chunk count.
/// Returns `None` when the count is unavailable or zero.
pub fn approximate_count(path: &Path, format: DatasetFormat) -> Option<u64> {
    let lines = match count_lines(path) {
        Ok(n) => n,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not pre-scan dataset; length unknown");
            return None;
        }
    };

    let approx = match format {
        DatasetFormat::RecordJson | DatasetFormat::FreeText => lines,
        DatasetFormat::Tabular => lines.saturating_sub(1),
    };
    debug!(path = %path.display(), lines, approx, "dataset pre-scan");

    (approx > 0).then_some(approx)
}

/// Count lines the way a line iterator would: every `\n`-terminated segment
/// plus a trailing unterminated one.
pub fn count_lines(path: &Path) -> std::io::Result<u64> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut buf = Vec::new();
    let mut count = 0u64;
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::LengthHint;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn texts(handle: DatasetHandle<TrainingRecord>) -> Vec<String> {
        handle.collect_records().unwrap().into_iter().map(|r| r.text).collect()
    }

    #[test]
    fn test_record_json_precedence() {
        let temp = TempDir::new().unwrap();
        let path = write(
            &temp,
            "data.jsonl",
            "{\"instruction\":\"Hi\",\"response\":\"Hello\"}\n{\"text\":\"raw\"}\n",
        );

        let handle =
            open_dataset(&path, DatasetFormat::RecordJson, IngestMode::Materialized, &IngestOptions::default())
                .unwrap();
        assert_eq!(
            texts(handle),
            vec!["### Instruction:\nHi\n\n### Response:\nHello".to_string(), "raw".to_string()]
        );
    }

    #[test]
    fn test_record_text_fallbacks() {
        let io = serde_json::json!({"input": "x", "output": 2});
        assert_eq!(record_text(&io), "### Input:\nx\n\n### Output:\n2");

        // instruction without response falls through to the next rule
        let partial = serde_json::json!({"instruction": "a", "text": "b"});
        assert_eq!(record_text(&partial), "b");

        let other = serde_json::json!({"zeta": 1, "alpha": "two"});
        assert_eq!(record_text(&other), "{\"zeta\": 1, \"alpha\": \"two\"}");

        let nested = serde_json::json!({"tags": ["a", "b"], "name": "café 🎉"});
        assert_eq!(
            record_text(&nested),
            "{\"tags\": [\"a\", \"b\"], \"name\": \"caf\\u00e9 \\ud83c\\udf89\"}"
        );

        let list = serde_json::json!({"text": [1, 2]});
        assert_eq!(record_text(&list), "[1, 2]");
    }

    #[test]
    fn test_record_json_mode_invariance() {
        let temp = TempDir::new().unwrap();
        let path = write(
            &temp,
            "data.jsonl",
            "{\"input\":\"a\",\"output\":\"b\"}\n\n{\"text\":\"   \"}\n{\"k\":[1,2]}\n{\"text\":\"last\"}",
        );
        let options = IngestOptions::default();

        let materialized =
            open_dataset(&path, DatasetFormat::RecordJson, IngestMode::Materialized, &options).unwrap();
        let streaming = open_dataset(&path, DatasetFormat::RecordJson, IngestMode::Streaming, &options).unwrap();

        assert_eq!(streaming.len_hint(), LengthHint::Approximate(5));
        let materialized = texts(materialized);
        assert_eq!(materialized.len(), 3);
        assert_eq!(materialized, texts(streaming));
    }

    #[test]
    fn test_malformed_json_names_line() {
        let temp = TempDir::new().unwrap();
        let path = write(&temp, "bad.jsonl", "{\"text\":\"ok\"}\n\n{not json}\n");

        let err =
            open_dataset(&path, DatasetFormat::RecordJson, IngestMode::Materialized, &IngestOptions::default())
                .unwrap_err();
        assert!(matches!(err, TrainingError::MalformedRecord { line: 3, .. }), "{err}");

        // streaming surfaces the same error lazily
        let handle =
            open_dataset(&path, DatasetFormat::RecordJson, IngestMode::Streaming, &IngestOptions::default())
                .unwrap();
        let results: Vec<_> = handle.into_iter().collect();
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(TrainingError::MalformedRecord { line: 3, .. })));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = open_dataset(
            Path::new("/definitely/not/here.jsonl"),
            DatasetFormat::RecordJson,
            IngestMode::Streaming,
            &IngestOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TrainingError::Io(_)));
    }

    #[test]
    fn test_tabular_drops_empty_cells_and_rows() {
        let temp = TempDir::new().unwrap();
        let path = write(&temp, "data.csv", "a,b\n1,\n,\n x ,y\n");

        let handle =
            open_dataset(&path, DatasetFormat::Tabular, IngestMode::Materialized, &IngestOptions::default())
                .unwrap();
        assert_eq!(texts(handle), vec!["a: 1".to_string(), "a:  x \nb: y".to_string()]);

        let streaming =
            open_dataset(&path, DatasetFormat::Tabular, IngestMode::Streaming, &IngestOptions::default())
                .unwrap();
        // header line is subtracted from the pre-scan count
        assert_eq!(streaming.len_hint(), LengthHint::Approximate(3));
    }

    #[test]
    fn test_free_text_chunks_match_across_modes() {
        let temp = TempDir::new().unwrap();
        let text = format!("{}\n{}{}", "é".repeat(5), " ".repeat(6), "tail");
        let path = write(&temp, "corpus.txt", &text);
        let options = IngestOptions { chunk_size: 4 };

        let materialized =
            texts(open_dataset(&path, DatasetFormat::FreeText, IngestMode::Materialized, &options).unwrap());
        let streaming =
            texts(open_dataset(&path, DatasetFormat::FreeText, IngestMode::Streaming, &options).unwrap());

        // the third chunk is four spaces and is dropped
        assert_eq!(materialized, vec!["éééé", "é\n  ", "tail"]);
        assert_eq!(materialized, streaming);
    }

    #[test]
    fn test_text_chunks_handles_split_utf8_reads() {
        // A one-byte buffer forces every multi-byte char to arrive in pieces.
        let reader = BufReader::with_capacity(1, Cursor::new("añb€c".as_bytes().to_vec()));
        let chunks: Vec<String> =
            TextChunks::new(reader, 2).map(|r| r.unwrap().text).collect();
        assert_eq!(chunks, vec!["añ", "b€", "c"]);
    }

    #[test]
    fn test_text_chunks_rejects_invalid_utf8() {
        let reader = BufReader::new(Cursor::new(vec![b'a', 0xff, b'b']));
        let results: Vec<_> = TextChunks::new(reader, 8).collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(TrainingError::Io(_))));
    }

    #[test]
    fn test_count_lines_counts_trailing_segment() {
        let temp = TempDir::new().unwrap();
        assert_eq!(count_lines(&write(&temp, "a.txt", "x\ny\n")).unwrap(), 2);
        assert_eq!(count_lines(&write(&temp, "b.txt", "x\ny")).unwrap(), 2);
        assert_eq!(count_lines(&write(&temp, "c.txt", "")).unwrap(), 0);
        assert_eq!(approximate_count(&temp.path().join("c.txt"), DatasetFormat::FreeText), None);
    }
}
