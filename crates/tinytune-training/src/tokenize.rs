//! Tokenization of training records into fixed-length id/mask pairs.

use crate::dataset::{DatasetHandle, TrainingRecord};
use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Text-to-ids capability supplied by the model backend.
pub trait TextTokenizer: Send + Sync {
    fn encode(&self, text: &str) -> TrainingResult<Vec<u32>>;

    fn pad_token_id(&self) -> Option<u32>;

    fn eos_token_id(&self) -> Option<u32>;
}

/// A record reduced to numeric tensors. The raw text is not carried along.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizedRecord {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u8>,
}

impl TokenizedRecord {
    #[must_use]
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Right-truncate or right-pad `ids` to exactly `max_length`.
    #[must_use]
    pub fn fit(mut ids: Vec<u32>, max_length: usize, pad_id: u32) -> Self {
        ids.truncate(max_length);
        let mut attention_mask = vec![1u8; ids.len()];
        ids.resize(max_length, pad_id);
        attention_mask.resize(max_length, 0);
        Self { input_ids: ids, attention_mask }
    }
}

/// Maps a dataset of text records to a same-shape dataset of tokenized records.
#[derive(Clone)]
pub struct TokenizeAdapter {
    tokenizer: Arc<dyn TextTokenizer>,
    max_length: usize,
    pad_id: u32,
}

impl TokenizeAdapter {
    /// Padding uses the tokenizer's pad id, falling back to its end-of-sequence id.
    pub fn new(tokenizer: Arc<dyn TextTokenizer>, max_length: usize) -> TrainingResult<Self> {
        if max_length == 0 {
            return Err(TrainingError::InvalidSpec("max_length must be >= 1".to_string()));
        }
        let pad_id = tokenizer.pad_token_id().or_else(|| tokenizer.eos_token_id()).ok_or_else(|| {
            TrainingError::Tokenizer("tokenizer defines neither a padding nor an end-of-sequence token".to_string())
        })?;
        debug!(pad_id, max_length, "tokenize adapter ready");
        Ok(Self { tokenizer, max_length, pad_id })
    }

    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    #[must_use]
    pub fn pad_id(&self) -> u32 {
        self.pad_id
    }

    pub fn tokenize_record(&self, record: &TrainingRecord) -> TrainingResult<TokenizedRecord> {
        let ids = self.tokenizer.encode(&record.text)?;
        Ok(TokenizedRecord::fit(ids, self.max_length, self.pad_id))
    }

    /// Record-preserving map; streaming inputs are tokenized lazily, one record at a time.
    pub fn tokenize(
        &self,
        dataset: DatasetHandle<TrainingRecord>,
    ) -> TrainingResult<DatasetHandle<TokenizedRecord>> {
        let adapter = self.clone();
        dataset.try_map(move |record| adapter.tokenize_record(&record))
    }
}

const EOS_CANDIDATES: &[&str] = &["</s>", "<|endoftext|>", "<eos>", "<|im_end|>", "<|end_of_text|>"];

/// A HuggingFace `tokenizer.json` tokenizer.
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
    pad_id: Option<u32>,
    eos_id: Option<u32>,
}

impl HfTokenizer {
    /// Load `tokenizer.json` from a model directory, reading special tokens
    /// from `tokenizer_config.json` when present.
    pub fn from_dir(dir: &Path) -> TrainingResult<Self> {
        let mut tokenizer = Self::from_file(&dir.join("tokenizer.json"))?;

        let config_path = dir.join("tokenizer_config.json");
        if config_path.is_file() {
            let config: Value = serde_json::from_slice(&std::fs::read(&config_path)?)?;
            if let Some(id) = special_token(&config, "pad_token").and_then(|t| tokenizer.inner.token_to_id(&t)) {
                tokenizer.pad_id = Some(id);
            }
            if let Some(id) = special_token(&config, "eos_token").and_then(|t| tokenizer.inner.token_to_id(&t)) {
                tokenizer.eos_id = Some(id);
            }
        }
        Ok(tokenizer)
    }

    pub fn from_file(path: &Path) -> TrainingResult<Self> {
        let mut inner = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| TrainingError::Tokenizer(format!("failed to load {}: {e}", path.display())))?;

        let pad_id = inner.get_padding().map(|p| p.pad_id);
        let eos_id = EOS_CANDIDATES.iter().find_map(|t| inner.token_to_id(t));

        // Length is enforced by `TokenizedRecord::fit`, not by the tokenizer.
        inner.with_padding(None);
        inner
            .with_truncation(None)
            .map_err(|e| TrainingError::Tokenizer(format!("failed to disable truncation: {e}")))?;

        Ok(Self { inner, pad_id, eos_id })
    }
}

fn special_token(config: &Value, key: &str) -> Option<String> {
    match config.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("content").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

impl TextTokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> TrainingResult<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, true)
            .map_err(|e| TrainingError::Tokenizer(format!("tokenization failed: {e}")))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn pad_token_id(&self) -> Option<u32> {
        self.pad_id
    }

    fn eos_token_id(&self) -> Option<u32> {
        self.eos_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// One id per whitespace-separated word, offset past the special ids.
    struct WordTokenizer {
        pad: Option<u32>,
        eos: Option<u32>,
    }

    impl TextTokenizer for WordTokenizer {
        fn encode(&self, text: &str) -> TrainingResult<Vec<u32>> {
            Ok(text.split_whitespace().map(|w| 10 + w.len() as u32).collect())
        }

        fn pad_token_id(&self) -> Option<u32> {
            self.pad
        }

        fn eos_token_id(&self) -> Option<u32> {
            self.eos
        }
    }

    fn record(text: &str) -> TrainingRecord {
        TrainingRecord::new(text).unwrap()
    }

    #[test]
    fn test_fit_pads_and_truncates() {
        let padded = TokenizedRecord::fit(vec![5, 6], 4, 0);
        assert_eq!(padded.input_ids, vec![5, 6, 0, 0]);
        assert_eq!(padded.attention_mask, vec![1, 1, 0, 0]);

        let truncated = TokenizedRecord::fit(vec![1, 2, 3, 4, 5], 3, 0);
        assert_eq!(truncated.input_ids, vec![1, 2, 3]);
        assert_eq!(truncated.attention_mask, vec![1, 1, 1]);
    }

    #[test]
    fn test_pad_falls_back_to_eos() {
        let tokenizer = Arc::new(WordTokenizer { pad: None, eos: Some(2) });
        let adapter = TokenizeAdapter::new(tokenizer, 4).unwrap();
        assert_eq!(adapter.pad_id(), 2);
        assert_eq!(adapter.tokenize_record(&record("ab")).unwrap().input_ids, vec![12, 2, 2, 2]);

        let none = Arc::new(WordTokenizer { pad: None, eos: None });
        assert!(matches!(TokenizeAdapter::new(none, 4), Err(TrainingError::Tokenizer(_))));
    }

    #[test]
    fn test_tokenize_preserves_count_and_length() {
        let tokenizer = Arc::new(WordTokenizer { pad: Some(0), eos: Some(1) });
        let adapter = TokenizeAdapter::new(tokenizer, 3).unwrap();

        let texts = ["a", "a b c d e", "x y"];
        let materialized = DatasetHandle::Materialized(texts.iter().map(|t| record(t)).collect());
        let out = adapter.tokenize(materialized).unwrap().collect_records().unwrap();
        assert_eq!(out.len(), texts.len());

        let streaming = DatasetHandle::streaming(texts.map(|t| Ok(record(t))).into_iter(), Some(3));
        let streamed = adapter.tokenize(streaming).unwrap();
        assert!(streamed.is_streaming());
        let streamed = streamed.collect_records().unwrap();

        assert_eq!(out, streamed);
        for r in &out {
            assert_eq!(r.input_ids.len(), 3);
            assert_eq!(r.attention_mask.len(), 3);
        }
    }

    #[test]
    fn test_hf_tokenizer_from_dir() {
        let temp = TempDir::new().unwrap();
        let tokenizer_json = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [],
            "normalizer": null,
            "pre_tokenizer": {"type": "Whitespace"},
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": {"<pad>": 0, "</s>": 1, "[UNK]": 2, "hello": 3, "world": 4},
                "unk_token": "[UNK]"
            }
        });
        std::fs::write(temp.path().join("tokenizer.json"), tokenizer_json.to_string()).unwrap();
        std::fs::write(
            temp.path().join("tokenizer_config.json"),
            r#"{"pad_token": {"content": "<pad>"}, "eos_token": "</s>"}"#,
        )
        .unwrap();

        let tokenizer = HfTokenizer::from_dir(temp.path()).unwrap();
        assert_eq!(tokenizer.pad_token_id(), Some(0));
        assert_eq!(tokenizer.eos_token_id(), Some(1));
        assert_eq!(tokenizer.encode("hello world again").unwrap(), vec![3, 4, 2]);
    }
}
