use crate::tokenize::TokenizedRecord;
use serde::{Deserialize, Serialize};

/// Label value ignored by the causal-LM loss.
pub const IGNORE_INDEX: i64 = -100;

/// A micro-batch of tokenized records ready for a forward/backward pass.
///
/// Labels mirror `input_ids` for causal language modeling, with padded
/// positions set to [`IGNORE_INDEX`] so they do not contribute to the loss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub input_ids: Vec<Vec<u32>>,
    pub attention_mask: Vec<Vec<u8>>,
    pub labels: Vec<Vec<i64>>,
}

impl Batch {
    #[must_use]
    pub fn collate(records: Vec<TokenizedRecord>) -> Self {
        let mut batch = Self {
            input_ids: Vec::with_capacity(records.len()),
            attention_mask: Vec::with_capacity(records.len()),
            labels: Vec::with_capacity(records.len()),
        };

        for record in records {
            let labels = record
                .input_ids
                .iter()
                .zip(&record.attention_mask)
                .map(|(&id, &mask)| if mask == 0 { IGNORE_INDEX } else { i64::from(id) })
                .collect();
            batch.labels.push(labels);
            batch.input_ids.push(record.input_ids);
            batch.attention_mask.push(record.attention_mask);
        }
        batch
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}
