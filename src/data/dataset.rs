// Dataset adapter over remotely fetched text

use anyhow::{bail, Result};

use super::source::{FetchError, RemoteSource};
use crate::models::TextEncoder;

/// One tokenised training example, both vectors exactly `max_length` long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedExample {
    pub input_ids: Vec<u32>,
    /// 1 = real token, 0 = padding
    pub attention_mask: Vec<u32>,
}

impl EncodedExample {
    /// Number of non-padding tokens
    pub fn real_tokens(&self) -> usize {
        self.attention_mask.iter().filter(|&&m| m != 0).count()
    }
}

/// Raw texts fetched once at construction; encoded lazily per access.
///
/// Encodings are not cached: `get` re-tokenizes every time it is called.
pub struct RemoteTextDataset {
    texts: Vec<String>,
    encoder: TextEncoder,
}

impl RemoteTextDataset {
    /// Issue the single GET against `source` and keep the returned texts
    pub async fn fetch(source: &RemoteSource, encoder: TextEncoder) -> Result<Self, FetchError> {
        let texts = source.fetch_texts().await?;
        Ok(Self::from_texts(texts, encoder))
    }

    pub fn from_texts(texts: Vec<String>, encoder: TextEncoder) -> Self {
        Self { texts, encoder }
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    /// Tokenize record `index`, truncated and padded to the encoder's max length
    pub fn get(&self, index: usize) -> Result<EncodedExample> {
        let Some(text) = self.texts.get(index) else {
            bail!(
                "Index {} out of range for dataset of {} records",
                index,
                self.texts.len()
            );
        };
        self.encoder.encode(text)
    }
}
