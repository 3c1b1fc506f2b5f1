// Fixed-length text encoding on top of the HuggingFace tokenizers crate

use anyhow::{anyhow, bail, Context, Result};
use std::path::Path;
use tokenizers::Tokenizer;

use crate::data::EncodedExample;

/// Pad tokens tried in order when none is configured
const PAD_CANDIDATES: &[&str] = &["<pad>", "[PAD]", "<|endoftext|>", "</s>", "<unk>"];

/// Encodes text into exactly `max_length` token ids plus an attention mask.
///
/// Sequences longer than `max_length` are truncated; shorter ones are
/// right-padded with the pad id and masked with zeros.
#[derive(Clone)]
pub struct TextEncoder {
    tokenizer: Tokenizer,
    max_length: usize,
    pad_id: u32,
}

impl TextEncoder {
    pub fn new(tokenizer: Tokenizer, max_length: usize, pad_token: Option<&str>) -> Result<Self> {
        if max_length == 0 {
            bail!("max_length must be greater than 0");
        }

        let pad_id = resolve_pad_id(&tokenizer, pad_token)?;

        tracing::debug!(
            pad_id,
            max_length,
            vocab_size = tokenizer.get_vocab_size(true),
            "Text encoder ready"
        );

        Ok(Self {
            tokenizer,
            max_length,
            pad_id,
        })
    }

    /// Load `tokenizer.json` from disk
    pub fn from_file(path: &Path, max_length: usize, pad_token: Option<&str>) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", path.display(), e))?;
        Self::new(tokenizer, max_length, pad_token)
    }

    /// Encode one text with special tokens, truncated and padded to `max_length`
    pub fn encode(&self, text: &str) -> Result<EncodedExample> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow!("Tokenization failed: {}", e))?;

        let mut input_ids: Vec<u32> = encoding.get_ids().to_vec();
        input_ids.truncate(self.max_length);

        let real_tokens = input_ids.len();
        let mut attention_mask = vec![1u32; real_tokens];

        input_ids.resize(self.max_length, self.pad_id);
        attention_mask.resize(self.max_length, 0);

        Ok(EncodedExample {
            input_ids,
            attention_mask,
        })
    }

    pub fn pad_id(&self) -> u32 {
        self.pad_id
    }
}

fn resolve_pad_id(tokenizer: &Tokenizer, pad_token: Option<&str>) -> Result<u32> {
    if let Some(token) = pad_token {
        return tokenizer
            .token_to_id(token)
            .with_context(|| format!("Pad token '{}' is not in the tokenizer vocabulary", token));
    }

    let found = PAD_CANDIDATES
        .iter()
        .find_map(|candidate| tokenizer.token_to_id(candidate));

    match found {
        Some(id) => Ok(id),
        None => {
            tracing::warn!("Tokenizer has no pad-like token, padding with id 0");
            Ok(0)
        }
    }
}
