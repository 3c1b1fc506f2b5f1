// Shared fixtures for integration tests

#![allow(dead_code)]

use std::path::Path;

use finetune::models::{LlamaHubConfig, TextEncoder};

/// Whitespace word-level tokenizer in HuggingFace `tokenizer.json` format
pub const TOKENIZER_JSON: &str = r#"{
    "version": "1.0",
    "truncation": null,
    "padding": null,
    "added_tokens": [],
    "normalizer": null,
    "pre_tokenizer": { "type": "Whitespace" },
    "post_processor": null,
    "decoder": null,
    "model": {
        "type": "WordLevel",
        "vocab": {
            "<pad>": 0, "<unk>": 1, "hello": 2, "world": 3,
            "the": 4, "quick": 5, "brown": 6, "fox": 7,
            "jumps": 8, "over": 9, "lazy": 10, "dog": 11
        },
        "unk_token": "<unk>"
    }
}"#;

pub const VOCAB_SIZE: usize = 12;

/// Write the fixture tokenizer into `dir` and load it with `max_length`
pub fn encoder_in(dir: &Path, max_length: usize) -> TextEncoder {
    let path = dir.join("tokenizer.json");
    std::fs::write(&path, TOKENIZER_JSON).unwrap();
    TextEncoder::from_file(&path, max_length, None).unwrap()
}

pub fn tiny_llama() -> LlamaHubConfig {
    LlamaHubConfig {
        hidden_size: 16,
        intermediate_size: 32,
        num_hidden_layers: 1,
        num_attention_heads: 2,
        num_key_value_heads: Some(1),
        vocab_size: VOCAB_SIZE,
        rms_norm_eps: 1e-5,
        max_position_embeddings: Some(32),
        tie_word_embeddings: false,
        rope_theta: None,
        rope_scaling: None,
    }
}

/// `{"data": [{"value": ...}, ...]}`
pub fn payload(texts: &[&str]) -> String {
    let records: Vec<_> = texts
        .iter()
        .map(|t| serde_json::json!({ "value": t }))
        .collect();
    serde_json::json!({ "data": records }).to_string()
}
