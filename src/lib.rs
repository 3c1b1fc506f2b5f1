// finetune - fine-tune a pretrained causal LM on text served over HTTP
// Library exports

pub mod config;
pub mod data; // Remote fetch, lazy tokenization, batching
pub mod errors;
pub mod models; // Causal LM, tokenizer, hub resolution
pub mod training; // Loss, training loop, persistence
