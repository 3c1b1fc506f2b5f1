// Models module - pretrained causal LM, tokenizer and hub resolution

pub mod causal_lm;
pub mod common;
pub mod download;
pub mod tokenizer;

pub use causal_lm::{CausalLanguageModel, LlamaCausalLm, LlamaHubConfig};
pub use common::{device_label, select_device, DevicePreference};
pub use download::ModelFiles;
pub use tokenizer::TextEncoder;
