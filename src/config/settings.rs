// Configuration structs
// Defaults reproduce the fixed constants of a plain fine-tuning run

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::models::DevicePreference;

pub const DEFAULT_FETCH_URL: &str = "http://localhost:8000/api/v1/load";
pub const DEFAULT_MODEL_NAME: &str = "petals-team/StableBeluga2";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where training text comes from
    pub data: DataSettings,

    /// Which pretrained model to fine-tune
    pub model: ModelSettings,

    /// Optimization loop parameters
    pub training: TrainingSettings,

    /// Where artifacts are written
    pub output: OutputSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    /// Endpoint returning `{"data": [{"value": "..."}]}`
    pub fetch_url: String,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            fetch_url: DEFAULT_FETCH_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// HuggingFace repository ID or a local model directory
    pub name: String,

    /// Hub revision (branch, tag or commit); `None` means `main`
    pub revision: Option<String>,

    /// Every example is truncated/padded to exactly this many tokens
    pub max_length: usize,

    /// Token used for padding; resolved from the vocabulary when unset
    pub pad_token: Option<String>,

    /// Compute device
    pub device: DevicePreference,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            name: DEFAULT_MODEL_NAME.to_string(),
            revision: None,
            max_length: 512,
            pad_token: None,
            device: DevicePreference::Auto,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,

    /// Seed for the per-epoch shuffle; entropy-seeded when unset
    pub seed: Option<u64>,

    /// Draw an indicatif progress bar per epoch
    pub progress: bool,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            epochs: 20,
            batch_size: 4,
            learning_rate: 5e-5,
            weight_decay: 0.01,
            seed: None,
            progress: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Directory receiving model.safetensors, config.json and the summary
    pub dir: PathBuf,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./"),
        }
    }
}

impl Config {
    /// Reject settings that would make the training loop meaningless
    pub fn validate(&self) -> Result<()> {
        if self.data.fetch_url.trim().is_empty() {
            bail!("data.fetch_url must not be empty");
        }
        if self.model.name.trim().is_empty() {
            bail!("model.name must not be empty");
        }
        // Next-token targets need at least two positions
        if self.model.max_length < 2 {
            bail!("model.max_length must be at least 2");
        }
        if self.training.epochs == 0 {
            bail!("training.epochs must be greater than 0");
        }
        if self.training.batch_size == 0 {
            bail!("training.batch_size must be greater than 0");
        }
        let lr = self.training.learning_rate;
        if !lr.is_finite() || lr <= 0.0 {
            bail!(
                "training.learning_rate must be positive (got {})",
                lr
            );
        }
        if self.training.weight_decay < 0.0 {
            bail!("training.weight_decay must not be negative");
        }
        Ok(())
    }
}
