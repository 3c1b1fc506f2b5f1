// Persistence - write the fine-tuned model to a fixed directory
//
// Files are overwritten in place. There is no versioning and no atomic
// rename, so a crash mid-save can leave a partial artifact.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::trainer::TrainingReport;
use crate::models::CausalLanguageModel;

pub const WEIGHTS_FILE: &str = "model.safetensors";
pub const CONFIG_FILE: &str = "config.json";
pub const SUMMARY_FILE: &str = "training_summary.json";

/// Metadata written next to the weights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub model: String,
    pub saved_at: DateTime<Utc>,
    pub epochs: usize,
    pub steps: usize,
    pub final_loss: Option<f32>,
    pub duration_secs: f64,
    pub weights_path: PathBuf,
}

/// Save weights, config and run summary into `dir`, creating it if needed
pub fn save_pretrained<M: CausalLanguageModel>(
    model: &M,
    dir: &Path,
    report: &TrainingReport,
) -> Result<TrainingSummary> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {:?}", dir))?;

    let weights_path = dir.join(WEIGHTS_FILE);
    model
        .save_weights(&weights_path)
        .context("Failed to save model weights")?;

    let config_path = dir.join(CONFIG_FILE);
    let config_json = serde_json::to_string_pretty(&model.config_json())
        .context("Failed to serialize model config")?;
    fs::write(&config_path, config_json)
        .with_context(|| format!("Failed to write model config: {:?}", config_path))?;

    let summary = TrainingSummary {
        model: model.name().to_string(),
        saved_at: Utc::now(),
        epochs: report.epochs,
        steps: report.steps.len(),
        final_loss: report.final_loss(),
        duration_secs: report.duration_secs,
        weights_path: weights_path.clone(),
    };

    let summary_path = dir.join(SUMMARY_FILE);
    let summary_json =
        serde_json::to_string_pretty(&summary).context("Failed to serialize training summary")?;
    fs::write(&summary_path, summary_json)
        .with_context(|| format!("Failed to write training summary: {:?}", summary_path))?;

    tracing::info!(
        dir = %dir.display(),
        steps = summary.steps,
        final_loss = ?summary.final_loss,
        "Saved fine-tuned model"
    );

    Ok(summary)
}

/// Read back the summary of a previous save
pub fn load_summary(dir: &Path) -> Result<TrainingSummary> {
    let path = dir.join(SUMMARY_FILE);
    let json = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read training summary: {:?}", path))?;
    serde_json::from_str(&json).context("Failed to parse training summary JSON")
}
