// finetune - fine-tune a pretrained causal LM on text served over HTTP
// Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::prelude::*;

use finetune::config::{load_config, Config};
use finetune::data::{RemoteSource, RemoteTextDataset};
use finetune::errors::{
    fetch_failed_error, model_loading_error, wrap_error_with_suggestion, UserFriendlyError,
};
use finetune::models::{select_device, DevicePreference, LlamaCausalLm, ModelFiles, TextEncoder};
use finetune::training::{save_pretrained, Trainer, TrainingSummary};

#[derive(Parser, Debug)]
#[command(name = "finetune")]
#[command(about = "Fine-tune a pretrained causal LM on text fetched over HTTP", version)]
struct Args {
    /// Path to a TOML config file (default: ./finetune.toml, then ~/.finetune/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Endpoint returning {"data": [{"value": "..."}]}
    #[arg(long = "fetch-url")]
    fetch_url: Option<String>,

    /// HuggingFace repository ID or local model directory
    #[arg(long)]
    model: Option<String>,

    /// Hub revision (branch, tag or commit)
    #[arg(long)]
    revision: Option<String>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long = "batch-size")]
    batch_size: Option<usize>,

    #[arg(long = "learning-rate")]
    learning_rate: Option<f64>,

    /// Tokens per example (truncate/pad)
    #[arg(long = "max-length")]
    max_length: Option<usize>,

    /// Directory for model.safetensors and config.json
    #[arg(long = "output-dir")]
    output_dir: Option<PathBuf>,

    /// Seed for the per-epoch shuffle
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, value_enum)]
    device: Option<DevicePreference>,

    /// Disable the per-epoch progress bar
    #[arg(long = "no-progress")]
    no_progress: bool,
}

impl Args {
    /// Command-line flags win over the config file
    fn apply(&self, config: &mut Config) {
        if let Some(url) = &self.fetch_url {
            config.data.fetch_url = url.clone();
        }
        if let Some(model) = &self.model {
            config.model.name = model.clone();
        }
        if let Some(revision) = &self.revision {
            config.model.revision = Some(revision.clone());
        }
        if let Some(epochs) = self.epochs {
            config.training.epochs = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            config.training.batch_size = batch_size;
        }
        if let Some(lr) = self.learning_rate {
            config.training.learning_rate = lr;
        }
        if let Some(max_length) = self.max_length {
            config.model.max_length = max_length;
        }
        if let Some(dir) = &self.output_dir {
            config.output.dir = dir.clone();
        }
        if let Some(seed) = self.seed {
            config.training.seed = Some(seed);
        }
        if let Some(device) = self.device {
            config.model.device = device;
        }
        if self.no_progress {
            config.training.progress = false;
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    run(config).await
}

/// Fetch → tokenize → train → save. Every error is fatal.
async fn run(config: Config) -> Result<()> {
    let device = select_device(config.model.device)?;

    // hf-hub's sync API blocks on network I/O
    let name = config.model.name.clone();
    let revision = config.model.revision.clone();
    let files = tokio::task::spawn_blocking(move || ModelFiles::resolve(&name, revision.as_deref()))
        .await
        .context("Model resolution task panicked")?
        .user_context(&model_loading_error(&config.model.name))?;

    let encoder = TextEncoder::from_file(
        &files.tokenizer,
        config.model.max_length,
        config.model.pad_token.as_deref(),
    )?;

    let source = RemoteSource::new(config.data.fetch_url.as_str())?;
    let dataset = match RemoteTextDataset::fetch(&source, encoder).await {
        Ok(dataset) => dataset,
        Err(e) => {
            let hint = fetch_failed_error(source.url(), e.status());
            return Err(anyhow::Error::new(e).context(hint));
        }
    };

    let training = config.training.clone();
    let output_dir = config.output.dir.clone();
    let max_length = config.model.max_length;
    let model_name = config.model.name.clone();

    let summary = tokio::task::spawn_blocking(move || -> Result<TrainingSummary> {
        let model = LlamaCausalLm::load(&files, &device, max_length)
            .user_context(&model_loading_error(&model_name))?;

        let mut trainer = Trainer::new(model, &training)?;
        let report = trainer.train(&dataset)?;
        let model = trainer.into_model();

        save_pretrained(&model, &output_dir, &report).with_context(|| {
            wrap_error_with_suggestion(
                format!("Failed to save model to {}", output_dir.display()),
                "check that the output directory is writable and has free space",
            )
        })
    })
    .await
    .context("Training task panicked")??;

    println!(
        "Saved fine-tuned model to {}",
        summary.weights_path.display()
    );
    Ok(())
}

/// Structured logs go to stderr so stdout carries only the per-batch loss lines
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("finetune=info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Bridge log crate → tracing (hf-hub and reqwest log through it)
    tracing_log::LogTracer::init().ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "finetune",
            "--fetch-url",
            "http://127.0.0.1:9000/api/v1/load",
            "--epochs",
            "2",
            "--batch-size",
            "8",
            "--device",
            "cpu",
            "--no-progress",
        ]);
        let mut config = Config::default();
        args.apply(&mut config);

        assert_eq!(config.data.fetch_url, "http://127.0.0.1:9000/api/v1/load");
        assert_eq!(config.training.epochs, 2);
        assert_eq!(config.training.batch_size, 8);
        assert_eq!(config.model.device, DevicePreference::Cpu);
        assert!(!config.training.progress);
        assert_eq!(config.training.learning_rate, 5e-5);
    }

    #[test]
    fn test_no_flags_keep_defaults() {
        let args = Args::parse_from(["finetune"]);
        let mut config = Config::default();
        args.apply(&mut config);
        assert_eq!(config.model.max_length, 512);
        assert!(config.training.progress);
    }
}
