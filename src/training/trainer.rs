// Training loop - epochs of shuffled batches, one AdamW step per batch

use anyhow::{Context, Result};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::loss::causal_lm_loss;
use crate::config::TrainingSettings;
use crate::data::{batches_per_epoch, epoch_batches, Batch, Batcher, RemoteTextDataset};
use crate::models::CausalLanguageModel;

/// Loss observed at one optimizer step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// 1-based epoch
    pub epoch: usize,
    /// 1-based step across the whole run
    pub step: usize,
    pub loss: f32,
}

/// Outcome of a full training run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingReport {
    pub epochs: usize,
    pub steps: Vec<StepRecord>,
    pub duration_secs: f64,
}

impl TrainingReport {
    pub fn final_loss(&self) -> Option<f32> {
        self.steps.last().map(|s| s.loss)
    }

    pub fn epoch_mean_loss(&self, epoch: usize) -> Option<f32> {
        let losses: Vec<f32> = self
            .steps
            .iter()
            .filter(|s| s.epoch == epoch)
            .map(|s| s.loss)
            .collect();
        if losses.is_empty() {
            None
        } else {
            Some(losses.iter().sum::<f32>() / losses.len() as f32)
        }
    }
}

/// Owns the model and its optimizer for the duration of a run
pub struct Trainer<M: CausalLanguageModel> {
    model: M,
    optimizer: AdamW,
    batcher: Batcher,
    rng: StdRng,
    epochs: usize,
    batch_size: usize,
    show_progress: bool,
}

impl<M: CausalLanguageModel> Trainer<M> {
    pub fn new(model: M, settings: &TrainingSettings) -> Result<Self> {
        let params = ParamsAdamW {
            lr: settings.learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: settings.weight_decay,
        };
        let optimizer =
            AdamW::new(model.trainable_vars(), params).context("Failed to create AdamW optimizer")?;

        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            batcher: Batcher::new(model.device().clone()),
            model,
            optimizer,
            rng,
            epochs: settings.epochs,
            batch_size: settings.batch_size,
            show_progress: settings.progress,
        })
    }

    /// Run every epoch over `dataset`, printing one loss line per batch.
    ///
    /// Any error aborts the run; the model is left as of the last completed step.
    pub fn train(&mut self, dataset: &RemoteTextDataset) -> Result<TrainingReport> {
        let start = Instant::now();
        let per_epoch = batches_per_epoch(dataset.len(), self.batch_size);

        if dataset.is_empty() {
            tracing::warn!("Dataset is empty, no optimizer steps will run");
        }

        tracing::info!(
            model = self.model.name(),
            records = dataset.len(),
            epochs = self.epochs,
            batch_size = self.batch_size,
            batches_per_epoch = per_epoch,
            "Starting training"
        );

        let mut report = TrainingReport {
            epochs: self.epochs,
            steps: Vec::with_capacity(self.epochs * per_epoch),
            duration_secs: 0.0,
        };

        for epoch in 1..=self.epochs {
            let progress = self.progress_bar(epoch, per_epoch);

            for indices in epoch_batches(dataset.len(), self.batch_size, &mut self.rng) {
                let batch = self
                    .batcher
                    .load(dataset, &indices)
                    .with_context(|| format!("Failed to build batch in epoch {}", epoch))?;

                let loss = self
                    .train_step(&batch)
                    .with_context(|| format!("Training step failed in epoch {}", epoch))?;

                let step = report.steps.len() + 1;
                report.steps.push(StepRecord { epoch, step, loss });

                let line = loss_line(epoch, loss);
                if progress.is_hidden() {
                    println!("{}", line);
                } else {
                    progress.println(line);
                }
                progress.inc(1);

                tracing::debug!(epoch, step, loss, batch_size = batch.size(), "Optimizer step");
            }

            progress.finish_and_clear();

            if let Some(mean) = report.epoch_mean_loss(epoch) {
                tracing::info!(epoch, mean_loss = mean, "Epoch complete");
            }
        }

        report.duration_secs = start.elapsed().as_secs_f64();

        tracing::info!(
            steps = report.steps.len(),
            final_loss = ?report.final_loss(),
            duration_secs = report.duration_secs,
            "Training complete"
        );

        Ok(report)
    }

    /// Forward, loss, backward and one optimizer update
    fn train_step(&mut self, batch: &Batch) -> Result<f32> {
        let logits = self.model.forward(&batch.input_ids)?;
        let loss = causal_lm_loss(&logits, &batch.input_ids, &batch.attention_mask)?;
        let loss_value = loss.to_scalar::<f32>()?;

        if !loss_value.is_finite() {
            tracing::warn!(loss = loss_value, "Non-finite loss");
        }

        // Gradients come from a fresh store each step; nothing accumulates
        let grads = loss.backward().context("Backward pass failed")?;
        self.optimizer.step(&grads).context("Optimizer step failed")?;

        Ok(loss_value)
    }

    fn progress_bar(&self, epoch: usize, batches: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let bar = ProgressBar::with_draw_target(Some(batches as u64), ProgressDrawTarget::stderr());
        if let Ok(style) =
            ProgressStyle::default_bar().template("  {prefix} {bar:40.green/black} {pos}/{len} [{elapsed}<{eta}]")
        {
            bar.set_style(style);
        }
        bar.set_prefix(format!("epoch {}/{}", epoch, self.epochs));
        bar
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }
}

/// Console line printed after every optimizer step
pub fn loss_line(epoch: usize, loss: f32) -> String {
    format!("Epoch {}, Loss: {}", epoch, loss)
}
