// Training module - loss, loop and persistence

pub mod loss;
pub mod persistence;
pub mod trainer;

pub use loss::causal_lm_loss;
pub use persistence::{load_summary, save_pretrained, TrainingSummary};
pub use trainer::{loss_line, StepRecord, Trainer, TrainingReport};
