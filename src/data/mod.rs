// Data module - remote fetch, lazy encoding and batching

pub mod batcher;
pub mod dataset;
pub mod source;

pub use batcher::{batches_per_epoch, epoch_batches, Batch, Batcher};
pub use dataset::{EncodedExample, RemoteTextDataset};
pub use source::{FetchError, RemoteSource};
