// Batching - shuffled epoch order and tensor stacking
//
// All examples are already padded to the same length, so a batch is just
// the row-major concatenation of its examples reshaped to [batch, seq_len].

use anyhow::{bail, Context, Result};
use candle_core::{Device, Tensor};
use rand::seq::SliceRandom;
use rand::Rng;

use super::dataset::{EncodedExample, RemoteTextDataset};

/// A stacked group of encoded examples on the training device
#[derive(Debug, Clone)]
pub struct Batch {
    /// [batch_size, seq_len], u32
    pub input_ids: Tensor,
    /// [batch_size, seq_len], u32 (1 = real token, 0 = padding)
    pub attention_mask: Tensor,
}

impl Batch {
    pub fn size(&self) -> usize {
        self.input_ids.dims().first().copied().unwrap_or(0)
    }
}

/// Turns encoded examples into device tensors
#[derive(Debug, Clone)]
pub struct Batcher {
    device: Device,
}

impl Batcher {
    pub fn new(device: Device) -> Self {
        Self { device }
    }

    pub fn batch(&self, examples: &[EncodedExample]) -> Result<Batch> {
        let Some(first) = examples.first() else {
            bail!("Cannot build a batch from zero examples");
        };
        let seq_len = first.input_ids.len();

        let mut ids = Vec::with_capacity(examples.len() * seq_len);
        let mut mask = Vec::with_capacity(examples.len() * seq_len);
        for (i, example) in examples.iter().enumerate() {
            if example.input_ids.len() != seq_len || example.attention_mask.len() != seq_len {
                bail!(
                    "Example {} has length {} but batch length is {}",
                    i,
                    example.input_ids.len(),
                    seq_len
                );
            }
            ids.extend_from_slice(&example.input_ids);
            mask.extend_from_slice(&example.attention_mask);
        }

        let shape = (examples.len(), seq_len);
        let input_ids =
            Tensor::from_vec(ids, shape, &self.device).context("Failed to build input_ids")?;
        let attention_mask =
            Tensor::from_vec(mask, shape, &self.device).context("Failed to build attention_mask")?;

        Ok(Batch {
            input_ids,
            attention_mask,
        })
    }

    /// Encode the given dataset indices and stack them
    pub fn load(&self, dataset: &RemoteTextDataset, indices: &[usize]) -> Result<Batch> {
        let examples = indices
            .iter()
            .map(|&i| dataset.get(i))
            .collect::<Result<Vec<_>>>()?;
        self.batch(&examples)
    }
}

/// Shuffle `0..len` and split into chunks of `batch_size`; the last may be short.
pub fn epoch_batches<R: Rng + ?Sized>(len: usize, batch_size: usize, rng: &mut R) -> Vec<Vec<usize>> {
    let mut order: Vec<usize> = (0..len).collect();
    order.shuffle(rng);
    order
        .chunks(batch_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Batches per epoch for a dataset of `len` records
pub fn batches_per_epoch(len: usize, batch_size: usize) -> usize {
    len.div_ceil(batch_size.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn example(ids: &[u32], mask: &[u32]) -> EncodedExample {
        EncodedExample {
            input_ids: ids.to_vec(),
            attention_mask: mask.to_vec(),
        }
    }

    #[test]
    fn test_batch_shapes() {
        let batcher = Batcher::new(Device::Cpu);
        let batch = batcher
            .batch(&[example(&[1, 2, 0], &[1, 1, 0]), example(&[3, 0, 0], &[1, 0, 0])])
            .unwrap();

        assert_eq!(batch.input_ids.dims(), &[2, 3]);
        assert_eq!(batch.attention_mask.dims(), &[2, 3]);
        assert_eq!(batch.size(), 2);
        assert_eq!(
            batch.input_ids.to_vec2::<u32>().unwrap(),
            vec![vec![1, 2, 0], vec![3, 0, 0]]
        );
    }

    #[test]
    fn test_ragged_examples_are_rejected() {
        let batcher = Batcher::new(Device::Cpu);
        let result = batcher.batch(&[example(&[1, 2], &[1, 1]), example(&[3], &[1])]);
        assert!(result.is_err());
        assert!(batcher.batch(&[]).is_err());
    }

    #[test]
    fn test_epoch_batches_cover_every_index_once() {
        let mut rng = StdRng::seed_from_u64(42);
        let batches = epoch_batches(10, 4, &mut rng);

        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].len(), 2);

        let mut seen: Vec<usize> = batches.into_iter().flatten().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_same_seed_same_order() {
        let a = epoch_batches(16, 4, &mut StdRng::seed_from_u64(7));
        let b = epoch_batches(16, 4, &mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
    }

    #[test]
    fn test_batches_per_epoch() {
        assert_eq!(batches_per_epoch(0, 4), 0);
        assert_eq!(batches_per_epoch(4, 4), 1);
        assert_eq!(batches_per_epoch(5, 4), 2);
    }
}
