// Self-supervised language-modeling loss

use anyhow::{bail, Result};
use candle_core::{DType, Tensor, D};

/// Mean next-token cross-entropy with labels = input ids.
///
/// Position `t` of `logits` is scored against token `t + 1` of `input_ids`.
/// Targets whose attention mask is 0 (padding) do not contribute; if a batch
/// has no real targets at all the loss is 0.
///
/// * `logits` - [batch, seq_len, vocab]
/// * `input_ids` - [batch, seq_len], u32
/// * `attention_mask` - [batch, seq_len], 1 = real token
pub fn causal_lm_loss(logits: &Tensor, input_ids: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let (batch, seq_len, _vocab) = logits.dims3()?;
    if input_ids.dims() != [batch, seq_len] || attention_mask.dims() != [batch, seq_len] {
        bail!(
            "Shape mismatch: logits {:?}, input_ids {:?}, attention_mask {:?}",
            logits.dims(),
            input_ids.dims(),
            attention_mask.dims()
        );
    }
    if seq_len < 2 {
        bail!("Need at least two positions for a next-token loss (got {})", seq_len);
    }

    let shifted = seq_len - 1;
    let logits = logits.narrow(1, 0, shifted)?.contiguous()?;
    let targets = input_ids.narrow(1, 1, shifted)?.contiguous()?;
    let mask = attention_mask
        .narrow(1, 1, shifted)?
        .to_dtype(DType::F32)?;

    let log_probs = candle_nn::ops::log_softmax(&logits, D::Minus1)?;
    let target_log_probs = log_probs.gather(&targets.unsqueeze(2)?, 2)?.squeeze(2)?;

    let masked_nll = (target_log_probs.neg()? * &mask)?.sum_all()?;
    let real_targets = mask.sum_all()?.to_scalar::<f32>()?;

    Ok((masked_nll / f64::from(real_targets.max(1.0)))?)
}
