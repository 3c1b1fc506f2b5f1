// Causal LM - trainable Llama-family model backed by a VarMap
//
// Weights live in candle `Var`s so AdamW can update them in place. The
// llama2_c implementation is used because it returns logits for every
// position, which the language-modeling loss needs.
//
// llama2_c rotates interleaved (even, odd) pairs while HF checkpoints store
// q_proj/k_proj rows in half-rotation order. Rows are reordered on load and
// restored on save so files on disk always use the HF layout.

use anyhow::{anyhow, bail, Context, Result};
use candle_core::safetensors::MmapedSafetensors;
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};
use candle_transformers::models::llama2_c::{Cache, Config as LlamaConfig, Llama};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::common::device_label;
use super::download::ModelFiles;

const LM_HEAD: &str = "lm_head.weight";
const EMBED_TOKENS: &str = "model.embed_tokens.weight";
const Q_PROJ_SUFFIX: &str = "self_attn.q_proj.weight";
const K_PROJ_SUFFIX: &str = "self_attn.k_proj.weight";
const LLAMA2_C_ROPE_THETA: f64 = 10_000.0;

/// Model interface used by the training loop
pub trait CausalLanguageModel {
    /// Next-token logits for every position: [batch, seq_len, vocab]
    fn forward(&mut self, input_ids: &Tensor) -> Result<Tensor>;

    /// Variables updated by the optimizer
    fn trainable_vars(&self) -> Vec<Var>;

    /// Device the parameters live on
    fn device(&self) -> &Device;

    /// Model name (for logs and the training summary)
    fn name(&self) -> &str;

    /// Write every variable to a safetensors file
    fn save_weights(&self, path: &Path) -> Result<()>;

    /// `config.json` contents to persist next to the weights
    fn config_json(&self) -> serde_json::Value;
}

/// The subset of a HuggingFace Llama `config.json` needed to build the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlamaHubConfig {
    pub hidden_size: usize,
    pub intermediate_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    #[serde(default)]
    pub num_key_value_heads: Option<usize>,
    pub vocab_size: usize,
    #[serde(default = "default_rms_norm_eps")]
    pub rms_norm_eps: f64,
    #[serde(default)]
    pub max_position_embeddings: Option<usize>,
    #[serde(default)]
    pub tie_word_embeddings: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rope_theta: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rope_scaling: Option<serde_json::Value>,
}

fn default_rms_norm_eps() -> f64 {
    1e-5
}

impl LlamaHubConfig {
    /// Convert to the model config, sizing rotary tables and masks for `seq_len`
    pub fn to_model_config(&self, seq_len: usize) -> Result<LlamaConfig> {
        let n_kv_heads = self.num_key_value_heads.unwrap_or(self.num_attention_heads);

        if self.num_attention_heads == 0 || self.hidden_size % self.num_attention_heads != 0 {
            bail!(
                "hidden_size {} is not divisible by num_attention_heads {}",
                self.hidden_size,
                self.num_attention_heads
            );
        }
        if n_kv_heads == 0 || self.num_attention_heads % n_kv_heads != 0 {
            bail!(
                "num_attention_heads {} is not divisible by num_key_value_heads {}",
                self.num_attention_heads,
                n_kv_heads
            );
        }
        if let Some(theta) = self.rope_theta {
            if (theta - LLAMA2_C_ROPE_THETA).abs() > 1e-6 {
                bail!(
                    "rope_theta {} is not supported (only {} is)",
                    theta,
                    LLAMA2_C_ROPE_THETA
                );
            }
        }
        if self.rope_scaling.is_some() {
            bail!("rope_scaling is not supported");
        }
        if let Some(max_pos) = self.max_position_embeddings {
            if seq_len > max_pos {
                tracing::warn!(
                    seq_len,
                    max_position_embeddings = max_pos,
                    "max_length exceeds the model's trained context"
                );
            }
        }

        Ok(LlamaConfig {
            dim: self.hidden_size,
            hidden_dim: self.intermediate_size,
            n_layers: self.num_hidden_layers,
            n_heads: self.num_attention_heads,
            n_kv_heads,
            vocab_size: self.vocab_size,
            seq_len,
            norm_eps: self.rms_norm_eps,
        })
    }

    /// HF-style `config.json` for a model built from this struct alone
    pub fn to_json(&self) -> serde_json::Value {
        let mut json = serde_json::to_value(self).unwrap_or_default();
        if let Some(map) = json.as_object_mut() {
            map.insert("model_type".into(), "llama".into());
            map.insert("architectures".into(), serde_json::json!(["LlamaForCausalLM"]));
        }
        json
    }
}

/// Llama causal LM with trainable parameters
pub struct LlamaCausalLm {
    model: Llama,
    varmap: VarMap,
    cache: Cache,
    config_json: serde_json::Value,
    n_heads: usize,
    n_kv_heads: usize,
    device: Device,
    name: String,
}

impl LlamaCausalLm {
    /// Load pretrained weights resolved by [`ModelFiles`]
    pub fn load(files: &ModelFiles, device: &Device, max_length: usize) -> Result<Self> {
        tracing::info!(
            model = %files.source,
            device = device_label(device),
            shards = files.weights.len(),
            "Loading causal LM"
        );

        let raw = fs::read_to_string(&files.config)
            .with_context(|| format!("Failed to read {}", files.config.display()))?;
        let config_json: serde_json::Value =
            serde_json::from_str(&raw).context("Failed to parse config.json")?;

        if let Some(model_type) = config_json.get("model_type").and_then(|v| v.as_str()) {
            if model_type != "llama" {
                tracing::warn!(model_type, "Model is not tagged as llama, loading may fail");
            }
        }

        let hub_config: LlamaHubConfig = serde_json::from_value(config_json.clone())
            .context("config.json is missing required Llama fields")?;

        let lm = Self::build(&hub_config, config_json, device, max_length, &files.source)?;
        lm.load_weights(&files.weights)?;

        tracing::info!(
            parameters = lm.num_parameters(),
            "✓ Causal LM loaded"
        );
        Ok(lm)
    }

    /// Randomly initialised model (no pretrained weights)
    pub fn from_config(hub_config: &LlamaHubConfig, device: &Device, max_length: usize) -> Result<Self> {
        Self::build(
            hub_config,
            hub_config.to_json(),
            device,
            max_length,
            "llama (random init)",
        )
    }

    fn build(
        hub_config: &LlamaHubConfig,
        config_json: serde_json::Value,
        device: &Device,
        max_length: usize,
        name: &str,
    ) -> Result<Self> {
        let config = hub_config.to_model_config(max_length)?;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = Llama::load(vb, config.clone()).context("Failed to build Llama model")?;

        // Rotary tables are computed, never trained: give the cache an empty
        // backend so it falls back to its precomputed values.
        let rope_vb = VarBuilder::from_tensors(HashMap::new(), DType::F32, device);
        let cache = Cache::new(false, &config, rope_vb).context("Failed to create rotary cache")?;

        Ok(Self {
            model,
            varmap,
            cache,
            config_json,
            n_heads: config.n_heads,
            n_kv_heads: config.n_kv_heads,
            device: device.clone(),
            name: name.to_string(),
        })
    }

    /// Copy checkpoint tensors into the model's variables
    fn load_weights(&self, paths: &[PathBuf]) -> Result<()> {
        if paths.is_empty() {
            bail!("No weight files to load");
        }

        // The files must not change while mapped
        let tensors = unsafe { MmapedSafetensors::multi(paths) }
            .context("Failed to map safetensors weights")?;

        let vars = self
            .varmap
            .data()
            .lock()
            .map_err(|_| anyhow!("Model variable map lock poisoned"))?;

        for (name, var) in vars.iter() {
            let tensor = match tensors.load(name, &self.device) {
                Ok(tensor) => tensor,
                Err(_) if name == LM_HEAD => {
                    tracing::debug!("No lm_head in checkpoint, tying to embed_tokens");
                    tensors
                        .load(EMBED_TOKENS, &self.device)
                        .context("Checkpoint has neither lm_head nor embed_tokens")?
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Checkpoint is missing tensor {}", name));
                }
            };

            if tensor.dims() != var.dims() {
                bail!(
                    "Checkpoint tensor {} has shape {:?}, expected {:?}",
                    name,
                    tensor.dims(),
                    var.dims()
                );
            }

            let tensor = match self.rotary_heads(name) {
                Some(heads) => interleave_rotary_rows(&tensor, heads)?,
                None => tensor,
            };
            var.set(&tensor.to_dtype(var.dtype())?)
                .with_context(|| format!("Failed to set variable {}", name))?;
        }

        tracing::debug!(tensors = vars.len(), "Copied checkpoint into variables");
        Ok(())
    }

    pub fn num_parameters(&self) -> usize {
        self.varmap.all_vars().iter().map(|v| v.elem_count()).sum()
    }

    /// Head count for projections whose rows carry rotary pairs
    fn rotary_heads(&self, name: &str) -> Option<usize> {
        if name.ends_with(Q_PROJ_SUFFIX) {
            Some(self.n_heads)
        } else if name.ends_with(K_PROJ_SUFFIX) {
            Some(self.n_kv_heads)
        } else {
            None
        }
    }

    /// Snapshot of every variable in the HF layout
    fn hub_tensors(&self) -> Result<HashMap<String, Tensor>> {
        let vars = self
            .varmap
            .data()
            .lock()
            .map_err(|_| anyhow!("Model variable map lock poisoned"))?;

        vars.iter()
            .map(|(name, var)| {
                let tensor = var.as_tensor().detach();
                let tensor = match self.rotary_heads(name) {
                    Some(heads) => half_rotation_rows(&tensor, heads)?,
                    None => tensor,
                };
                Ok((name.clone(), tensor))
            })
            .collect()
    }
}

/// HF half-rotation rows `[h, 2, d/2]` to interleaved rows `[h, d/2, 2]`
fn interleave_rotary_rows(weight: &Tensor, n_heads: usize) -> Result<Tensor> {
    let (rows, cols) = weight.dims2()?;
    let half = rows / n_heads / 2;
    Ok(weight
        .reshape((n_heads, 2, half, cols))?
        .transpose(1, 2)?
        .contiguous()?
        .reshape((rows, cols))?)
}

/// Inverse of [`interleave_rotary_rows`]
fn half_rotation_rows(weight: &Tensor, n_heads: usize) -> Result<Tensor> {
    let (rows, cols) = weight.dims2()?;
    let half = rows / n_heads / 2;
    Ok(weight
        .reshape((n_heads, half, 2, cols))?
        .transpose(1, 2)?
        .contiguous()?
        .reshape((rows, cols))?)
}

impl CausalLanguageModel for LlamaCausalLm {
    fn forward(&mut self, input_ids: &Tensor) -> Result<Tensor> {
        self.model
            .forward(input_ids, 0, &mut self.cache)
            .with_context(|| {
                format!(
                    "Forward pass failed on {} device. Input shape: {:?}",
                    device_label(&self.device),
                    input_ids.dims()
                )
            })
    }

    fn trainable_vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn save_weights(&self, path: &Path) -> Result<()> {
        let tensors = self.hub_tensors()?;
        candle_core::safetensors::save(&tensors, path)
            .with_context(|| format!("Failed to write weights to {}", path.display()))
    }

    fn config_json(&self) -> serde_json::Value {
        self.config_json.clone()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::tiny_config;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_forward_returns_logits_for_every_position() {
        let mut lm = LlamaCausalLm::from_config(&tiny_config(12), &Device::Cpu, 6).unwrap();
        let input = Tensor::new(&[[1u32, 2, 3, 0, 0, 0], [4, 5, 0, 0, 0, 0]], &Device::Cpu).unwrap();

        let logits = lm.forward(&input).unwrap();
        assert_eq!(logits.dims(), &[2, 6, 12]);
    }

    #[test]
    fn test_config_conversion_defaults_kv_heads() {
        let mut hub = tiny_config(10);
        hub.num_key_value_heads = None;
        let config = hub.to_model_config(8).unwrap();
        assert_eq!(config.n_kv_heads, 2);
        assert_eq!(config.seq_len, 8);
    }

    #[test]
    fn test_config_rejects_indivisible_heads() {
        let mut hub = tiny_config(10);
        hub.num_attention_heads = 3;
        assert!(hub.to_model_config(8).is_err());
    }

    #[test]
    fn test_hub_config_parses_hf_json() {
        let json = r#"{
            "architectures": ["LlamaForCausalLM"],
            "hidden_size": 8192, "intermediate_size": 28672,
            "num_hidden_layers": 80, "num_attention_heads": 64,
            "num_key_value_heads": 8, "vocab_size": 32000,
            "rms_norm_eps": 1e-5, "max_position_embeddings": 4096,
            "model_type": "llama"
        }"#;
        let hub: LlamaHubConfig = serde_json::from_str(json).unwrap();
        assert_eq!(hub.num_key_value_heads, Some(8));
        assert!(!hub.tie_word_embeddings);
    }

    #[test]
    fn test_weights_roundtrip_through_safetensors() {
        let temp_dir = TempDir::new().unwrap();
        let source = LlamaCausalLm::from_config(&tiny_config(12), &Device::Cpu, 4).unwrap();
        let weights = temp_dir.path().join("model.safetensors");
        source.save_weights(&weights).unwrap();

        let mut target = LlamaCausalLm::from_config(&tiny_config(12), &Device::Cpu, 4).unwrap();
        target.load_weights(&[weights]).unwrap();

        let input = Tensor::new(&[[1u32, 2, 3, 4]], &Device::Cpu).unwrap();
        let mut source = source;
        let a = source.forward(&input).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let b = target.forward(&input).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_lm_head_ties_to_embeddings() {
        let temp_dir = TempDir::new().unwrap();
        let weights = temp_dir.path().join("model.safetensors");

        let source = LlamaCausalLm::from_config(&tiny_config(12), &Device::Cpu, 4).unwrap();
        let mut tensors: HashMap<String, Tensor> = source
            .varmap
            .data()
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.as_tensor().clone()))
            .collect();
        tensors.remove(LM_HEAD);
        candle_core::safetensors::save(&tensors, &weights).unwrap();

        let target = LlamaCausalLm::from_config(&tiny_config(12), &Device::Cpu, 4).unwrap();
        target.load_weights(&[weights]).unwrap();

        let vars = target.varmap.data().lock().unwrap();
        let head = vars[LM_HEAD].as_tensor().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let embed = vars[EMBED_TOKENS].as_tensor().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(head, embed);
    }

    #[test]
    fn test_config_rejects_unsupported_rope() {
        let mut hub = tiny_config(10);
        hub.rope_theta = Some(10_000.0);
        assert!(hub.to_model_config(8).is_ok());

        hub.rope_theta = Some(500_000.0);
        let err = hub.to_model_config(8).unwrap_err();
        assert!(err.to_string().contains("rope_theta"));

        let mut hub = tiny_config(10);
        hub.rope_scaling = Some(serde_json::json!({"type": "linear", "factor": 2.0}));
        assert!(hub.to_model_config(8).is_err());
    }

    #[test]
    fn test_rotary_row_reorder_is_invertible() {
        let weight = Tensor::arange(0f32, 32., &Device::Cpu)
            .unwrap()
            .reshape((8, 4))
            .unwrap();
        let interleaved = interleave_rotary_rows(&weight, 2).unwrap();

        // Head 0 rows [0,1,2,3] (halves [0,1] and [2,3]) become pairs (0,2), (1,3)
        let first_column = interleaved.narrow(1, 0, 1).unwrap().flatten_all().unwrap();
        assert_eq!(
            first_column.to_vec1::<f32>().unwrap(),
            vec![0., 8., 4., 12., 16., 24., 20., 28.]
        );

        let restored = half_rotation_rows(&interleaved, 2).unwrap();
        assert_eq!(
            restored.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
            weight.flatten_all().unwrap().to_vec1::<f32>().unwrap()
        );
    }

    /// Write a checkpoint in the HF layout using candle's HF Llama, returning it
    fn write_hub_checkpoint(
        dir: &Path,
        hub: &LlamaHubConfig,
    ) -> candle_transformers::models::llama::Llama {
        use candle_transformers::models::llama;

        let json = hub.to_json();
        fs::write(dir.join("config.json"), json.to_string()).unwrap();
        fs::write(dir.join("tokenizer.json"), "{}").unwrap();

        let config: llama::LlamaConfig = serde_json::from_value(json).unwrap();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = llama::Llama::load(vb, &config.into_config(false)).unwrap();
        varmap.save(dir.join("model.safetensors")).unwrap();
        model
    }

    #[test]
    fn test_hub_checkpoint_matches_hf_llama_logits() {
        use candle_core::IndexOp;
        use candle_transformers::models::llama;

        let temp_dir = TempDir::new().unwrap();
        let mut hub = tiny_config(12);
        hub.num_key_value_heads = Some(1);
        let reference = write_hub_checkpoint(temp_dir.path(), &hub);

        let config: llama::LlamaConfig = serde_json::from_value(hub.to_json()).unwrap();
        let config = config.into_config(false);
        let mut cache = llama::Cache::new(false, DType::F32, &config, &Device::Cpu).unwrap();

        let input = Tensor::new(&[[1u32, 5, 2, 7, 3, 9]], &Device::Cpu).unwrap();
        let expected = reference
            .forward(&input, 0, &mut cache)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();

        let files = ModelFiles::from_dir(temp_dir.path()).unwrap();
        let mut lm = LlamaCausalLm::load(&files, &Device::Cpu, 6).unwrap();
        let actual = lm
            .forward(&input)
            .unwrap()
            .i((.., 5, ..))
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();

        assert_eq!(actual.len(), expected.len());
        let max_diff = actual
            .iter()
            .zip(&expected)
            .map(|(a, b)| (a - b).abs())
            .fold(0f32, f32::max);
        assert!(max_diff < 1e-4, "logits differ from HF Llama by {}", max_diff);
    }

    #[test]
    fn test_save_writes_hub_layout() {
        let temp_dir = TempDir::new().unwrap();
        let mut hub = tiny_config(12);
        hub.num_key_value_heads = Some(1);
        write_hub_checkpoint(temp_dir.path(), &hub);

        let files = ModelFiles::from_dir(temp_dir.path()).unwrap();
        let lm = LlamaCausalLm::load(&files, &Device::Cpu, 4).unwrap();
        let saved = temp_dir.path().join("saved.safetensors");
        lm.save_weights(&saved).unwrap();

        let original = candle_core::safetensors::load(&files.weights[0], &Device::Cpu).unwrap();
        let resaved = candle_core::safetensors::load(&saved, &Device::Cpu).unwrap();
        assert_eq!(original.len(), resaved.len());
        for name in [
            "model.layers.0.self_attn.q_proj.weight",
            "model.layers.0.self_attn.k_proj.weight",
        ] {
            let a = original[name].flatten_all().unwrap().to_vec1::<f32>().unwrap();
            let b = resaved[name].flatten_all().unwrap().to_vec1::<f32>().unwrap();
            assert_eq!(a, b, "{} changed across load and save", name);
        }
    }
}
