// Model file resolution - local directories or HuggingFace Hub downloads

use anyhow::{bail, Context, Result};
use hf_hub::{api::sync::Api, Repo, RepoType};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const SINGLE_WEIGHTS_FILE: &str = "model.safetensors";
const WEIGHTS_INDEX_FILE: &str = "model.safetensors.index.json";

/// Files needed to load a pretrained causal LM
#[derive(Debug, Clone)]
pub struct ModelFiles {
    /// Repository ID or directory the files came from
    pub source: String,
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    /// One file, or every shard listed in the index
    pub weights: Vec<PathBuf>,
}

/// `model.safetensors.index.json` (only the part we need)
#[derive(Debug, Deserialize)]
struct WeightsIndex {
    weight_map: HashMap<String, String>,
}

impl ModelFiles {
    /// Treat `name` as a local directory if one exists, otherwise as a hub repo ID.
    ///
    /// Hub downloads block; call from a blocking context.
    pub fn resolve(name: &str, revision: Option<&str>) -> Result<Self> {
        let local = Path::new(name);
        if local.is_dir() {
            return Self::from_dir(local);
        }
        Self::download(name, revision)
    }

    pub fn from_dir(dir: &Path) -> Result<Self> {
        let config = require(dir.join(CONFIG_FILE))?;
        let tokenizer = require(dir.join(TOKENIZER_FILE))?;

        let index_path = dir.join(WEIGHTS_INDEX_FILE);
        let weights = if index_path.exists() {
            shard_names(&index_path)?
                .into_iter()
                .map(|shard| require(dir.join(shard)))
                .collect::<Result<Vec<_>>>()?
        } else {
            vec![require(dir.join(SINGLE_WEIGHTS_FILE))?]
        };

        tracing::info!(dir = %dir.display(), shards = weights.len(), "Using local model files");

        Ok(Self {
            source: dir.display().to_string(),
            config,
            tokenizer,
            weights,
        })
    }

    fn download(repo_id: &str, revision: Option<&str>) -> Result<Self> {
        let api = Api::new().context("Failed to initialise HuggingFace Hub client")?;
        let repo = match revision {
            Some(rev) => api.repo(Repo::with_revision(
                repo_id.to_string(),
                RepoType::Model,
                rev.to_string(),
            )),
            None => api.repo(Repo::new(repo_id.to_string(), RepoType::Model)),
        };

        tracing::info!(repo = repo_id, revision = revision.unwrap_or("main"), "Resolving model from hub");

        let config = repo
            .get(CONFIG_FILE)
            .with_context(|| format!("Failed to download {} from {}", CONFIG_FILE, repo_id))?;
        let tokenizer = repo
            .get(TOKENIZER_FILE)
            .with_context(|| format!("Failed to download {} from {}", TOKENIZER_FILE, repo_id))?;

        // Sharded checkpoints ship an index; small models ship a single file
        let weights = match repo.get(WEIGHTS_INDEX_FILE) {
            Ok(index_path) => {
                let shards = shard_names(&index_path)?;
                tracing::info!(shards = shards.len(), "Downloading sharded weights");
                shards
                    .iter()
                    .map(|shard| {
                        repo.get(shard)
                            .with_context(|| format!("Failed to download shard {}", shard))
                    })
                    .collect::<Result<Vec<_>>>()?
            }
            Err(_) => {
                tracing::debug!("No weights index, fetching single weights file");
                vec![repo.get(SINGLE_WEIGHTS_FILE).with_context(|| {
                    format!(
                        "No {} or {} in {}",
                        WEIGHTS_INDEX_FILE, SINGLE_WEIGHTS_FILE, repo_id
                    )
                })?]
            }
        };

        tracing::info!(repo = repo_id, files = weights.len() + 2, "✓ Model files cached");

        Ok(Self {
            source: repo_id.to_string(),
            config,
            tokenizer,
            weights,
        })
    }
}

/// Distinct shard file names referenced by a weights index, sorted
fn shard_names(index_path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(index_path)
        .with_context(|| format!("Failed to read {}", index_path.display()))?;
    let index: WeightsIndex = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", index_path.display()))?;

    let shards: BTreeSet<String> = index.weight_map.into_values().collect();
    if shards.is_empty() {
        bail!("Weights index {} lists no files", index_path.display());
    }
    Ok(shards.into_iter().collect())
}

fn require(path: PathBuf) -> Result<PathBuf> {
    if !path.exists() {
        bail!("Required model file missing: {}", path.display());
    }
    Ok(path)
}
