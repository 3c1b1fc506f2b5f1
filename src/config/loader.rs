// Configuration loader
// Loads settings from an explicit path, ./finetune.toml or ~/.finetune/config.toml

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::settings::Config;

const LOCAL_CONFIG_FILE: &str = "finetune.toml";

/// Load configuration.
///
/// An explicit path must exist. Without one, the first of `./finetune.toml`
/// and `~/.finetune/config.toml` that exists is used; if neither does, the
/// built-in defaults apply.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        if !path.exists() {
            bail!("Config file not found: {}", path.display());
        }
        return load_from_file(path);
    }

    for candidate in default_locations() {
        if candidate.exists() {
            return load_from_file(&candidate);
        }
    }

    tracing::debug!("No config file found, using defaults");
    Ok(Config::default())
}

/// Parse a TOML config file; missing keys fall back to defaults
pub fn load_from_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let config = parse_config(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    tracing::info!(path = %path.display(), "Loaded config");
    Ok(config)
}

pub fn parse_config(contents: &str) -> Result<Config> {
    let config: Config = toml::from_str(contents).context("Invalid TOML")?;
    Ok(config)
}

fn default_locations() -> Vec<PathBuf> {
    let mut locations = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
    if let Some(home) = dirs::home_dir() {
        locations.push(home.join(".finetune/config.toml"));
    }
    locations
}
