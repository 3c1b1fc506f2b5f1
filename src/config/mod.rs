// Configuration module
// Public interface for configuration loading

mod loader;
mod settings;

pub use loader::{load_config, load_from_file, parse_config};
pub use settings::{
    Config, DataSettings, ModelSettings, OutputSettings, TrainingSettings, DEFAULT_FETCH_URL,
    DEFAULT_MODEL_NAME,
};
