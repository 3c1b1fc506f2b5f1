// User-friendly error messages
//
// Turns fatal errors into messages that say what to check next.

use anyhow::{Context, Result};
use std::fmt;

/// Wrap an error with user-friendly context
pub trait UserFriendlyError {
    /// Add user-friendly context to this error
    fn user_context(self, message: &str) -> Self;

    /// Add user-friendly context with a suggestion
    fn user_context_with_suggestion(self, problem: &str, suggestion: &str) -> Self;
}

impl<T> UserFriendlyError for Result<T> {
    fn user_context(self, message: &str) -> Self {
        self.with_context(|| message.to_string())
    }

    fn user_context_with_suggestion(self, problem: &str, suggestion: &str) -> Self {
        self.with_context(|| format!("{}\n\n\x1b[1;33mSuggestion:\x1b[0m {}", problem, suggestion))
    }
}

/// Format a failed data fetch with helpful suggestions
pub fn fetch_failed_error(url: &str, status: Option<u16>) -> String {
    let cause = match status {
        Some(404) => "The endpoint path is wrong or the service does not expose it".to_string(),
        Some(code) if code >= 500 => format!("The data service returned a server error ({})", code),
        Some(code) => format!("The data service rejected the request ({})", code),
        None => "The data service is not running or not reachable".to_string(),
    };

    format!(
        "Could not load training data from {}\n\n\
        \x1b[1;33mPossible cause:\x1b[0m {}\n\n\
        \x1b[1;32mTry:\x1b[0m\n\
        1. Check the service responds:\n\
           \x1b[36mcurl -i {}\x1b[0m\n\n\
        2. Point at a different endpoint:\n\
           \x1b[36mfinetune --fetch-url http://host:port/api/v1/load\x1b[0m",
        url, cause, url
    )
}

/// Format a model loading error with helpful suggestions
pub fn model_loading_error(model_name: &str) -> String {
    format!(
        "Failed to load model '{}'\n\n\
        \x1b[1;33mPossible causes:\x1b[0m\n\
        • Wrong repository ID or missing access to a gated model\n\
        • Not a Llama-family model (config.json / tensor names differ)\n\
        • Insufficient RAM for full-precision weights\n\n\
        \x1b[1;32mTry:\x1b[0m\n\
        1. Check the model cache:\n\
           \x1b[36mls ~/.cache/huggingface/hub/\x1b[0m\n\n\
        2. Use a local directory with config.json, tokenizer.json and safetensors:\n\
           \x1b[36mfinetune --model ./my-model\x1b[0m",
        model_name
    )
}

/// Wrap a generic error with suggestions
pub fn wrap_error_with_suggestion(error: impl fmt::Display, suggestion: &str) -> String {
    format!("{}\n\n\x1b[1;33mSuggestion:\x1b[0m {}", error, suggestion)
}
