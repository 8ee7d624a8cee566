//! Model endpoint configuration.
//!
//! The `models:` section of `config.yaml`. Loading and env interpolation
//! live in [`crate::config`]; this module owns the shape and the
//! active-model / fallback resolution.

use std::collections::HashMap;

use serde::Deserialize;

use super::errors::InferenceError;

/// Groq's OpenAI-compatible endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Model used when no config file is present.
pub const DEFAULT_MODEL_KEY: &str = "llama-3.3-70b-versatile";

// ─── Public Types ────────────────────────────────────────────────────────────

/// A single model's endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model id sent on the wire; defaults to the config key.
    #[serde(default)]
    pub model_name: Option<String>,
    /// Bearer token. Usually `${GROQ_API_KEY}` in the YAML.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            display_name: Some("Llama 3.3 70B (Groq)".to_string()),
            base_url: default_base_url(),
            model_name: None,
            api_key: std::env::var("GROQ_API_KEY").ok().filter(|k| !k.is_empty()),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// The `models:` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    pub active_model: String,
    pub models: HashMap<String, ModelConfig>,
    /// Model keys tried, in order, when the active one is unavailable.
    #[serde(default)]
    pub fallback_chain: Vec<String>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        let mut models = HashMap::new();
        models.insert(DEFAULT_MODEL_KEY.to_string(), ModelConfig::default());
        Self {
            active_model: DEFAULT_MODEL_KEY.to_string(),
            models,
            fallback_chain: Vec::new(),
        }
    }
}

// ─── Resolution ──────────────────────────────────────────────────────────────

/// Resolve the active model configuration, respecting the fallback chain.
///
/// Returns `(model_key, ModelConfig)` for the first configured model.
/// Connectivity is checked at request time by the client.
pub fn resolve_active_model(config: &ModelsConfig) -> Result<(String, ModelConfig), InferenceError> {
    candidate_models(config)
        .into_iter()
        .next()
        .ok_or_else(|| InferenceError::ConfigError {
            reason: format!(
                "active model '{}' not found in config and no fallback available",
                config.active_model
            ),
        })
}

/// Every configured model in try-order: the active model, then the
/// fallback chain, without duplicates. Unknown keys are skipped.
pub fn candidate_models(config: &ModelsConfig) -> Vec<(String, ModelConfig)> {
    let mut seen: Vec<&str> = Vec::new();
    let mut out = Vec::new();

    for key in std::iter::once(&config.active_model).chain(config.fallback_chain.iter()) {
        if seen.contains(&key.as_str()) {
            continue;
        }
        seen.push(key);
        if let Some(model) = config.models.get(key) {
            out.push((key.clone(), model.clone()));
        }
    }

    out
}

// ─── Tests ───────────────────────────────────────────────────────────────────
