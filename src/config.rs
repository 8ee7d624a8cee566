//! Application configuration loading and validation.
//!
//! Reads `config.yaml` and resolves environment variables. Built once at
//! startup and handed to the service by value; nothing in the crate reads
//! ambient global state after that.
//!
//! ```yaml
//! models:
//!   active_model: llama-3.3-70b-versatile
//!   models:
//!     llama-3.3-70b-versatile:
//!       api_key: ${GROQ_API_KEY}
//!   fallback_chain: [llama-3.3-70b-versatile]
//! orchestration:
//!   max_tool_rounds: 5
//!   history_window: 10
//! retrieval:
//!   candidate_pool: 10
//!   top_k: 5
//! logging:
//!   filter: mcp_chatbot=info,warn
//!   file: ${MCP_CHATBOT_LOG:-~/.mcp-chatbot/agent.log}
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::inference::ModelsConfig;

/// Config file name searched for on disk.
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Env var that points directly at a config file.
pub const CONFIG_ENV_VAR: &str = "MCP_CHATBOT_CONFIG";

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not find config.yaml")]
    NotFound,

    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config: {reason}")]
    Parse { reason: String },

    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

// ─── Public Types ────────────────────────────────────────────────────────────

/// Top-level configuration (mirrors `config.yaml`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Resolution loop and response assembly knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Model round-trips allowed before a turn fails with `ToolLoopExceeded`.
    pub max_tool_rounds: u32,
    /// Prior messages forwarded to the model.
    pub history_window: usize,
    /// First chunk of the synthetic media stream.
    pub image_intro: String,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 5,
            history_window: 10,
            image_intro: "Here is your generated image:\n\n".to_string(),
        }
    }
}

/// Retrieval-augmented mode knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Hits requested from the vector index before source filtering.
    pub candidate_pool: usize,
    /// Hits injected as context after filtering.
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_pool: 10,
            top_k: 5,
        }
    }
}

/// Tracing subscriber settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Emit JSON lines instead of the human format.
    pub json: bool,
    /// Log file path; `None` logs to stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "mcp_chatbot=info,warn".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.orchestration.max_tool_rounds == 0 {
            return Err(ConfigError::Invalid {
                reason: "orchestration.max_tool_rounds must be at least 1".into(),
            });
        }
        if self.retrieval.top_k == 0 || self.retrieval.top_k > self.retrieval.candidate_pool {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "retrieval.top_k ({}) must be between 1 and candidate_pool ({})",
                    self.retrieval.top_k, self.retrieval.candidate_pool
                ),
            });
        }
        if !self.models.models.contains_key(&self.models.active_model)
            && !self
                .models
                .fallback_chain
                .iter()
                .any(|k| self.models.models.contains_key(k))
        {
            return Err(ConfigError::Invalid {
                reason: format!("active model '{}' is not configured", self.models.active_model),
            });
        }
        Ok(())
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate `config.yaml`.
///
/// Checks `MCP_CHATBOT_CONFIG` first, then walks upward from `start`.
pub fn find_config_path(start: &Path) -> Result<PathBuf, ConfigError> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(expand_tilde(&path));
        if candidate.exists() {
            return Ok(candidate);
        }
        tracing::warn!(path = %candidate.display(), "MCP_CHATBOT_CONFIG points at a missing file");
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    Err(ConfigError::NotFound)
}

/// Load, interpolate, parse and validate a config file.
///
/// `${VAR_NAME}` and `${VAR_NAME:-default}` are resolved before parsing.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let config = parse_config(&raw)?;
    tracing::info!(path = %path.display(), model = %config.models.active_model, "config loaded");
    Ok(config)
}

/// Parse config text (after env interpolation) and validate it.
pub fn parse_config(raw: &str) -> Result<AppConfig, ConfigError> {
    let interpolated = interpolate_env_vars(raw);
    let config: AppConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
    config.validate()?;
    Ok(config)
}

/// Find and load the config, or fall back to defaults when none exists.
pub fn load_or_default(start: &Path) -> Result<AppConfig, ConfigError> {
    match find_config_path(start) {
        Ok(path) => load_config(&path),
        Err(ConfigError::NotFound) => {
            tracing::info!("no config.yaml found, using defaults");
            Ok(AppConfig::default())
        }
        Err(e) => Err(e),
    }
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((var_name, default)) => std::env::var(var_name)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| expand_tilde(default)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
