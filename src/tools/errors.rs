//! Tool dispatch error types.
//!
//! None of these ever escape a turn: the dispatcher renders them into the
//! `{"error": "..."}` envelope the model sees as the tool result.

use thiserror::Error;

/// Errors that can occur while dispatching a tool call.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Tool not found in the registry.
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    /// Tool exists but was removed from this turn's active set.
    #[error("Tool not enabled for this turn: {name}")]
    NotEnabled { name: String },

    /// Tool call arguments failed schema validation.
    #[error("Invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// Registered tool with nothing bound to execute it.
    #[error("No provider configured for tool: {name}")]
    NoProvider { name: String },

    /// The provider raised an error.
    #[error("{message}")]
    Provider { tool: String, message: String },
}

impl ToolError {
    /// The JSON payload recorded as the tool result.
    pub fn to_envelope(&self) -> serde_json::Value {
        serde_json::json!({ "error": self.to_string() })
    }
}
