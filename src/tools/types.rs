//! Shared types for the tool layer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ─── Caller context ──────────────────────────────────────────────────────────

/// Who the turn is running for.
///
/// Providers use `user_id` to pick credentials and index namespaces;
/// `active_sources` narrows document retrieval to the files the user
/// selected in the UI (`None` means all of the user's documents).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    #[serde(default)]
    pub active_sources: Option<Vec<String>>,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            active_sources: None,
        }
    }

    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.active_sources = Some(sources);
        self
    }
}

// ─── Specs ───────────────────────────────────────────────────────────────────

/// A tool as the model sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    /// Human-readable description; biases the model's tool selection.
    pub description: String,
    /// JSON-schema-like parameters object (`properties`, `required`, `enum`).
    pub parameters: serde_json::Value,
    /// A successful call ends the resolution loop without another model turn.
    #[serde(default)]
    pub terminal: bool,
}

// ─── Results ─────────────────────────────────────────────────────────────────

/// Outcome of one dispatched invocation.
///
/// Exactly one is produced per invocation, success or failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub invocation_id: String,
    pub tool_name: String,
    pub success: bool,
    /// Provider value on success, `{"error": "..."}` on failure.
    pub payload: serde_json::Value,
    pub execution_time_ms: u64,
}

impl ToolResult {
    /// The text stored as the `tool` message content.
    pub fn content(&self) -> String {
        self.payload.to_string()
    }
}

/// Progress notifications for a UI while tools run.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolEvent {
    Started {
        invocation_id: String,
        name: String,
        arguments: serde_json::Value,
    },
    Finished {
        invocation_id: String,
        name: String,
        success: bool,
        elapsed_ms: u64,
    },
}

// ─── Provider seam ───────────────────────────────────────────────────────────

/// A concrete tool implementation (calendar, mail, search, ...).
///
/// One call per invocation; retries and timeouts are the provider's own
/// business. Errors become tool results, never turn failures.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    async fn call(
        &self,
        ctx: &UserContext,
        arguments: &serde_json::Value,
    ) -> anyhow::Result<serde_json::Value>;
}
