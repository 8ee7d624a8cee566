//! Agent Core error types.

use thiserror::Error;

/// Errors that can fail a turn.
///
/// Tool and provider failures never appear here; they are tool results.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The model kept requesting tools past the round-trip budget.
    #[error("tool loop exceeded: no final answer after {budget} model round-trips")]
    ToolLoopExceeded { budget: u32 },

    /// Conversation log read or append failed.
    #[error("conversation log error: {reason}")]
    ConversationLog { reason: String },

    /// Database operation failed.
    #[error("database error: {reason}")]
    DatabaseError { reason: String },

    /// Serialization error.
    #[error("serialization error: {reason}")]
    SerializationError { reason: String },

    /// The detached tool-phase task panicked or was cancelled.
    #[error("turn task failed: {reason}")]
    TaskFailed { reason: String },
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        AgentError::DatabaseError {
            reason: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::SerializationError {
            reason: e.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for AgentError {
    fn from(e: tokio::task::JoinError) -> Self {
        AgentError::TaskFailed {
            reason: e.to_string(),
        }
    }
}
