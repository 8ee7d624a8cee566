//! Agent Core: the tool-calling orchestration layer.
//!
//! Submodules:
//! - `orchestrator`: Response assembly (context policy, history window, final stream shape)
//! - `resolution`: The tool resolution state machine
//! - `prompts`: System preamble, summary instruction, history sanitizing, media detection
//! - `conversation`: Conversation log trait, in-memory log, per-conversation locks
//! - `database`: SQLite conversation log
//! - `types`: Orchestration state and loop states
//! - `errors`: Agent-level error types

pub mod conversation;
pub mod database;
pub mod errors;
pub mod orchestrator;
pub mod prompts;
pub mod resolution;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports for convenience
pub use conversation::{ConversationLocks, ConversationLog, InMemoryConversationLog};
pub use database::SqliteConversationLog;
pub use errors::AgentError;
pub use orchestrator::{AssembledResponse, Orchestrator, PreparedTurn, ResponseKind, TurnOutcome};
pub use resolution::ResolutionLoop;
pub use types::{ContextMode, LoopState, OrchestrationState, Termination};
