//! Inference: the completion API collaborator.
//!
//! This module handles all communication with the hosted model endpoint:
//! - Non-streaming completions with tools (the resolution loop)
//! - Streaming completions (the summarization pass)
//! - SSE stream parsing
//! - Fallback chain across configured models
//! - Recovery of tool calls the model wrote as `<function=...>` text
//!
//! The client speaks the OpenAI Chat Completions API, so switching from Groq
//! to another compatible provider is a config change, not a code change.

pub mod api;
pub mod client;
pub mod config;
pub mod errors;
pub mod streaming;
pub mod tool_call_parser;
pub mod types;

// Re-exports for convenience
pub use api::{CompletionApi, CompletionStream};
pub use client::InferenceClient;
pub use config::{ModelConfig, ModelsConfig};
pub use errors::InferenceError;
pub use types::{ChatMessage, CompletionResponse, Role, ToolCall, ToolChoice, ToolDefinition};
