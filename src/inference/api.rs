//! The completion API seam.
//!
//! The orchestration core only talks to a model through this trait, so the
//! HTTP client can be swapped for a scripted fake in tests.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use super::errors::InferenceError;
use super::types::{ChatMessage, CompletionResponse, ToolChoice, ToolDefinition};

/// A stream of assistant text chunks.
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<String, InferenceError>> + Send>>;

/// Chat completion collaborator.
#[async_trait]
pub trait CompletionApi: Send + Sync {
    /// Non-streaming completion with tools offered.
    ///
    /// Providers that reject a malformed generation return
    /// `InferenceError::HttpError` with the rejected text in the body.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        tool_choice: ToolChoice,
    ) -> Result<CompletionResponse, InferenceError>;

    /// Streaming completion without tools.
    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
    ) -> Result<CompletionStream, InferenceError>;
}
