//! Scripted collaborators for orchestration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use crate::inference::types::{ChatMessage, CompletionResponse, Role, ToolCall, ToolChoice, ToolDefinition};
use crate::inference::{CompletionApi, CompletionStream, InferenceError};
use crate::retrieval::{RetrievalHit, Retriever};
use crate::tools::{catalog, ToolDispatcher, ToolProvider, ToolRegistry, UserContext};

/// Markdown the fake image provider returns.
pub const IMAGE_MARKDOWN: &str = "![Generated Image](https://cdn.example.com/generated/cat.png)";

// ─── Completion API ─────────────────────────────────────────────────────────

/// One scripted reply to `complete`.
pub enum Scripted {
    Reply(CompletionResponse),
    Fail(InferenceError),
}

impl Scripted {
    pub fn text(content: &str) -> Self {
        Self::Reply(CompletionResponse::text(content))
    }

    pub fn calls(calls: Vec<ToolCall>) -> Self {
        Self::Reply(CompletionResponse::with_tool_calls(calls))
    }

    pub fn http_error(status: u16, body: &str) -> Self {
        Self::Fail(InferenceError::HttpError {
            status,
            body: body.to_string(),
        })
    }
}

/// A `CompletionApi` that replays a script and records every request.
pub struct ScriptedCompletionApi {
    script: Mutex<VecDeque<Scripted>>,
    stream_chunks: Vec<String>,
    stream_fails: bool,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
    offered_tools: Mutex<Vec<Vec<String>>>,
    stream_requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedCompletionApi {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            stream_chunks: vec!["Here ".to_string(), "you go.".to_string()],
            stream_fails: false,
            requests: Mutex::new(Vec::new()),
            offered_tools: Mutex::new(Vec::new()),
            stream_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_stream(mut self, chunks: &[&str]) -> Self {
        self.stream_chunks = chunks.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_failing_stream(mut self) -> Self {
        self.stream_fails = true;
        self
    }

    /// Number of `complete` calls so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Messages sent on the `n`th `complete` call.
    pub fn request(&self, n: usize) -> Vec<ChatMessage> {
        self.requests.lock().unwrap()[n].clone()
    }

    /// Tool names offered on the `n`th `complete` call.
    pub fn offered_tools(&self, n: usize) -> Vec<String> {
        self.offered_tools.lock().unwrap()[n].clone()
    }

    pub fn stream_count(&self) -> usize {
        self.stream_requests.lock().unwrap().len()
    }

    pub fn stream_request(&self, n: usize) -> Vec<ChatMessage> {
        self.stream_requests.lock().unwrap()[n].clone()
    }
}

#[async_trait]
impl CompletionApi for ScriptedCompletionApi {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        _tool_choice: ToolChoice,
    ) -> Result<CompletionResponse, InferenceError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        self.offered_tools
            .lock()
            .unwrap()
            .push(tools.iter().map(|t| t.function.name.clone()).collect());

        match self.script.lock().unwrap().pop_front() {
            Some(Scripted::Reply(response)) => Ok(response),
            Some(Scripted::Fail(err)) => Err(err),
            None => Ok(CompletionResponse::text("(script exhausted)")),
        }
    }

    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
    ) -> Result<CompletionStream, InferenceError> {
        self.stream_requests.lock().unwrap().push(messages.to_vec());
        if self.stream_fails {
            return Err(InferenceError::ConnectionFailed {
                endpoint: "scripted".into(),
                reason: "stream disabled".into(),
            });
        }
        let chunks: Vec<Result<String, InferenceError>> =
            self.stream_chunks.iter().cloned().map(Ok).collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

// ─── Tool providers ─────────────────────────────────────────────────────────

/// Echoes its arguments back with the caller's user id.
pub struct EchoProvider;

#[async_trait]
impl ToolProvider for EchoProvider {
    async fn call(
        &self,
        ctx: &UserContext,
        arguments: &serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        Ok(json!({ "user": ctx.user_id, "echo": arguments }))
    }
}

/// Returns a markdown image reference as a bare JSON string.
pub struct ImageProvider;

#[async_trait]
impl ToolProvider for ImageProvider {
    async fn call(
        &self,
        _ctx: &UserContext,
        _arguments: &serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::Value::String(IMAGE_MARKDOWN.to_string()))
    }
}

/// Every built-in tool bound to `EchoProvider`, except `image_generate`.
pub fn echo_dispatcher() -> ToolDispatcher {
    let registry = ToolRegistry::builtin();
    let names: Vec<String> = registry.tool_names().iter().map(|n| n.to_string()).collect();
    let mut dispatcher = ToolDispatcher::new(registry);
    for name in names {
        if name == catalog::IMAGE_GENERATE {
            dispatcher.bind(name, Arc::new(ImageProvider));
        } else {
            dispatcher.bind(name, Arc::new(EchoProvider));
        }
    }
    dispatcher
}

// ─── Retriever ──────────────────────────────────────────────────────────────

/// Returns fixed hits, or fails when `hits` is `None`.
pub struct StaticRetriever {
    pub hits: Option<Vec<RetrievalHit>>,
    pub queries: Mutex<Vec<String>>,
}

impl StaticRetriever {
    pub fn with_hits(hits: Vec<RetrievalHit>) -> Self {
        Self {
            hits: Some(hits),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            hits: None,
            queries: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn search(
        &self,
        _ctx: &UserContext,
        query: &str,
        _source_filter: Option<&[String]>,
        _limit: usize,
    ) -> anyhow::Result<Vec<RetrievalHit>> {
        self.queries.lock().unwrap().push(query.to_string());
        match &self.hits {
            Some(hits) => Ok(hits.clone()),
            None => anyhow::bail!("index unavailable"),
        }
    }
}

// ─── Assertions ─────────────────────────────────────────────────────────────

/// Every tool message answers exactly one earlier call, and every call has
/// exactly one answer.
pub fn assert_correlated(messages: &[ChatMessage]) {
    let mut open: HashMap<String, usize> = HashMap::new();
    let mut answered: HashMap<String, usize> = HashMap::new();

    for message in messages {
        match message.role {
            Role::Assistant => {
                for call in message.tool_calls.iter().flatten() {
                    *open.entry(call.id.clone()).or_default() += 1;
                }
            }
            Role::Tool => {
                let id = message
                    .tool_call_id
                    .clone()
                    .expect("tool message without tool_call_id");
                assert_eq!(open.get(&id), Some(&1), "tool result {id} has no unique call");
                *answered.entry(id).or_default() += 1;
            }
            _ => {}
        }
    }

    for (id, count) in &open {
        assert_eq!(*count, 1, "call id {id} used more than once");
        assert_eq!(answered.get(id), Some(&1), "call {id} answered {:?} times", answered.get(id));
    }
}
