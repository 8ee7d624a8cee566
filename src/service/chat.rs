//! Chat turn driver.
//!
//! `send_message` serializes turns per conversation, runs the tool phase in
//! a detached task so its messages reach the log even when the caller goes
//! away, and hands back the reply as a stream that records itself on
//! completion.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, OwnedMutexGuard};

use crate::agent_core::{
    AgentError, ContextMode, ConversationLocks, ConversationLog, Orchestrator, ResponseKind,
    Termination,
};
use crate::config::AppConfig;
use crate::inference::types::ChatMessage;
use crate::inference::{CompletionStream, InferenceClient, InferenceError};
use crate::retrieval::Retriever;
use crate::tools::{ToolDispatcher, ToolEvent, UserContext};

/// One user message to process.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub conversation_id: String,
    pub user: UserContext,
    pub message: String,
    pub mode: ContextMode,
    /// Receives tool progress events while the tool phase runs.
    pub events: Option<mpsc::UnboundedSender<ToolEvent>>,
}

impl ChatRequest {
    pub fn new(
        conversation_id: impl Into<String>,
        user: UserContext,
        message: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user,
            message: message.into(),
            mode: ContextMode::default(),
            events: None,
        }
    }

    pub fn with_mode(mut self, mode: ContextMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<ToolEvent>) -> Self {
        self.events = Some(events);
        self
    }
}

/// The reply for a turn.
///
/// Yields text chunks. Reading it to the end appends the assistant message
/// to the log; dropping it early leaves the log without one. The
/// conversation stays locked until the stream ends or is dropped.
pub struct TurnStream {
    pub kind: ResponseKind,
    pub termination: Termination,
    chunks: CompletionStream,
}

impl std::fmt::Debug for TurnStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnStream")
            .field("kind", &self.kind)
            .field("termination", &self.termination)
            .finish_non_exhaustive()
    }
}

impl Stream for TurnStream {
    type Item = Result<String, InferenceError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.chunks.as_mut().poll_next(cx)
    }
}

// ─── Service ────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ChatService {
    orchestrator: Arc<Orchestrator>,
    log: Arc<dyn ConversationLog>,
    locks: ConversationLocks,
}

impl ChatService {
    pub fn new(orchestrator: Arc<Orchestrator>, log: Arc<dyn ConversationLog>) -> Self {
        Self {
            orchestrator,
            log,
            locks: ConversationLocks::new(),
        }
    }

    /// Wire a service from application config and the caller's collaborators.
    pub fn from_config(
        config: &AppConfig,
        dispatcher: ToolDispatcher,
        retriever: Option<Arc<dyn Retriever>>,
        log: Arc<dyn ConversationLog>,
    ) -> Result<Self, InferenceError> {
        let client = InferenceClient::from_config(&config.models)?;
        let mut orchestrator = Orchestrator::new(
            Arc::new(client),
            Arc::new(dispatcher),
            config.orchestration.clone(),
        );
        if let Some(retriever) = retriever {
            orchestrator = orchestrator.with_retriever(retriever, config.retrieval.clone());
        }
        Ok(Self::new(Arc::new(orchestrator), log))
    }

    /// Stored messages of a conversation, oldest first.
    pub async fn history(&self, conversation_id: &str) -> Result<Vec<ChatMessage>, AgentError> {
        self.log.messages(conversation_id).await
    }

    /// Run one turn and return its reply stream.
    ///
    /// Tool-call and tool-result messages are in the log before this
    /// returns, including when the turn fails with `ToolLoopExceeded`.
    /// If this future is dropped mid-turn the tool phase still runs to
    /// completion and persists its messages.
    pub async fn send_message(&self, request: ChatRequest) -> Result<TurnStream, AgentError> {
        let ChatRequest {
            conversation_id,
            user,
            message,
            mode,
            events,
        } = request;

        let guard = self.locks.acquire(&conversation_id).await?;

        self.log
            .append(&conversation_id, &ChatMessage::user(message))
            .await?;
        let history = self.log.messages(&conversation_id).await?;

        tracing::info!(
            conversation = %conversation_id,
            user = %user.user_id,
            mode = ?mode,
            history_len = history.len(),
            "=== TURN START ==="
        );

        let orchestrator = Arc::clone(&self.orchestrator);
        let log = Arc::clone(&self.log);
        let id = conversation_id.clone();

        let handle = tokio::spawn(async move {
            let mut turn = orchestrator.prepare(&user, &history, mode).await;
            let result = orchestrator.resolve(&user, &mut turn, events.as_ref()).await;

            let persisted = log.append_all(&id, turn.turn_messages()).await;
            if let Err(e) = &persisted {
                tracing::error!(conversation = %id, error = %e, "failed to persist tool messages");
            }
            (turn, result, persisted, guard)
        });

        let (turn, result, persisted, guard) = handle.await?;
        persisted?;
        let termination = result?;

        tracing::info!(
            conversation = %conversation_id,
            new_messages = turn.turn_messages().len(),
            termination = ?termination,
            "tool phase complete"
        );

        let response = self.orchestrator.respond(&turn).await;
        let chunks = record_reply(
            response.stream,
            Arc::clone(&self.log),
            conversation_id,
            guard,
        );

        Ok(TurnStream {
            kind: response.kind,
            termination,
            chunks,
        })
    }
}

/// State carried through the recording stream.
struct Recorder {
    inner: CompletionStream,
    log: Arc<dyn ConversationLog>,
    conversation_id: String,
    text: String,
    failed: bool,
    _guard: OwnedMutexGuard<()>,
}

/// Pass chunks through, appending the concatenated text once the inner
/// stream ends cleanly.
fn record_reply(
    inner: CompletionStream,
    log: Arc<dyn ConversationLog>,
    conversation_id: String,
    guard: OwnedMutexGuard<()>,
) -> CompletionStream {
    let recorder = Recorder {
        inner,
        log,
        conversation_id,
        text: String::new(),
        failed: false,
        _guard: guard,
    };

    futures::stream::unfold(recorder, |mut rec| async move {
        match rec.inner.next().await {
            Some(Ok(chunk)) => {
                rec.text.push_str(&chunk);
                Some((Ok(chunk), rec))
            }
            Some(Err(e)) => {
                tracing::warn!(conversation = %rec.conversation_id, error = %e, "reply stream error");
                rec.failed = true;
                Some((Err(e), rec))
            }
            None => {
                if rec.failed || rec.text.is_empty() {
                    tracing::warn!(
                        conversation = %rec.conversation_id,
                        "reply incomplete, assistant message not recorded"
                    );
                } else if let Err(e) = rec
                    .log
                    .append(&rec.conversation_id, &ChatMessage::assistant(rec.text.clone()))
                    .await
                {
                    tracing::error!(conversation = %rec.conversation_id, error = %e, "failed to persist reply");
                } else {
                    tracing::info!(
                        conversation = %rec.conversation_id,
                        reply_len = rec.text.len(),
                        "=== TURN COMPLETE ==="
                    );
                }
                None
            }
        }
    })
    .boxed()
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::agent_core::test_support::{
        assert_correlated, echo_dispatcher, tool_call, Scripted, ScriptedCompletionApi,
        IMAGE_MARKDOWN,
    };
    use crate::agent_core::InMemoryConversationLog;
    use crate::config::OrchestrationConfig;
    use crate::inference::types::Role;
    use crate::tools::{catalog, ToolProvider};

    /// Sleeps before answering, to hold the tool phase open.
    struct SlowProvider(Duration);

    #[async_trait]
    impl ToolProvider for SlowProvider {
        async fn call(
            &self,
            _ctx: &UserContext,
            _arguments: &serde_json::Value,
        ) -> anyhow::Result<serde_json::Value> {
            tokio::time::sleep(self.0).await;
            Ok(json!({ "results": [] }))
        }
    }

    fn service_with(
        api: ScriptedCompletionApi,
        dispatcher: ToolDispatcher,
    ) -> (ChatService, Arc<InMemoryConversationLog>) {
        let orchestrator = Orchestrator::new(
            Arc::new(api),
            Arc::new(dispatcher),
            OrchestrationConfig::default(),
        );
        let log = Arc::new(InMemoryConversationLog::new());
        let service = ChatService::new(Arc::new(orchestrator), log.clone());
        (service, log)
    }

    fn search_call(id: &str) -> Scripted {
        Scripted::calls(vec![tool_call(id, catalog::WEB_SEARCH, json!({"query": "rust"}))])
    }

    fn request(message: &str) -> ChatRequest {
        ChatRequest::new("conv-1", UserContext::new("u1"), message)
    }

    async fn read_all(stream: TurnStream) -> String {
        stream
            .map(|chunk| chunk.unwrap())
            .collect::<Vec<_>>()
            .await
            .concat()
    }

    fn roles(messages: &[ChatMessage]) -> Vec<Role> {
        messages.iter().map(|m| m.role).collect()
    }

    #[tokio::test]
    async fn test_full_turn_is_logged_in_order() {
        let api = ScriptedCompletionApi::new(vec![search_call("c1"), Scripted::text("done")]);
        let (service, log) = service_with(api, echo_dispatcher());

        let stream = service.send_message(request("search rust")).await.unwrap();
        assert_eq!(stream.kind, ResponseKind::Summary);
        assert_eq!(read_all(stream).await, "Here you go.");

        let messages = log.messages("conv-1").await.unwrap();
        assert_eq!(
            roles(&messages),
            vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert_eq!(messages[0].text(), "search rust");
        assert_eq!(messages[3].text(), "Here you go.");
        assert_correlated(&messages);
    }

    #[tokio::test]
    async fn test_dropped_stream_keeps_tool_messages_and_releases_lock() {
        let api = ScriptedCompletionApi::new(vec![search_call("c1"), Scripted::text("done")]);
        let (service, log) = service_with(api, echo_dispatcher());

        let stream = service.send_message(request("search rust")).await.unwrap();
        drop(stream);

        let messages = log.messages("conv-1").await.unwrap();
        assert_eq!(roles(&messages), vec![Role::User, Role::Assistant, Role::Tool]);

        let next = tokio::time::timeout(
            Duration::from_secs(1),
            service.send_message(request("again")),
        )
        .await
        .expect("conversation lock was not released");
        assert!(next.is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_turn_still_persists_tool_phase() {
        let api = ScriptedCompletionApi::new(vec![search_call("c1"), Scripted::text("done")]);
        let dispatcher = echo_dispatcher()
            .with_provider(catalog::WEB_SEARCH, Arc::new(SlowProvider(Duration::from_millis(100))));
        let (service, log) = service_with(api, dispatcher);

        let cancelled = tokio::time::timeout(
            Duration::from_millis(20),
            service.send_message(request("search rust")),
        )
        .await;
        assert!(cancelled.is_err(), "turn should still be in its tool phase");

        tokio::time::sleep(Duration::from_millis(300)).await;

        let messages = log.messages("conv-1").await.unwrap();
        assert_eq!(roles(&messages), vec![Role::User, Role::Assistant, Role::Tool]);
        assert_correlated(&messages);
    }

    #[tokio::test]
    async fn test_tool_loop_exceeded_persists_partial_turn() {
        let script = (0..5).map(|i| search_call(&format!("c{i}"))).collect();
        let api = ScriptedCompletionApi::new(script);
        let (service, log) = service_with(api, echo_dispatcher());

        let err = service.send_message(request("loop forever")).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolLoopExceeded { budget: 5 }));

        let messages = log.messages("conv-1").await.unwrap();
        assert_eq!(messages.len(), 11);
        assert_eq!(messages[0].role, Role::User);
        assert!(messages.iter().all(|m| m.role != Role::Assistant || m.tool_calls.is_some()));
        assert_correlated(&messages);

        // The lock is free again.
        let next = tokio::time::timeout(
            Duration::from_secs(1),
            service.send_message(request("hello")),
        )
        .await;
        assert!(next.is_ok());
    }

    #[tokio::test]
    async fn test_turns_on_one_conversation_do_not_interleave() {
        let api = ScriptedCompletionApi::new(vec![
            search_call("a1"),
            Scripted::text("first done"),
            search_call("b1"),
            Scripted::text("second done"),
        ]);
        let (service, log) = service_with(api, echo_dispatcher());

        let first = service.send_message(request("first")).await.unwrap();

        let second_service = service.clone();
        let second = tokio::spawn(async move {
            let stream = second_service.send_message(request("second")).await.unwrap();
            read_all(stream).await
        });

        // The second turn waits on the first turn's open stream.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(log.messages("conv-1").await.unwrap().len(), 3);

        assert_eq!(read_all(first).await, "Here you go.");
        assert_eq!(second.await.unwrap(), "Here you go.");

        let messages = log.messages("conv-1").await.unwrap();
        assert_eq!(
            roles(&messages),
            vec![
                Role::User,
                Role::Assistant,
                Role::Tool,
                Role::Assistant,
                Role::User,
                Role::Assistant,
                Role::Tool,
                Role::Assistant,
            ]
        );
        assert_eq!(messages[0].text(), "first");
        assert_eq!(messages[4].text(), "second");
        assert_correlated(&messages);
    }

    #[tokio::test]
    async fn test_repeated_model_call_ids_stay_unique_across_turns() {
        let api = ScriptedCompletionApi::new(vec![
            search_call("call_0"),
            Scripted::text("done"),
            search_call("call_0"),
            Scripted::text("done"),
        ]);
        let (service, log) = service_with(api, echo_dispatcher());

        for message in ["first", "second"] {
            let stream = service.send_message(request(message)).await.unwrap();
            read_all(stream).await;
        }

        let messages = log.messages("conv-1").await.unwrap();
        let ids: Vec<&str> = messages
            .iter()
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], "call_0");
        assert_ne!(ids[1], "call_0");
        assert_correlated(&messages);
    }

    #[tokio::test]
    async fn test_other_conversations_proceed_while_one_is_open() {
        let api = ScriptedCompletionApi::new(vec![Scripted::text("a"), Scripted::text("b")]);
        let (service, log) = service_with(api, echo_dispatcher());

        let _open = service.send_message(request("first")).await.unwrap();

        let other = ChatRequest::new("conv-2", UserContext::new("u2"), "hello");
        let stream = tokio::time::timeout(Duration::from_secs(1), service.send_message(other))
            .await
            .expect("independent conversation blocked")
            .unwrap();
        read_all(stream).await;

        assert_eq!(log.messages("conv-2").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_image_turn_records_media_reply() {
        let api = ScriptedCompletionApi::new(vec![Scripted::calls(vec![tool_call(
            "img",
            catalog::IMAGE_GENERATE,
            json!({"prompt": "a cat"}),
        )])]);
        let (service, log) = service_with(api, echo_dispatcher());

        let stream = service.send_message(request("draw a cat")).await.unwrap();
        assert_eq!(stream.kind, ResponseKind::Media);
        assert_eq!(
            stream.termination,
            Termination::TerminalTool {
                tool: catalog::IMAGE_GENERATE.to_string()
            }
        );

        let text = read_all(stream).await;
        let expected = format!("{}{}", OrchestrationConfig::default().image_intro, IMAGE_MARKDOWN);
        assert_eq!(text, expected);

        let messages = log.messages("conv-1").await.unwrap();
        assert_eq!(messages.last().unwrap().text(), expected);
    }

    #[tokio::test]
    async fn test_failed_reply_stream_records_nothing() {
        let log = Arc::new(InMemoryConversationLog::new());
        let inner: CompletionStream = futures::stream::iter(vec![
            Ok("partial".to_string()),
            Err(InferenceError::StreamError {
                reason: "connection reset".into(),
            }),
        ])
        .boxed();
        let guard = ConversationLocks::new().acquire("conv-1").await.unwrap();

        let chunks: Vec<_> = record_reply(inner, log.clone(), "conv-1".into(), guard)
            .collect()
            .await;

        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].is_err());
        assert!(log.messages("conv-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_events_reach_the_caller() {
        let api = ScriptedCompletionApi::new(vec![search_call("c1"), Scripted::text("done")]);
        let (service, _log) = service_with(api, echo_dispatcher());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let stream = service
            .send_message(request("search rust").with_events(tx))
            .await
            .unwrap();
        read_all(stream).await;

        let started = rx.recv().await.unwrap();
        assert!(matches!(started, ToolEvent::Started { ref name, .. } if name == catalog::WEB_SEARCH));
        let finished = rx.recv().await.unwrap();
        assert!(matches!(finished, ToolEvent::Finished { success: true, .. }));
    }
}
