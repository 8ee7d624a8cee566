//! Orchestrator: response assembly around the tool resolution loop.
//!
//! Per user turn:
//! 1. Pick the context policy. In retrieval mode the top-K document chunks
//!    are fetched up front and `document_search` is withheld.
//! 2. Build the model view: system preamble, the last N history messages,
//!    then the context message.
//! 3. Run the resolution loop.
//! 4. Shape the reply: a two-chunk synthetic stream when a tool produced a
//!    media reference, otherwise one streaming summarization call.
//!
//! Collaborators are passed in at construction; nothing here reaches for
//! global state.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;

use crate::config::{OrchestrationConfig, RetrievalConfig};
use crate::inference::types::{ChatMessage, Role};
use crate::inference::{CompletionApi, CompletionStream, InferenceError};
use crate::retrieval::{fetch_context, format_context, Retriever};
use crate::tools::{catalog, ToolDispatcher, ToolEvent, ToolRegistry, UserContext};

use super::errors::AgentError;
use super::prompts::{
    find_media_reference, sanitize_for_model, system_preamble, trim_history, SUMMARY_PROMPT,
};
use super::resolution::ResolutionLoop;
use super::types::{ContextMode, OrchestrationState, Termination};

/// Reply used when the summarization stream cannot be opened.
pub const FALLBACK_REPLY: &str =
    "I'm sorry, I couldn't reach the language model to finish this answer. Please try again.";

// ─── Turn types ─────────────────────────────────────────────────────────────

/// A turn ready for (or after) tool resolution.
#[derive(Debug)]
pub struct PreparedTurn {
    pub state: OrchestrationState,
    /// Retrieval context message, re-sent to the summarizer.
    pub context: Option<ChatMessage>,
}

impl PreparedTurn {
    /// Messages produced by tool resolution so far.
    pub fn turn_messages(&self) -> &[ChatMessage] {
        self.state.turn_messages()
    }
}

/// Which path produced the final stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Intro chunk plus the verbatim media reference.
    Media,
    /// Streaming summarization call.
    Summary,
    /// The summarization call failed; a fixed apology is streamed.
    Fallback,
}

/// The final reply stream and how it was produced.
pub struct AssembledResponse {
    pub kind: ResponseKind,
    pub stream: CompletionStream,
}

impl std::fmt::Debug for AssembledResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssembledResponse")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Everything a caller needs after a turn.
#[derive(Debug)]
pub struct TurnOutcome {
    /// Tool-call and tool-result messages to append to the log, in order.
    pub new_messages: Vec<ChatMessage>,
    pub termination: Termination,
    pub response: AssembledResponse,
}

// ─── Orchestrator ───────────────────────────────────────────────────────────

pub struct Orchestrator {
    api: Arc<dyn CompletionApi>,
    dispatcher: Arc<ToolDispatcher>,
    retriever: Option<Arc<dyn Retriever>>,
    orchestration: OrchestrationConfig,
    retrieval: RetrievalConfig,
}

impl Orchestrator {
    pub fn new(
        api: Arc<dyn CompletionApi>,
        dispatcher: Arc<ToolDispatcher>,
        orchestration: OrchestrationConfig,
    ) -> Self {
        Self {
            api,
            dispatcher,
            retriever: None,
            orchestration,
            retrieval: RetrievalConfig::default(),
        }
    }

    /// Enable retrieval-augmented turns.
    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>, config: RetrievalConfig) -> Self {
        self.retriever = Some(retriever);
        self.retrieval = config;
        self
    }

    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    // ─── Context policy ─────────────────────────────────────────────────

    /// Build the model view for a turn.
    ///
    /// `history` is the stored conversation including the new user message.
    pub async fn prepare(
        &self,
        ctx: &UserContext,
        history: &[ChatMessage],
        mode: ContextMode,
    ) -> PreparedTurn {
        let tools = self.active_tools(mode);
        let context = match mode {
            ContextMode::Tools => None,
            ContextMode::Retrieval => self.retrieval_context(ctx, history).await,
        };

        let mut conversation = vec![ChatMessage::system(system_preamble(
            &tools,
            chrono::Local::now(),
        ))];
        conversation.extend(trim_history(history, self.orchestration.history_window));
        if let Some(context) = &context {
            conversation.push(context.clone());
        }

        tracing::info!(
            user = %ctx.user_id,
            mode = ?mode,
            history_len = history.len(),
            message_count = conversation.len(),
            tool_count = tools.len(),
            "turn prepared"
        );

        let mut state = OrchestrationState::new(conversation, tools);
        // Ids outside the history window still live in the durable log.
        state.reserve_ids(history);

        PreparedTurn { state, context }
    }

    /// Fetch grounding context for the latest user message.
    ///
    /// A failed search is treated like an empty one so the turn keeps its
    /// grounding instruction.
    async fn retrieval_context(
        &self,
        ctx: &UserContext,
        history: &[ChatMessage],
    ) -> Option<ChatMessage> {
        let query = history
            .last()
            .filter(|m| m.role == Role::User)
            .map(|m| m.text().to_string())?;

        let hits = match &self.retriever {
            Some(retriever) => {
                match fetch_context(retriever.as_ref(), ctx, &query, &self.retrieval).await {
                    Ok(hits) => hits,
                    Err(e) => {
                        tracing::warn!(error = %e, "retrieval failed, continuing without documents");
                        Vec::new()
                    }
                }
            }
            None => {
                tracing::warn!("retrieval mode requested but no retriever is configured");
                Vec::new()
            }
        };

        tracing::info!(
            user = %ctx.user_id,
            sources = ?ctx.active_sources,
            hits = hits.len(),
            "retrieval context injected"
        );
        Some(ChatMessage::system(format_context(&query, &hits)))
    }

    // ─── Tool phase ─────────────────────────────────────────────────────

    /// Resolve every tool call for the turn.
    ///
    /// On `ToolLoopExceeded` the messages already produced remain in
    /// `turn.state` for the caller to persist.
    pub async fn resolve(
        &self,
        ctx: &UserContext,
        turn: &mut PreparedTurn,
        events: Option<&mpsc::UnboundedSender<ToolEvent>>,
    ) -> Result<Termination, AgentError> {
        ResolutionLoop::new(
            self.api.as_ref(),
            &self.dispatcher,
            ctx,
            self.orchestration.max_tool_rounds,
        )
        .with_events(events)
        .run(&mut turn.state)
        .await
    }

    // ─── Final stream ───────────────────────────────────────────────────

    /// Produce the reply stream for a resolved turn.
    pub async fn respond(&self, turn: &PreparedTurn) -> AssembledResponse {
        let media = find_media_reference(turn.turn_messages(), &turn.state.tools_enabled);
        if let Some(media) = media {
            tracing::info!(media_len = media.len(), "media result found, skipping summarization");
            let chunks: Vec<Result<String, InferenceError>> =
                vec![Ok(self.orchestration.image_intro.clone()), Ok(media)];
            return AssembledResponse {
                kind: ResponseKind::Media,
                stream: futures::stream::iter(chunks).boxed(),
            };
        }

        let messages = summary_messages(&turn.state.conversation, turn.context.as_ref());
        tracing::info!(message_count = messages.len(), "=== SUMMARY REQUEST ===");

        match self.api.complete_stream(&sanitize_for_model(&messages)).await {
            Ok(stream) => AssembledResponse {
                kind: ResponseKind::Summary,
                stream,
            },
            Err(e) => {
                tracing::warn!(error = %e, "summary stream unavailable, using fallback reply");
                AssembledResponse {
                    kind: ResponseKind::Fallback,
                    stream: futures::stream::iter([Ok::<_, InferenceError>(FALLBACK_REPLY.to_string())])
                        .boxed(),
                }
            }
        }
    }

    /// Prepare, resolve and respond in one call.
    pub async fn run_turn(
        &self,
        ctx: &UserContext,
        history: &[ChatMessage],
        mode: ContextMode,
        events: Option<&mpsc::UnboundedSender<ToolEvent>>,
    ) -> Result<TurnOutcome, AgentError> {
        let mut turn = self.prepare(ctx, history, mode).await;
        let termination = self.resolve(ctx, &mut turn, events).await?;
        let response = self.respond(&turn).await;
        Ok(TurnOutcome {
            new_messages: turn.turn_messages().to_vec(),
            termination,
            response,
        })
    }

    /// Tools offered for a given mode, for callers that display them.
    pub fn active_tools(&self, mode: ContextMode) -> ToolRegistry {
        match mode {
            ContextMode::Tools => self.dispatcher.registry().clone(),
            ContextMode::Retrieval => self.dispatcher.registry().without(catalog::DOCUMENT_SEARCH),
        }
    }
}

/// Summarization input: instruction, non-system conversation, then context.
fn summary_messages(conversation: &[ChatMessage], context: Option<&ChatMessage>) -> Vec<ChatMessage> {
    std::iter::once(ChatMessage::system(SUMMARY_PROMPT))
        .chain(conversation.iter().filter(|m| m.role != Role::System).cloned())
        .chain(context.cloned())
        .collect()
}

// ─── Tests ──────────────────────────────────────────────────────────────────
