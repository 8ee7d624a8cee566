//! Tool resolution loop.
//!
//! Submits the conversation to the model, extracts tool calls (structured or
//! recovered from malformed text), dispatches them in order and feeds the
//! results back until the model stops asking for tools, a terminal tool
//! succeeds, or the round-trip budget runs out.
//!
//! ```text
//! AwaitingModel ──► EvaluatingCalls ──► Dispatching ──► AwaitingModel
//!       │                  │                 │
//!       └──► Terminated ◄──┴─────────────────┘
//! ```

use tokio::sync::mpsc;

use crate::inference::tool_call_parser::{
    recover_from_error_body, recover_from_text, PLACEHOLDER_TEXT,
};
use crate::inference::types::{ChatMessage, CompletionResponse, ToolCall, ToolChoice};
use crate::inference::{CompletionApi, InferenceError};
use crate::tools::{ToolDispatcher, ToolEvent, UserContext};

use super::errors::AgentError;
use super::prompts::sanitize_for_model;
use super::types::{LoopState, OrchestrationState, Termination};

/// One turn's resolution loop.
///
/// Borrowed collaborators only; the loop owns nothing but its position in
/// the state machine. All turn state lives in [`OrchestrationState`].
pub struct ResolutionLoop<'a> {
    api: &'a dyn CompletionApi,
    dispatcher: &'a ToolDispatcher,
    ctx: &'a UserContext,
    max_rounds: u32,
    events: Option<&'a mpsc::UnboundedSender<ToolEvent>>,
}

impl<'a> ResolutionLoop<'a> {
    pub fn new(
        api: &'a dyn CompletionApi,
        dispatcher: &'a ToolDispatcher,
        ctx: &'a UserContext,
        max_rounds: u32,
    ) -> Self {
        Self {
            api,
            dispatcher,
            ctx,
            max_rounds,
            events: None,
        }
    }

    /// Report tool progress on `events` while dispatching.
    pub fn with_events(mut self, events: Option<&'a mpsc::UnboundedSender<ToolEvent>>) -> Self {
        self.events = events;
        self
    }

    /// Drive the state machine to completion.
    ///
    /// Only budget exhaustion is an error. Messages appended before the
    /// failure stay in `state` so the caller can still persist them.
    pub async fn run(&self, state: &mut OrchestrationState) -> Result<Termination, AgentError> {
        let mut current = LoopState::AwaitingModel;
        loop {
            current = match current {
                LoopState::AwaitingModel => self.await_model(state).await?,
                LoopState::EvaluatingCalls(response) => evaluate_calls(response),
                LoopState::Dispatching { content, calls } => {
                    self.dispatch(state, content, calls).await
                }
                LoopState::Terminated(termination) => {
                    tracing::info!(
                        rounds = state.iteration_count,
                        new_messages = state.turn_messages().len(),
                        termination = ?termination,
                        "tool resolution finished"
                    );
                    return Ok(termination);
                }
            };
        }
    }

    // ─── AwaitingModel ──────────────────────────────────────────────────

    async fn await_model(&self, state: &mut OrchestrationState) -> Result<LoopState, AgentError> {
        if state.iteration_count >= self.max_rounds {
            tracing::warn!(
                budget = self.max_rounds,
                "tool loop budget exhausted without a final answer"
            );
            return Err(AgentError::ToolLoopExceeded {
                budget: self.max_rounds,
            });
        }

        let messages = sanitize_for_model(&state.conversation);
        let tools = state.tools_enabled.to_tool_definitions();

        tracing::info!(
            user = %self.ctx.user_id,
            round = state.iteration_count,
            message_count = messages.len(),
            tool_count = tools.len(),
            "=== AGENT LOOP ROUND START ==="
        );

        match self.api.complete(&messages, &tools, ToolChoice::Auto).await {
            Ok(response) => {
                tracing::info!(
                    round = state.iteration_count,
                    text_len = response.content.as_deref().map_or(0, str::len),
                    tool_calls_count = response.tool_calls.len(),
                    tool_names = ?response.tool_calls.iter().map(|tc| tc.name.as_str()).collect::<Vec<_>>(),
                    "=== MODEL RESPONSE ==="
                );
                Ok(LoopState::EvaluatingCalls(response))
            }
            Err(err) => Ok(recover_from_transport_error(state, &err)),
        }
    }

    // ─── Dispatching ────────────────────────────────────────────────────

    async fn dispatch(
        &self,
        state: &mut OrchestrationState,
        content: Option<String>,
        calls: Vec<ToolCall>,
    ) -> LoopState {
        let calls: Vec<ToolCall> = calls
            .into_iter()
            .map(|call| ToolCall {
                id: state.claim_id(&call.id),
                ..call
            })
            .collect();

        // The assistant message goes in before any result so results always
        // follow the call they answer.
        state.push(ChatMessage::assistant_tool_calls(content, &calls));

        let mut terminal_tool = None;
        for call in &calls {
            self.emit(ToolEvent::Started {
                invocation_id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            });

            let result = self
                .dispatcher
                .dispatch(self.ctx, &state.tools_enabled, call)
                .await;

            self.emit(ToolEvent::Finished {
                invocation_id: call.id.clone(),
                name: call.name.clone(),
                success: result.success,
                elapsed_ms: result.execution_time_ms,
            });

            if result.success && state.tools_enabled.is_terminal(&call.name) {
                state.stop_requested = true;
                terminal_tool.get_or_insert_with(|| call.name.clone());
            }

            state.push(ChatMessage::tool_result(&call.id, result.content()));
        }

        if state.stop_requested {
            let tool = terminal_tool.unwrap_or_default();
            tracing::info!(tool = %tool, "terminal tool succeeded, ending resolution");
            return LoopState::Terminated(Termination::TerminalTool { tool });
        }

        state.iteration_count += 1;
        LoopState::AwaitingModel
    }

    fn emit(&self, event: ToolEvent) {
        if let Some(tx) = self.events {
            // A dropped receiver only means nobody is watching.
            let _ = tx.send(event);
        }
    }
}

// ─── EvaluatingCalls ────────────────────────────────────────────────────────

/// Pick the calls to dispatch: structured first, then tags in the text.
fn evaluate_calls(response: CompletionResponse) -> LoopState {
    if !response.tool_calls.is_empty() {
        return LoopState::Dispatching {
            content: response.content,
            calls: response.tool_calls,
        };
    }

    if let Some(recovery) = response.content.as_deref().and_then(recover_from_text) {
        let (calls, visible_text) = recovery.into_tool_calls();
        tracing::info!(
            tool_names = ?calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            "recovered tool calls from assistant text"
        );
        return LoopState::Dispatching {
            content: visible_text,
            calls,
        };
    }

    LoopState::Terminated(Termination::Converged {
        final_text: response.content,
    })
}

/// Turn a failed model call into either a recovered call or a degraded stop.
fn recover_from_transport_error(state: &mut OrchestrationState, err: &InferenceError) -> LoopState {
    let status = err.status();

    if let Some(recovery) = err.error_body().and_then(recover_from_error_body) {
        let (calls, visible_text) = recovery.into_tool_calls();
        tracing::info!(
            status,
            failed_generation = err.is_failed_generation(),
            tool = %calls.first().map(|c| c.name.as_str()).unwrap_or_default(),
            "recovered tool call from model error body"
        );
        return LoopState::EvaluatingCalls(CompletionResponse {
            content: Some(visible_text.unwrap_or_else(|| PLACEHOLDER_TEXT.to_string())),
            tool_calls: calls,
            finish_reason: Some("tool_calls".to_string()),
        });
    }

    tracing::error!(status, error = %err, "unrecoverable model error, ending turn degraded");
    state.push(ChatMessage::system(format!(
        "[System Error] The previous tool call failed with status {status}. \
         Please ask the user to rephrase."
    )));
    LoopState::Terminated(Termination::Degraded { status })
}

// ─── Tests ──────────────────────────────────────────────────────────────────
