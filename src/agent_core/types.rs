//! Shared types for the agent core.
//!
//! Per-turn orchestration state, the resolution loop's state machine, and
//! the context mode a caller selects for a turn.

use std::collections::HashSet;

use crate::inference::types::{ChatMessage, CompletionResponse, ToolCall};
use crate::tools::ToolRegistry;

// ─── Context Mode ───────────────────────────────────────────────────────────

/// How a turn gets its document grounding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContextMode {
    /// The model may call `document_search` itself.
    #[default]
    Tools,
    /// Context is fetched up front and `document_search` is withheld.
    Retrieval,
}

// ─── Orchestration State ────────────────────────────────────────────────────

/// Everything one turn owns while it resolves tool calls.
///
/// Created by response assembly, mutated only by the resolution loop and
/// dropped at the end of the turn. The durable projection is the set of
/// messages returned by [`OrchestrationState::turn_messages`].
#[derive(Debug, Clone)]
pub struct OrchestrationState {
    /// Preamble, trimmed history, optional context, then this turn's messages.
    pub conversation: Vec<ChatMessage>,
    /// Completed dispatch rounds.
    pub iteration_count: u32,
    /// Tools offered to the model this turn.
    pub tools_enabled: ToolRegistry,
    /// Set when a terminal tool succeeded.
    pub stop_requested: bool,
    /// Index of the first message produced by this turn.
    turn_start: usize,
    /// Invocation ids already present in the conversation or claimed this turn.
    seen_ids: HashSet<String>,
}

impl OrchestrationState {
    pub fn new(conversation: Vec<ChatMessage>, tools_enabled: ToolRegistry) -> Self {
        let turn_start = conversation.len();
        let mut state = Self {
            conversation: Vec::new(),
            iteration_count: 0,
            tools_enabled,
            stop_requested: false,
            turn_start,
            seen_ids: HashSet::new(),
        };
        state.reserve_ids(&conversation);
        state.conversation = conversation;
        state
    }

    /// Mark every call id in `messages` as taken, so a model that repeats an
    /// id from earlier turns gets a fresh one.
    pub fn reserve_ids(&mut self, messages: &[ChatMessage]) {
        self.seen_ids.extend(
            messages
                .iter()
                .flat_map(|m| m.tool_calls.iter().flatten())
                .map(|call| call.id.clone()),
        );
    }

    /// Messages appended since the turn started, in order.
    pub fn turn_messages(&self) -> &[ChatMessage] {
        &self.conversation[self.turn_start..]
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.conversation.push(message);
    }

    /// Claim an id for an invocation, minting a fresh one when it is empty
    /// or already used in the conversation.
    pub(crate) fn claim_id(&mut self, proposed: &str) -> String {
        let id = if proposed.trim().is_empty() || self.seen_ids.contains(proposed) {
            let fresh = format!("call_{}", uuid::Uuid::new_v4());
            if !proposed.trim().is_empty() {
                tracing::warn!(duplicate = %proposed, replacement = %fresh, "re-keyed duplicate tool call id");
            }
            fresh
        } else {
            proposed.to_string()
        };
        self.seen_ids.insert(id.clone());
        id
    }
}

// ─── Resolution State Machine ───────────────────────────────────────────────

/// States of the tool resolution loop.
#[derive(Debug)]
pub enum LoopState {
    /// Next step submits the conversation to the model.
    AwaitingModel,
    /// A model response (structured or recovered) is waiting to be inspected.
    EvaluatingCalls(CompletionResponse),
    /// A batch of calls is ready; `content` is the assistant's visible text.
    Dispatching {
        content: Option<String>,
        calls: Vec<ToolCall>,
    },
    Terminated(Termination),
}

/// Why the loop stopped without failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The model answered without tool calls. The answer itself is not
    /// appended; the summarization pass produces the user-facing text.
    Converged { final_text: Option<String> },
    /// A terminal tool succeeded.
    TerminalTool { tool: String },
    /// An unrecoverable transport error; a system note was appended.
    Degraded { status: u16 },
}
