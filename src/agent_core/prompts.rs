//! System prompts and message shaping for model calls.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{DateTime, Local};
use regex::Regex;

use crate::inference::types::{ChatMessage, Role};
use crate::tools::ToolRegistry;

/// Instruction for the final streaming pass.
pub const SUMMARY_PROMPT: &str = "Summarize the results for the user.\n\
- If a tool failed, explain why.\n\
- If a document was created, confirm with: \"I created a Google Doc titled [Title]. \
It's located in My Drive → MCP Chatbot. Document ID: [ID]\".\n\
- If you didn't execute an upload tool requested by the user, say: \
\"I can generate the content, but I cannot upload it yet.\"\n\
- DO NOT call any more tools.";

/// Replacement for inline base64 images in history.
const TRUNCATED_IMAGE: &str = "![Generated Image]([Image Data Truncated])";

static DATA_URI_IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!\[(.*?)\]\(data:image/.*?;base64,.*?\)").expect("data uri image regex is valid")
});

static MARKDOWN_IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!\[[^\]]*\]\([^)\s]+\)").expect("markdown image regex is valid")
});

/// The fixed system preamble for the tool phase.
pub fn system_preamble(tools: &ToolRegistry, now: DateTime<Local>) -> String {
    format!(
        "You are a helpful AI assistant.\n\n\
         Current Time: {}\n\n\
         CRITICAL RULES:\n\
         1. Never output raw XML/HTML tags like '<function=...'. Use the official 'tool_calls' format.\n\
         2. Document Saving: If the user asks to save/create a Google Doc and you do NOT call \
         'google_docs_create', then say: \"I can generate the content, but I cannot upload/save it yet.\" \
         THIS DOES NOT APPLY TO IMAGES.\n\
         3. Successful Uploads: If 'google_docs_create' is successful, you MUST provide the title, \
         the location (My Drive -> MCP Chatbot), and the Document ID.\n\
         4. Image Generation: You ARE capable of generating images. When 'image_generate' succeeds, \
         output the Markdown image string immediately. Do NOT say you cannot upload images.\n\n\
         Available Tools:\n{}",
        now.format("%Y-%m-%d %H:%M:%S %Z"),
        tools.summary()
    )
}

/// Keep the last `window` messages of prior history.
///
/// Leading tool results whose assistant call was cut off are dropped too, so
/// every forwarded tool message still follows its call.
pub fn trim_history(history: &[ChatMessage], window: usize) -> Vec<ChatMessage> {
    let start = history.len().saturating_sub(window);
    history[start..]
        .iter()
        .skip_while(|m| m.role == Role::Tool)
        .cloned()
        .collect()
}

/// Wire copy of `messages` with inline base64 images collapsed.
pub fn sanitize_for_model(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|m| {
            let content = m.content.as_deref().map(|c| {
                DATA_URI_IMAGE_RE
                    .replace_all(c, TRUNCATED_IMAGE)
                    .into_owned()
            });
            ChatMessage {
                content,
                ..m.clone()
            }
        })
        .collect()
}

/// Find a media reference among the results of terminal tools.
///
/// Tool message content is the JSON encoding of the provider's payload; a
/// payload that is a string containing a markdown image is returned
/// decoded and otherwise untouched. Results are matched to their call
/// through `tool_call_id`; other tools' output is never treated as media.
pub fn find_media_reference(messages: &[ChatMessage], tools: &ToolRegistry) -> Option<String> {
    let terminal_calls: HashSet<&str> = messages
        .iter()
        .flat_map(|m| m.tool_calls.iter().flatten())
        .filter(|call| tools.is_terminal(&call.function.name))
        .map(|call| call.id.as_str())
        .collect();

    messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .filter(|m| {
            m.tool_call_id
                .as_deref()
                .is_some_and(|id| terminal_calls.contains(id))
        })
        .filter_map(|m| serde_json::from_str::<String>(m.text()).ok())
        .find(|payload| MARKDOWN_IMAGE_RE.is_match(payload))
}
