//! SSE streaming response parser for OpenAI-compatible chat completions.
//!
//! Reads a `reqwest::Response` as a byte stream, splits on SSE boundaries
//! (`data: …\n\n`), parses each chunk as JSON and yields the text deltas.
//! The summarization pass is the only streaming caller and it never offers
//! tools, so tool-call deltas are not accumulated here.

use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use super::errors::InferenceError;
use super::tool_call_parser::{parse_arguments, ArgumentSource};
use super::types::{ChatCompletionChunk, CompletionResponse, ToolCall};

// ─── SSE line parser ─────────────────────────────────────────────────────────

/// Parse a streaming HTTP body into text deltas.
///
/// Empty deltas and keep-alives are skipped; `[DONE]` ends the stream.
pub fn parse_sse_stream(
    response: reqwest::Response,
) -> impl Stream<Item = Result<String, InferenceError>> {
    let byte_stream = response.bytes_stream().map(|r| r.map_err(|e| e.to_string()));
    parse_sse_bytes(byte_stream)
}

/// Transport-agnostic core of [`parse_sse_stream`].
pub(crate) fn parse_sse_bytes<S, B>(
    byte_stream: S,
) -> impl Stream<Item = Result<String, InferenceError>>
where
    S: Stream<Item = Result<B, String>> + Unpin,
    B: AsRef<[u8]>,
{
    stream::unfold(
        (byte_stream, Vec::<u8>::new(), false),
        |(mut byte_stream, mut buffer, mut done)| async move {
            loop {
                if done {
                    return None;
                }

                // Decode only whole events so a character split across
                // network chunks is reassembled first.
                if let Some(event_end) = find_event_end(&buffer) {
                    let event: Vec<u8> = buffer.drain(..event_end + 2).collect();
                    let event = String::from_utf8_lossy(&event[..event_end]);

                    match process_event(&event) {
                        SseEvent::Token(t) => return Some((Ok(t), (byte_stream, buffer, done))),
                        SseEvent::Skip => continue,
                        SseEvent::Done => {
                            done = true;
                            continue;
                        }
                        SseEvent::Error(e) => {
                            return Some((Err(e), (byte_stream, buffer, done)))
                        }
                    }
                }

                match byte_stream.next().await {
                    Some(Ok(bytes)) => {
                        buffer.extend_from_slice(bytes.as_ref());
                    }
                    Some(Err(e)) => {
                        done = true;
                        return Some((
                            Err(InferenceError::StreamError {
                                reason: format!("stream read error: {e}"),
                            }),
                            (byte_stream, buffer, done),
                        ));
                    }
                    None => {
                        // Stream ended: flush an unterminated final event.
                        done = true;
                        let tail = std::mem::take(&mut buffer);
                        let tail = String::from_utf8_lossy(&tail);
                        match process_event(tail.trim()) {
                            SseEvent::Token(t) => {
                                return Some((Ok(t), (byte_stream, buffer, done)))
                            }
                            SseEvent::Error(e) => {
                                return Some((Err(e), (byte_stream, buffer, done)))
                            }
                            SseEvent::Skip | SseEvent::Done => return None,
                        }
                    }
                }
            }
        },
    )
}

/// Byte offset of the first `\n\n` event separator.
fn find_event_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

enum SseEvent {
    Token(String),
    Skip,
    Done,
    Error(InferenceError),
}

/// Process a single SSE event (may contain multiple `data:` lines).
fn process_event(event: &str) -> SseEvent {
    let mut data_content = String::new();

    for line in event.lines() {
        if let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) {
            let data = data.trim();
            if data == "[DONE]" {
                return SseEvent::Done;
            }
            data_content.push_str(data);
        }
    }

    if data_content.is_empty() {
        return SseEvent::Skip;
    }

    let chunk: ChatCompletionChunk = match serde_json::from_str(&data_content) {
        Ok(c) => c,
        Err(e) => {
            return SseEvent::Error(InferenceError::StreamError {
                reason: format!("failed to parse SSE chunk: {e}"),
            })
        }
    };

    match chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|t| !t.is_empty())
    {
        Some(token) => SseEvent::Token(token),
        None => SseEvent::Skip,
    }
}

// ─── Non-streaming ───────────────────────────────────────────────────────────

/// Parse a non-streaming response body into content and tool calls.
///
/// Tool-call arguments go through the same tolerant parser as recovered
/// pseudo-tags; a missing id is replaced with `call_<uuid>`.
pub fn parse_non_streaming_response(body: &str) -> Result<CompletionResponse, InferenceError> {
    #[derive(Deserialize)]
    struct NonStreamResponse {
        choices: Vec<NonStreamChoice>,
    }

    #[derive(Deserialize)]
    struct NonStreamChoice {
        message: NonStreamMessage,
        finish_reason: Option<String>,
    }

    #[derive(Deserialize)]
    struct NonStreamMessage {
        content: Option<String>,
        tool_calls: Option<Vec<NonStreamToolCall>>,
    }

    #[derive(Deserialize)]
    struct NonStreamToolCall {
        id: Option<String>,
        function: NonStreamFunction,
    }

    #[derive(Deserialize)]
    struct NonStreamFunction {
        name: String,
        #[serde(default)]
        arguments: String,
    }

    let resp: NonStreamResponse =
        serde_json::from_str(body).map_err(|e| InferenceError::StreamError {
            reason: format!("failed to parse non-streaming response: {e}"),
        })?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or(InferenceError::StreamError {
            reason: "empty choices array".into(),
        })?;

    let content = choice.message.content.filter(|c| !c.is_empty());

    let mut tool_calls = Vec::new();
    for tc in choice.message.tool_calls.unwrap_or_default() {
        let (arguments, source) = parse_arguments(&tc.function.arguments);
        if matches!(source, ArgumentSource::Repaired | ArgumentSource::Defaulted) {
            tracing::warn!(
                tool = %tc.function.name,
                source = ?source,
                "structured tool call carried malformed arguments"
            );
        }
        tool_calls.push(ToolCall {
            id: tc
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| format!("call_{}", Uuid::new_v4())),
            name: tc.function.name,
            arguments,
        });
    }

    Ok(CompletionResponse {
        content,
        tool_calls,
        finish_reason: choice.finish_reason,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
