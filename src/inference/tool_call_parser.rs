//! Malformed tool-call recovery.
//!
//! Llama-family models served by Groq sometimes skip the structured
//! `tool_calls` channel and write a pseudo-tag into their output instead:
//!
//! ```text
//! <function=web_search(query="weather")>
//! <function=web_search{"query": "weather"}</function>
//! <function=web_search>{"query": "weather"}</function>
//! <function=web_search,{"query": "weather"}></function>
//! ```
//!
//! This shows up in two places:
//!
//! 1. **Error bodies**: the provider rejects the generation with HTTP 400
//!    and echoes it back as `failed_generation`.
//! 2. **Inline text**: the generation is accepted and the tag sits in the
//!    assistant's `content`.
//!
//! Both entry points are pure functions over strings so they can be tested
//! without a network. Correlation ids are assigned by
//! [`Recovery::into_tool_calls`], not here.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::types::ToolCall;

const TAG_CLOSE: &str = "</function>";

/// Visible text used when an error-path recovery leaves no prose behind.
pub const PLACEHOLDER_TEXT: &str = "Processing request...";

static TAG_OPEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<function\s*=\s*([A-Za-z0-9_.\-]+)").expect("tag open regex is valid")
});

// ─── Public Types ────────────────────────────────────────────────────────────

/// How a recovered invocation's arguments were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentSource {
    /// The tag carried no arguments at all.
    Empty,
    /// Strict JSON object.
    Json,
    /// JSON object after repair heuristics.
    Repaired,
    /// Python-style `key="value"` pairs.
    Kwargs,
    /// Nothing parseable; replaced by `{}`. May mask a corrupt call.
    Defaulted,
}

/// A tool invocation extracted from free text.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveredInvocation {
    pub name: String,
    pub arguments: Value,
    pub source: ArgumentSource,
}

/// Outcome of a successful recovery.
#[derive(Debug, Clone, PartialEq)]
pub struct Recovery {
    /// Invocations in the order their tags appeared.
    pub invocations: Vec<RecoveredInvocation>,
    /// Prose left after every recognized tag was removed, `None` if blank.
    pub visible_text: Option<String>,
}

impl Recovery {
    /// Convert to tool calls with fresh `call_<uuid>` ids.
    pub fn into_tool_calls(self) -> (Vec<ToolCall>, Option<String>) {
        let calls = self
            .invocations
            .into_iter()
            .map(|inv| ToolCall {
                id: format!("call_{}", Uuid::new_v4()),
                name: inv.name,
                arguments: inv.arguments,
            })
            .collect();
        (calls, self.visible_text)
    }
}

// ─── Entry Points ────────────────────────────────────────────────────────────

/// Recover a single invocation from a completion-API error body.
///
/// Strategies, in order:
/// 1. Parse the outermost `{...}` as JSON and read `failed_generation`
///    (top level or under `error`).
/// 2. Scan the raw body for a `<function=` tag.
///
/// Only the first tag is used; any extra tags are logged and dropped.
pub fn recover_from_error_body(body: &str) -> Option<Recovery> {
    let (generation, tags) = match failed_generation(body) {
        Some(generation) => {
            let tags = scan_tags(&generation);
            if tags.is_empty() {
                (body.to_string(), scan_tags(body))
            } else {
                (generation, tags)
            }
        }
        None => (body.to_string(), scan_tags(body)),
    };

    if tags.is_empty() {
        tracing::debug!(
            body_preview = %preview(body, 200),
            "no pseudo-tag found in error body"
        );
        return None;
    }

    if tags.len() > 1 {
        tracing::warn!(
            tag_count = tags.len(),
            kept = %tags[0].invocation.name,
            "error body carried several pseudo-tags; only the first is recovered"
        );
    }

    let visible_text = strip_spans(&generation, &tags);
    let first = tags.into_iter().next()?;
    log_defaulted(&first.invocation);

    Some(Recovery {
        invocations: vec![first.invocation],
        visible_text,
    })
}

/// Recover every invocation embedded in an assistant's text content.
pub fn recover_from_text(text: &str) -> Option<Recovery> {
    if !text.contains("<function") {
        return None;
    }

    let tags = scan_tags(text);
    if tags.is_empty() {
        return None;
    }

    let visible_text = strip_spans(text, &tags);
    let invocations: Vec<RecoveredInvocation> = tags
        .into_iter()
        .map(|t| {
            log_defaulted(&t.invocation);
            t.invocation
        })
        .collect();

    Some(Recovery {
        invocations,
        visible_text,
    })
}

// ─── Error-body JSON search ──────────────────────────────────────────────────

/// Pull `failed_generation` out of a (possibly prefixed) JSON error body.
///
/// SDKs often prepend the status to the payload (`400 {"error":...}`), so
/// the search runs over the first `{` to the last `}`.
fn failed_generation(body: &str) -> Option<String> {
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end <= start {
        return None;
    }

    let parsed: Value = serde_json::from_str(&body[start..=end]).ok()?;
    parsed
        .get("error")
        .and_then(|e| e.get("failed_generation"))
        .or_else(|| parsed.get("failed_generation"))
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(String::from)
}

// ─── Tag scanning ────────────────────────────────────────────────────────────

/// A recognized tag and its byte span in the source text.
struct TagMatch {
    start: usize,
    end: usize,
    invocation: RecoveredInvocation,
}

/// Find every `<function=NAME...>` tag, left to right, without overlap.
fn scan_tags(text: &str) -> Vec<TagMatch> {
    let mut tags = Vec::new();
    let mut search_from = 0;

    while let Some(caps) = TAG_OPEN_RE.captures_at(text, search_from) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        let (raw_args, end) = scan_arguments(text, whole.end());
        let (arguments, source) = parse_arguments(raw_args);

        tags.push(TagMatch {
            start: whole.start(),
            end,
            invocation: RecoveredInvocation {
                name: name.as_str().to_string(),
                arguments,
                source,
            },
        });

        if end <= search_from {
            break;
        }
        search_from = end;
    }

    tags
}

/// Locate the argument substring that follows a tag name.
///
/// Returns `(raw_args, tag_end)`. The tag ends at `</function>`, a bare
/// `>`, or end of string; bracketed arguments are matched string-aware so a
/// `>` inside a JSON value does not cut the tag short.
fn scan_arguments(text: &str, from: usize) -> (&str, usize) {
    let bytes = text.as_bytes();
    let mut i = skip_while(bytes, from, |b| b.is_ascii_whitespace() || b == b'=' || b == b',');

    // `<function=name>{...}</function>`: the `>` closes the name, not the tag.
    if i < bytes.len() && bytes[i] == b'>' {
        let after = skip_while(bytes, i + 1, |b| b.is_ascii_whitespace());
        if after < bytes.len() && (bytes[after] == b'{' || bytes[after] == b'(') {
            i = after;
        } else {
            return ("", close_tag(text, i + 1));
        }
    }

    if i >= bytes.len() {
        return ("", bytes.len());
    }

    match bytes[i] {
        b'(' => match find_matching(text, i, b'(', b')') {
            Some(close) => (&text[i + 1..close], finish_tag(text, close + 1)),
            None => {
                let end = raw_tag_end(text, i + 1);
                (text[i + 1..end].trim_end_matches(')'), close_tag(text, end))
            }
        },
        b'{' => match find_matching(text, i, b'{', b'}') {
            Some(close) => (&text[i..=close], finish_tag(text, close + 1)),
            None => {
                let end = text[i..].find(TAG_CLOSE).map_or(bytes.len(), |p| i + p);
                (&text[i..end], close_tag(text, end))
            }
        },
        _ => {
            let end = raw_tag_end(text, i);
            (&text[i..end], close_tag(text, end))
        }
    }
}

/// End of an unbracketed argument run: the first `</function>` or `>`.
fn raw_tag_end(text: &str, from: usize) -> usize {
    let close = text[from..].find(TAG_CLOSE).map(|p| from + p);
    let gt = text[from..].find('>').map(|p| from + p);
    match (close, gt) {
        (Some(c), Some(g)) => c.min(g),
        (Some(c), None) => c,
        (None, Some(g)) => g,
        (None, None) => text.len(),
    }
}

/// Consume the tag terminator after bracketed arguments: optional
/// whitespace, then `></function>`, `>`, or `</function>`.
fn finish_tag(text: &str, from: usize) -> usize {
    let i = skip_while(text.as_bytes(), from, |b| b == b' ' || b == b'\t');
    if text[i..].starts_with(TAG_CLOSE) {
        return i + TAG_CLOSE.len();
    }
    if text[i..].starts_with('>') {
        return close_tag(text, i + 1);
    }
    from
}

/// Consume a `>` at `at` (if present) and an immediately following `</function>`.
fn close_tag(text: &str, at: usize) -> usize {
    let mut i = at;
    if text[i..].starts_with('>') {
        i += 1;
    }
    let j = skip_while(text.as_bytes(), i, |b| b == b' ' || b == b'\t');
    if text[j..].starts_with(TAG_CLOSE) {
        j + TAG_CLOSE.len()
    } else {
        i
    }
}

fn skip_while(bytes: &[u8], mut i: usize, pred: impl Fn(u8) -> bool) -> usize {
    while i < bytes.len() && pred(bytes[i]) {
        i += 1;
    }
    i
}

/// Find the byte index of the `close` matching the `open` at `start`.
///
/// Delimiters inside quoted strings are ignored, so
/// `(query="a (b) c")` matches the outer parens.
fn find_matching(text: &str, start: usize, open: u8, close: u8) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut string_char = 0u8;
    let mut i = start;

    while i < bytes.len() {
        let b = bytes[i];

        if in_string {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == string_char {
                in_string = false;
            }
            i += 1;
            continue;
        }

        if b == b'"' || (b == b'\'' && open == b'(') {
            in_string = true;
            string_char = b;
        } else if b == open {
            depth += 1;
        } else if b == close {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}

/// Remove every tag span and return the trimmed remainder.
fn strip_spans(text: &str, tags: &[TagMatch]) -> Option<String> {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for tag in tags {
        if tag.start >= cursor {
            out.push_str(&text[cursor..tag.start]);
        }
        cursor = cursor.max(tag.end);
    }
    out.push_str(&text[cursor.min(text.len())..]);

    let trimmed = out.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

// ─── Argument parsing ────────────────────────────────────────────────────────

/// Parse a raw argument substring into a JSON object.
///
/// Order: strict JSON, repaired JSON, Python kwargs, then `{}`.
pub fn parse_arguments(raw: &str) -> (Value, ArgumentSource) {
    let raw = raw.trim();
    if raw.is_empty() {
        return (Value::Object(Map::new()), ArgumentSource::Empty);
    }

    let unescaped = unescape_if_fully_escaped(raw);
    let raw = unescaped.as_deref().unwrap_or(raw);

    if raw.starts_with('{') {
        if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(raw) {
            return (v, ArgumentSource::Json);
        }
        if let Some(v @ Value::Object(_)) = repair_malformed_tool_call_json(raw) {
            return (v, ArgumentSource::Repaired);
        }
    }

    if let Some(map) = parse_kwargs(raw) {
        return (Value::Object(map), ArgumentSource::Kwargs);
    }

    (Value::Object(Map::new()), ArgumentSource::Defaulted)
}

/// `{\"a\": 1}` → `{"a": 1}` when every quote in the input is escaped.
///
/// Happens when the tag is scraped out of a JSON string without decoding it.
fn unescape_if_fully_escaped(raw: &str) -> Option<String> {
    let bytes = raw.as_bytes();
    let quotes = bytes.iter().filter(|&&b| b == b'"').count();
    if quotes == 0 {
        return None;
    }
    let escaped = bytes
        .windows(2)
        .filter(|w| w[0] == b'\\' && w[1] == b'"')
        .count();
    if escaped == quotes {
        Some(raw.replace("\\\"", "\""))
    } else {
        None
    }
}

fn log_defaulted(inv: &RecoveredInvocation) {
    if inv.source == ArgumentSource::Defaulted {
        tracing::warn!(
            tool = %inv.name,
            "recovered tool call had unparseable arguments; defaulting to {{}}"
        );
    }
}

/// Parse Python-style kwargs like `key="value", n=3` into a JSON object.
///
/// Returns `None` when no `key=value` pair is found.
fn parse_kwargs(raw: &str) -> Option<Map<String, Value>> {
    let mut map = Map::new();
    let mut remaining = raw;

    while !remaining.is_empty() {
        remaining = remaining.trim_start_matches([',', ' ', '\n', '\t']).trim();
        if remaining.is_empty() {
            break;
        }

        let eq_idx = remaining.find('=')?;
        let key = remaining[..eq_idx].trim().trim_matches('"').trim_matches('\'');
        if key.is_empty() || key.contains(char::is_whitespace) {
            return None;
        }
        remaining = &remaining[eq_idx + 1..];

        let (value, rest) = parse_kwarg_value(remaining);
        map.insert(key.to_string(), value);
        remaining = rest;
    }

    if map.is_empty() {
        None
    } else {
        Some(map)
    }
}

/// Parse a single kwarg value. Returns `(value, remaining_str)`.
fn parse_kwarg_value(input: &str) -> (Value, &str) {
    let input = input.trim();

    if input.starts_with('"') || input.starts_with('\'') {
        let quote = input.as_bytes()[0] as char;
        let mut value = String::new();
        let mut escaped = false;
        for (idx, ch) in input.char_indices().skip(1) {
            if escaped {
                value.push(ch);
                escaped = false;
                continue;
            }
            if ch == '\\' {
                escaped = true;
                continue;
            }
            if ch == quote {
                return (Value::String(value), &input[idx + ch.len_utf8()..]);
            }
            value.push(ch);
        }
        // Unterminated string: take everything.
        return (Value::String(value), "");
    }

    // Nested JSON value.
    if input.starts_with('{') || input.starts_with('[') {
        let (open, close) = if input.starts_with('{') {
            (b'{', b'}')
        } else {
            (b'[', b']')
        };
        if let Some(end) = find_matching(input, 0, open, close) {
            if let Ok(v) = serde_json::from_str::<Value>(&input[..=end]) {
                return (v, &input[end + 1..]);
            }
        }
    }

    let end_idx = input.find(',').unwrap_or(input.len());
    let val_str = input[..end_idx].trim();

    if let Ok(n) = val_str.parse::<i64>() {
        return (Value::Number(n.into()), &input[end_idx..]);
    }
    if let Ok(n) = val_str.parse::<f64>() {
        if let Some(num) = serde_json::Number::from_f64(n) {
            return (Value::Number(num), &input[end_idx..]);
        }
    }

    match val_str.to_lowercase().as_str() {
        "true" => return (Value::Bool(true), &input[end_idx..]),
        "false" => return (Value::Bool(false), &input[end_idx..]),
        "none" | "null" => return (Value::Null, &input[end_idx..]),
        _ => {}
    }

    (Value::String(val_str.to_string()), &input[end_idx..])
}

// ─── Malformed JSON Repair ──────────────────────────────────────────────────

/// Attempt to repair malformed JSON arguments.
///
/// Malformations seen from chat models:
/// 1. Doubled quotes: `"key":""value"`
/// 2. Trailing commas: `{"a":1,}`
/// 3. Missing closing brace
/// 4. Raw control characters in string values
///
/// Returns `Some(value)` if repair succeeds, `None` if irreparable.
pub fn repair_malformed_tool_call_json(raw: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str::<Value>(raw) {
        return Some(v);
    }

    let mut repaired = repair_double_quotes(raw);
    if let Ok(v) = serde_json::from_str::<Value>(&repaired) {
        return Some(v);
    }

    repaired = repair_trailing_commas(&repaired);
    if let Ok(v) = serde_json::from_str::<Value>(&repaired) {
        return Some(v);
    }

    // A truncated object often ends in a comma, so re-check after closing it.
    repaired = repair_trailing_commas(&repair_unbalanced_braces(&repaired));
    if let Ok(v) = serde_json::from_str::<Value>(&repaired) {
        return Some(v);
    }

    repaired = repair_control_characters(&repaired);
    serde_json::from_str::<Value>(&repaired).ok()
}

/// Collapse `:""value` into `:"value"`, leaving real empty strings alone.
fn repair_double_quotes(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if i + 3 < bytes.len()
            && bytes[i] == b':'
            && bytes[i + 1] == b'"'
            && bytes[i + 2] == b'"'
            && !matches!(bytes[i + 3], b',' | b'}' | b' ')
        {
            result.extend_from_slice(b":\"");
            i += 3;
            continue;
        }
        result.push(bytes[i]);
        i += 1;
    }

    String::from_utf8(result).unwrap_or_else(|_| input.to_string())
}

/// Remove trailing commas before `}` or `]`.
fn repair_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut result = String::with_capacity(input.len());

    for (i, &ch) in chars.iter().enumerate() {
        if ch == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        result.push(ch);
    }

    result
}

/// Close any string left open and append missing closing braces.
fn repair_unbalanced_braces(input: &str) -> String {
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for ch in input.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => depth -= 1,
            _ => {}
        }
    }

    let mut result = input.to_string();
    if in_string {
        result.push('"');
    }
    for _ in 0..depth.max(0) {
        result.push('}');
    }
    result
}

/// Remove control characters other than `\n`, `\r`, `\t`.
fn repair_control_characters(input: &str) -> String {
    input
        .chars()
        .filter(|&c| !c.is_control() || c == '\n' || c == '\r' || c == '\t')
        .collect()
}

/// Truncate for logging on a char boundary.
fn preview(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
