//! The built-in tool catalog.
//!
//! Google Workspace, web search, document retrieval and image generation.
//! Providers for these live outside the crate and are bound by name.

use serde_json::json;

use super::types::ToolSpec;

pub const GOOGLE_CALENDAR_LIST_EVENTS: &str = "google_calendar_list_events";
pub const GOOGLE_CALENDAR_CREATE_EVENT: &str = "google_calendar_create_event";
pub const GOOGLE_GMAIL_LIST_MESSAGES: &str = "google_gmail_list_messages";
pub const GOOGLE_GMAIL_GET_MESSAGE: &str = "google_gmail_get_message";
pub const GOOGLE_DRIVE_LIST_FILES: &str = "google_drive_list_files";
pub const GOOGLE_DOCS_GET_CONTENT: &str = "google_docs_get_content";
pub const GOOGLE_DOCS_CREATE: &str = "google_docs_create";
pub const WEB_SEARCH: &str = "web_search";
pub const DOCUMENT_SEARCH: &str = "document_search";
pub const IMAGE_GENERATE: &str = "image_generate";

/// Aspect ratios accepted by `image_generate`.
pub const IMAGE_ASPECT_RATIOS: [&str; 4] = ["1:1", "16:9", "4:3", "3:4"];

fn spec(name: &str, description: &str, parameters: serde_json::Value) -> ToolSpec {
    ToolSpec {
        name: name.to_string(),
        description: description.to_string(),
        parameters,
        terminal: false,
    }
}

/// All built-in tools, in the order they are offered to the model.
pub fn builtin_tools() -> Vec<ToolSpec> {
    vec![
        spec(
            GOOGLE_CALENDAR_LIST_EVENTS,
            "List upcoming events from Google Calendar",
            json!({
                "type": "object",
                "properties": {
                    "timeMin": { "type": "string", "description": "ISO string for the minimum time to search from" },
                    "maxResults": { "type": "number", "description": "Maximum number of events to return" }
                }
            }),
        ),
        spec(
            GOOGLE_CALENDAR_CREATE_EVENT,
            "Create a new event in Google Calendar",
            json!({
                "type": "object",
                "required": ["summary", "start", "end"],
                "properties": {
                    "summary": { "type": "string", "description": "Event title" },
                    "description": { "type": "string", "description": "Event description" },
                    "start": { "type": "string", "description": "Start time (ISO string)" },
                    "end": { "type": "string", "description": "End time (ISO string)" }
                }
            }),
        ),
        spec(
            GOOGLE_GMAIL_LIST_MESSAGES,
            "List recent emails from Gmail",
            json!({
                "type": "object",
                "properties": {
                    "maxResults": { "type": "number", "description": "Maximum number of messages to return" },
                    "q": { "type": "string", "description": "Query string for searching emails" }
                }
            }),
        ),
        spec(
            GOOGLE_GMAIL_GET_MESSAGE,
            "Get the content of a specific email by ID",
            json!({
                "type": "object",
                "required": ["id"],
                "properties": {
                    "id": { "type": "string", "description": "The ID of the Gmail message" }
                }
            }),
        ),
        spec(
            GOOGLE_DRIVE_LIST_FILES,
            "List files from Google Drive",
            json!({
                "type": "object",
                "properties": {
                    "pageSize": { "type": "number", "description": "Maximum number of files to return" },
                    "q": { "type": "string", "description": "Query string for searching files" }
                }
            }),
        ),
        spec(
            GOOGLE_DOCS_GET_CONTENT,
            "Get the text content of a Google Doc",
            json!({
                "type": "object",
                "required": ["documentId"],
                "properties": {
                    "documentId": { "type": "string", "description": "The ID of the Google Doc" }
                }
            }),
        ),
        spec(
            GOOGLE_DOCS_CREATE,
            "Create a new Google Doc with specified title and content",
            json!({
                "type": "object",
                "required": ["title", "content"],
                "properties": {
                    "title": { "type": "string", "description": "Title of the new document" },
                    "content": { "type": "string", "description": "Initial text content of the document" }
                }
            }),
        ),
        spec(
            WEB_SEARCH,
            "Search the web for real-time information, latest news, current stock prices, \
             weather, or any data beyond the model's training cutoff. Use this whenever the \
             user asks for 'today's' or 'current' information.",
            json!({
                "type": "object",
                "required": ["query"],
                "properties": {
                    "query": { "type": "string", "description": "The search query (e.g., 'Nvidia stock price today')" }
                }
            }),
        ),
        spec(
            DOCUMENT_SEARCH,
            "Search inside the user's uploaded documents",
            json!({
                "type": "object",
                "required": ["query"],
                "properties": {
                    "query": { "type": "string", "description": "The query to search in documents" }
                }
            }),
        ),
        ToolSpec {
            terminal: true,
            ..spec(
                IMAGE_GENERATE,
                "Generate an image from a text prompt. Use this whenever the user asks to \
                 create, draw, or generate an image/picture.",
                json!({
                    "type": "object",
                    "required": ["prompt"],
                    "properties": {
                        "prompt": { "type": "string", "description": "A detailed description of the image to generate" },
                        "aspectRatio": {
                            "type": "string",
                            "enum": IMAGE_ASPECT_RATIOS,
                            "description": "The aspect ratio of the generated image (default: 1:1)"
                        }
                    }
                }),
            )
        },
    ]
}
