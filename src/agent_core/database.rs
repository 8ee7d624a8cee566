//! SQLite conversation log.
//!
//! Uses `rusqlite` synchronously behind a mutex; statements are short and
//! the log is only written at turn boundaries. WAL mode is enabled so reads
//! can proceed while a turn appends.

use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use super::conversation::ConversationLog;
use super::errors::AgentError;
use crate::inference::types::{ChatMessage, Role, ToolCallResponse};

/// Characters of the first user message used as the conversation title.
const TITLE_CHARS: usize = 40;

/// Stored conversation metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
}

// ─── Database ───────────────────────────────────────────────────────────────

/// SQLite-backed [`ConversationLog`].
pub struct SqliteConversationLog {
    conn: Mutex<Connection>,
}

impl SqliteConversationLog {
    /// Open (or create) the log database at the given path.
    ///
    /// Pass `":memory:"` for an in-memory database (tests).
    pub fn open(path: &str) -> Result<Self, AgentError> {
        let conn = Connection::open(path)?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        create_tables(&conn)?;
        tracing::debug!(path, "conversation log opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, AgentError>,
    ) -> Result<T, AgentError> {
        let conn = self.conn.lock().map_err(|e| AgentError::DatabaseError {
            reason: format!("connection lock poisoned: {e}"),
        })?;
        f(&conn)
    }

    /// Look up a conversation's metadata.
    pub fn conversation(&self, id: &str) -> Result<Option<ConversationSummary>, AgentError> {
        self.with_conn(|conn| {
            let summary = conn
                .query_row(
                    "SELECT id, title, created_at, updated_at FROM conversations WHERE id = ?1",
                    params![id],
                    row_to_summary,
                )
                .optional()?;
            Ok(summary)
        })
    }

    /// All conversations, most recently updated first.
    pub fn list_conversations(&self) -> Result<Vec<ConversationSummary>, AgentError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, created_at, updated_at
                 FROM conversations
                 ORDER BY updated_at DESC, rowid DESC",
            )?;
            let rows = stmt.query_map([], row_to_summary)?;

            let mut conversations = Vec::new();
            for row in rows {
                conversations.push(row?);
            }
            Ok(conversations)
        })
    }

    /// Delete a conversation and its messages.
    pub fn delete_conversation(&self, id: &str) -> Result<(), AgentError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM messages WHERE conversation_id = ?1", params![id])?;
            conn.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
            Ok(())
        })
    }
}

/// Create all required tables if they don't exist.
fn create_tables(conn: &Connection) -> Result<(), AgentError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            role TEXT NOT NULL,
            content TEXT,
            name TEXT,
            tool_calls TEXT,
            tool_call_id TEXT,
            FOREIGN KEY (conversation_id) REFERENCES conversations(id)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, id);
        ",
    )?;
    Ok(())
}

/// Upsert the conversation row and insert one message.
fn insert_message(
    conn: &Connection,
    conversation_id: &str,
    message: &ChatMessage,
) -> Result<(), AgentError> {
    let tool_calls_json = message
        .tool_calls
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let title = if message.role == Role::User {
        conversation_title(message.text())
    } else {
        String::new()
    };

    // First message creates the row; a blank title is filled by the
    // first user message that arrives.
    conn.execute(
        "INSERT INTO conversations (id, title) VALUES (?1, ?2)
         ON CONFLICT(id) DO UPDATE SET
             updated_at = datetime('now'),
             title = CASE WHEN conversations.title = '' THEN excluded.title
                          ELSE conversations.title END",
        params![conversation_id, title],
    )?;
    conn.execute(
        "INSERT INTO messages
         (conversation_id, role, content, name, tool_calls, tool_call_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            conversation_id,
            message.role.as_str(),
            message.content,
            message.name,
            tool_calls_json,
            message.tool_call_id,
        ],
    )?;
    Ok(())
}

#[async_trait]
impl ConversationLog for SqliteConversationLog {
    async fn append(&self, conversation_id: &str, message: &ChatMessage) -> Result<(), AgentError> {
        self.with_conn(|conn| insert_message(conn, conversation_id, message))
    }

    /// All-or-nothing: a tool-call message never lands without its results.
    async fn append_all(
        &self,
        conversation_id: &str,
        messages: &[ChatMessage],
    ) -> Result<(), AgentError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            for message in messages {
                insert_message(&tx, conversation_id, message)?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    async fn messages(&self, conversation_id: &str) -> Result<Vec<ChatMessage>, AgentError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT role, content, name, tool_calls, tool_call_id
                 FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![conversation_id], |row| Ok(row_to_message(row)))?;

            let mut messages = Vec::new();
            for row in rows {
                messages.push(row?);
            }
            Ok(messages)
        })
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

/// First 40 characters of the message, with an ellipsis when cut.
fn conversation_title(text: &str) -> String {
    let mut title: String = text.chars().take(TITLE_CHARS).collect();
    if text.chars().nth(TITLE_CHARS).is_some() {
        title.push_str("...");
    }
    title
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationSummary> {
    Ok(ConversationSummary {
        id: row.get(0)?,
        title: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

/// Map a row to a ChatMessage. Corrupt columns degrade to `None`.
fn row_to_message(row: &rusqlite::Row<'_>) -> ChatMessage {
    let role_str: String = row.get(0).unwrap_or_default();
    ChatMessage {
        role: str_to_role(&role_str),
        content: row.get(1).unwrap_or(None),
        name: row.get(2).unwrap_or(None),
        tool_calls: row
            .get::<_, Option<String>>(3)
            .unwrap_or(None)
            .and_then(|s| serde_json::from_str::<Vec<ToolCallResponse>>(&s).ok()),
        tool_call_id: row.get(4).unwrap_or(None),
    }
}

/// Parse a string into a Role.
fn str_to_role(s: &str) -> Role {
    match s {
        "system" => Role::System,
        "user" => Role::User,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        _ => Role::User,
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
