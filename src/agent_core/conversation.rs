//! Conversation log: the durable, append-only record the core writes through.
//!
//! The core never owns history storage. Callers hand it a [`ConversationLog`]
//! and append at turn boundaries; [`ConversationLocks`] serializes those
//! writes per conversation id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::inference::types::ChatMessage;

use super::errors::AgentError;

// ─── ConversationLog ────────────────────────────────────────────────────────

/// Append-only message store keyed by conversation id.
#[async_trait]
pub trait ConversationLog: Send + Sync {
    async fn append(&self, conversation_id: &str, message: &ChatMessage) -> Result<(), AgentError>;

    /// Every message of the conversation, oldest first. Unknown ids are empty.
    async fn messages(&self, conversation_id: &str) -> Result<Vec<ChatMessage>, AgentError>;

    async fn append_all(
        &self,
        conversation_id: &str,
        messages: &[ChatMessage],
    ) -> Result<(), AgentError> {
        for message in messages {
            self.append(conversation_id, message).await?;
        }
        Ok(())
    }
}

/// Process-local log, for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryConversationLog {
    conversations: Mutex<HashMap<String, Vec<ChatMessage>>>,
}

impl InMemoryConversationLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationLog for InMemoryConversationLog {
    async fn append(&self, conversation_id: &str, message: &ChatMessage) -> Result<(), AgentError> {
        let mut conversations = self.conversations.lock().map_err(|e| AgentError::ConversationLog {
            reason: format!("lock poisoned: {e}"),
        })?;
        conversations
            .entry(conversation_id.to_string())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn messages(&self, conversation_id: &str) -> Result<Vec<ChatMessage>, AgentError> {
        let conversations = self.conversations.lock().map_err(|e| AgentError::ConversationLog {
            reason: format!("lock poisoned: {e}"),
        })?;
        Ok(conversations.get(conversation_id).cloned().unwrap_or_default())
    }
}

// ─── Per-conversation write locks ───────────────────────────────────────────

/// One async mutex per conversation id.
///
/// Turns on the same conversation queue behind each other; different
/// conversations never contend.
#[derive(Debug, Default, Clone)]
pub struct ConversationLocks {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive write access to `conversation_id`.
    ///
    /// The guard is owned so it can move into spawned tasks and streams.
    pub async fn acquire(&self, conversation_id: &str) -> Result<OwnedMutexGuard<()>, AgentError> {
        let lock = {
            let mut locks = self.locks.lock().map_err(|e| AgentError::ConversationLog {
                reason: format!("lock table poisoned: {e}"),
            })?;
            // Drop entries nobody holds so the table does not grow forever.
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            Arc::clone(
                locks
                    .entry(conversation_id.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        Ok(lock.lock_owned().await)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_in_memory_append_and_read() {
        let log = InMemoryConversationLog::new();
        log.append("c1", &ChatMessage::user("hi")).await.unwrap();
        log.append_all("c1", &[ChatMessage::assistant("hello"), ChatMessage::user("bye")])
            .await
            .unwrap();
        log.append("c2", &ChatMessage::user("other")).await.unwrap();

        let messages = log.messages("c1").await.unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].text(), "hello");
        assert!(log.messages("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_same_conversation_serializes() {
        let locks = ConversationLocks::new();
        let guard = locks.acquire("c1").await.unwrap();

        let waiting = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire("c1").await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_conversations_do_not_contend() {
        let locks = ConversationLocks::new();
        let _a = locks.acquire("a").await.unwrap();
        let b = tokio::time::timeout(Duration::from_millis(200), locks.acquire("b")).await;
        assert!(b.is_ok());
    }
}
