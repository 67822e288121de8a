//! In-memory conversation store
//!
//! Process-wide mapping from conversation id to its ordered message history.
//! Conversations are created implicitly on first reference and live for the
//! process lifetime; there is deliberately no eviction.
//!
//! Each conversation carries its own async mutex. Holding it for a whole
//! orchestration turn serializes same-id requests so commit order matches
//! arrival order, while different ids proceed concurrently.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::llm::Message;

/// Handle to one conversation's history.
pub type ConversationHandle = Arc<Mutex<Vec<Message>>>;

/// Process-wide conversation storage.
#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: DashMap<String, ConversationHandle>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a conversation, creating an empty one on first reference.
    pub fn get_or_create(&self, id: &str) -> ConversationHandle {
        self.conversations
            .entry(id.to_string())
            .or_default()
            .clone()
    }

    /// Append a message to a conversation, creating it if needed.
    pub async fn append(&self, id: &str, message: Message) {
        let handle = self.get_or_create(id);
        handle.lock().await.push(message);
    }

    /// Snapshot of a conversation's history, if it exists.
    pub async fn history(&self, id: &str) -> Option<Vec<Message>> {
        let handle = self.conversations.get(id).map(|entry| entry.clone())?;
        let guard = handle.lock().await;
        Some(guard.clone())
    }

    /// Number of tracked conversations.
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}
