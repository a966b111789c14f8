//! Process-wide conversation store
//!
//! Keyed by user id, so a user keeps one conversation across sessions.
//! Conversations live for the process lifetime; `clear` is the only
//! deletion operation.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

/// Window size for history queries
pub const HISTORY_WINDOW: usize = 20;

/// Window size for prompt assembly
pub const PROMPT_WINDOW: usize = 10;

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One utterance or reply in a conversation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Epoch milliseconds
    pub timestamp: i64,
}

#[derive(Debug)]
struct Conversation {
    turns: Vec<Turn>,
    created_at: i64,
    updated_at: i64,
}

/// Aggregate store statistics
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub conversation_count: usize,
    pub total_turns: usize,
}

/// Process-wide mapping from user id to conversation
#[derive(Clone, Default)]
pub struct ConversationStore {
    inner: Arc<RwLock<HashMap<String, Conversation>>>,
}

impl ConversationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn, creating the conversation lazily.
    pub async fn append(&self, user_id: &str, role: Role, content: &str) {
        let now = chrono::Utc::now().timestamp_millis();
        let mut conversations = self.inner.write().await;
        let conversation = conversations
            .entry(user_id.to_string())
            .or_insert_with(|| Conversation {
                turns: Vec::new(),
                created_at: now,
                updated_at: now,
            });
        conversation.turns.push(Turn {
            role,
            content: content.to_string(),
            timestamp: now,
        });
        conversation.updated_at = now;
        tracing::debug!(
            user_id = %user_id,
            ?role,
            turns = conversation.turns.len(),
            "turn appended"
        );
    }

    /// Last `n` turns for a user, in arrival order.
    pub async fn window(&self, user_id: &str, n: usize) -> Vec<Turn> {
        let conversations = self.inner.read().await;
        conversations.get(user_id).map_or_else(Vec::new, |c| {
            let start = c.turns.len().saturating_sub(n);
            c.turns[start..].to_vec()
        })
    }

    /// Remove a user's conversation entirely. Returns whether one existed.
    pub async fn clear(&self, user_id: &str) -> bool {
        let removed = self.inner.write().await.remove(user_id).is_some();
        if removed {
            tracing::info!(user_id = %user_id, "conversation cleared");
        }
        removed
    }

    /// Aggregate statistics across all conversations.
    pub async fn stats(&self) -> StoreStats {
        let conversations = self.inner.read().await;
        StoreStats {
            conversation_count: conversations.len(),
            total_turns: conversations.values().map(|c| c.turns.len()).sum(),
        }
    }
}
