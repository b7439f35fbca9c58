//! In-memory port implementations

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

use super::model::{Conversation, Message};
use super::ports::{ConversationRepository, IdGenerator, MessageRepository, RepositoryError};

/// Conversations held in a map
#[derive(Debug, Default)]
pub struct InMemoryConversations {
    conversations: RwLock<HashMap<String, Conversation>>,
}

impl InMemoryConversations {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationRepository for InMemoryConversations {
    async fn create(&self, conversation: &Conversation) -> Result<(), RepositoryError> {
        let mut conversations = self.conversations.write();
        if conversations.contains_key(&conversation.id) {
            return Err(RepositoryError::Conflict(format!(
                "conversation {} exists",
                conversation.id
            )));
        }
        conversations.insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Conversation>, RepositoryError> {
        Ok(self.conversations.read().get(id).cloned())
    }

    async fn update(&self, conversation: &Conversation) -> Result<(), RepositoryError> {
        match self.conversations.write().get_mut(&conversation.id) {
            Some(stored) => {
                *stored = conversation.clone();
                Ok(())
            }
            None => Err(RepositoryError::Missing(conversation.id.clone())),
        }
    }

    async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        match self.conversations.write().get_mut(id) {
            Some(stored) => {
                stored.mark_deleted();
                Ok(())
            }
            None => Err(RepositoryError::Missing(id.to_string())),
        }
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Conversation>, RepositoryError> {
        let mut all: Vec<Conversation> = self.conversations.read().values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all.into_iter().skip(offset).take(limit).collect())
    }
}

/// Messages grouped by conversation, with per-conversation sequence counters
#[derive(Debug, Default)]
pub struct InMemoryMessages {
    messages: RwLock<HashMap<String, Vec<Message>>>,
    sequences: DashMap<String, u64>,
}

impl InMemoryMessages {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessages {
    async fn create(&self, message: &Message) -> Result<(), RepositoryError> {
        let mut messages = self.messages.write();
        let thread = messages.entry(message.conversation_id.clone()).or_default();
        if thread.iter().any(|m| m.id == message.id) {
            return Err(RepositoryError::Conflict(format!("message {} exists", message.id)));
        }
        thread.push(message.clone());
        thread.sort_by_key(|m| m.sequence);
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Message>, RepositoryError> {
        Ok(self
            .messages
            .read()
            .values()
            .flatten()
            .find(|m| m.id == id)
            .cloned())
    }

    async fn latest_by_conversation(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError> {
        let messages = self.messages.read();
        let thread = messages.get(conversation_id).map_or(&[][..], Vec::as_slice);
        let start = thread.len().saturating_sub(limit);
        Ok(thread[start..].to_vec())
    }

    async fn next_sequence(&self, conversation_id: &str) -> Result<u64, RepositoryError> {
        let mut counter = self.sequences.entry(conversation_id.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}

/// Prefixed random ids (`ac_…` for conversations, `am_…` for messages)
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidIds;

impl IdGenerator for UuidIds {
    fn conversation_id(&self) -> String {
        format!("ac_{}", uuid::Uuid::new_v4().simple())
    }

    fn message_id(&self) -> String {
        format!("am_{}", uuid::Uuid::new_v4().simple())
    }
}

/// Predictable ids (`c1`, `c2`, … and `m1`, `m2`, …)
#[derive(Debug, Default)]
pub struct SequentialIds {
    conversations: AtomicU64,
    messages: AtomicU64,
}

impl SequentialIds {
    /// Counters starting at 1
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialIds {
    fn conversation_id(&self) -> String {
        format!("c{}", self.conversations.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn message_id(&self) -> String {
        format!("m{}", self.messages.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::model::MessageRole;

    fn message(id: &str, sequence: u64) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: "c1".to_string(),
            sequence,
            previous_id: None,
            role: MessageRole::User,
            content: id.to_string(),
            reasoning: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_latest_returns_tail_in_order() {
        let repo = InMemoryMessages::new();
        for seq in 1..=5 {
            repo.create(&message(&format!("m{seq}"), seq)).await.unwrap();
        }

        let latest = repo.latest_by_conversation("c1", 3).await.unwrap();
        let ids: Vec<&str> = latest.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m3", "m4", "m5"]);

        assert!(repo.latest_by_conversation("other", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sequences_are_per_conversation() {
        let repo = InMemoryMessages::new();
        assert_eq!(repo.next_sequence("a").await.unwrap(), 1);
        assert_eq!(repo.next_sequence("a").await.unwrap(), 2);
        assert_eq!(repo.next_sequence("b").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_is_soft() {
        let repo = InMemoryConversations::new();
        repo.create(&Conversation::new("c1", "u", "t")).await.unwrap();
        repo.delete("c1").await.unwrap();

        let stored = repo.get_by_id("c1").await.unwrap().unwrap();
        assert!(stored.is_deleted());
        assert!(!stored.is_active());
        assert!(matches!(
            repo.delete("nope").await,
            Err(RepositoryError::Missing(_))
        ));
    }

    #[test]
    fn test_id_generators() {
        let ids = SequentialIds::new();
        assert_eq!(ids.message_id(), "m1");
        assert_eq!(ids.message_id(), "m2");
        assert_eq!(ids.conversation_id(), "c1");

        let uuid = UuidIds;
        assert!(uuid.conversation_id().starts_with("ac_"));
        assert_ne!(uuid.message_id(), uuid.message_id());
    }
}
