//! Persistence and id-generation ports
//!
//! Implemented outside the core; [`super::memory`] has in-memory versions.

use async_trait::async_trait;
use thiserror::Error;

use super::model::{Conversation, Message};

/// Storage failure reported by a repository
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Write conflicts with existing data
    #[error("conflict: {0}")]
    Conflict(String),

    /// Record to update does not exist
    #[error("not found: {0}")]
    Missing(String),

    /// Backend failure
    #[error("storage error: {0}")]
    Storage(String),
}

/// Conversation persistence
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Insert a new conversation
    async fn create(&self, conversation: &Conversation) -> Result<(), RepositoryError>;

    /// Fetch by id; `None` if unknown
    async fn get_by_id(&self, id: &str) -> Result<Option<Conversation>, RepositoryError>;

    /// Replace an existing conversation
    async fn update(&self, conversation: &Conversation) -> Result<(), RepositoryError>;

    /// Soft-delete
    async fn delete(&self, id: &str) -> Result<(), RepositoryError>;

    /// Newest first
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Conversation>, RepositoryError>;
}

/// Message persistence
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Insert a new message
    async fn create(&self, message: &Message) -> Result<(), RepositoryError>;

    /// Fetch by id; `None` if unknown
    async fn get_by_id(&self, id: &str) -> Result<Option<Message>, RepositoryError>;

    /// Up to `limit` most recent messages, oldest first
    async fn latest_by_conversation(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError>;

    /// Allocate the next sequence number within a conversation
    async fn next_sequence(&self, conversation_id: &str) -> Result<u64, RepositoryError>;
}

/// Source of fresh ids
pub trait IdGenerator: Send + Sync {
    /// New conversation id
    fn conversation_id(&self) -> String;

    /// New message id
    fn message_id(&self) -> String;
}
