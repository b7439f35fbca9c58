//! Conversation Session
//!
//! Stateful handle on one conversation: `Uninitialized → Active → Closed`.
//! Holds a cache of the most recent messages so each new message can link to
//! its predecessor without a repository round-trip.

use std::sync::Arc;

use chrono::Utc;

use super::error::SessionError;
use super::model::{Conversation, Message, MessageRole};
use super::ports::{ConversationRepository, IdGenerator, MessageRepository};

/// Messages loaded when a conversation is resumed or refreshed
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

const DEFAULT_USER: &str = "default-user";

/// Where the session is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No conversation yet
    Uninitialized,
    /// Bound to a conversation
    Active,
    /// Explicitly closed
    Closed,
}

/// Session bound to at most one conversation at a time
pub struct ConversationSession {
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    ids: Arc<dyn IdGenerator>,
    user_id: String,
    history_limit: usize,
    state: SessionState,
    conversation: Option<Conversation>,
    history: Vec<Message>,
}

impl ConversationSession {
    /// Create an uninitialized session
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            conversations,
            messages,
            ids,
            user_id: DEFAULT_USER.to_string(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            state: SessionState::Uninitialized,
            conversation: None,
            history: Vec::new(),
        }
    }

    /// Owner recorded on new conversations
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    /// Number of messages kept in the cache
    #[must_use]
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    /// Lifecycle state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Create and bind a new conversation
    ///
    /// # Errors
    ///
    /// [`SessionError::Validation`] for an empty title, or a repository error.
    pub async fn start_new(&mut self, title: &str) -> Result<&Conversation, SessionError> {
        if title.trim().is_empty() {
            return Err(SessionError::Validation(
                "conversation title is required".to_string(),
            ));
        }

        let conversation = Conversation::new(self.ids.conversation_id(), &self.user_id, title);
        self.conversations.create(&conversation).await?;
        tracing::info!(conversation_id = %conversation.id, "Started conversation");

        self.history.clear();
        self.state = SessionState::Active;
        Ok(self.conversation.insert(conversation))
    }

    /// Bind an existing conversation and load its recent history
    ///
    /// On failure the session is left exactly as it was.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Validation`] for an empty id
    /// - [`SessionError::NotFound`], [`SessionError::Deleted`] or
    ///   [`SessionError::Inactive`] if the conversation cannot be resumed
    pub async fn resume(&mut self, conversation_id: &str) -> Result<&Conversation, SessionError> {
        if conversation_id.is_empty() {
            return Err(SessionError::Validation(
                "conversation id cannot be empty".to_string(),
            ));
        }

        let conversation = self.load_resumable(conversation_id).await?;
        let history = self
            .messages
            .latest_by_conversation(conversation_id, self.history_limit)
            .await?;
        tracing::info!(
            conversation_id,
            messages = history.len(),
            "Resumed conversation"
        );

        self.history = history;
        self.state = SessionState::Active;
        Ok(self.conversation.insert(conversation))
    }

    async fn load_resumable(&self, conversation_id: &str) -> Result<Conversation, SessionError> {
        let conversation = self
            .conversations
            .get_by_id(conversation_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(conversation_id.to_string()))?;

        if conversation.is_deleted() {
            return Err(SessionError::Deleted(conversation_id.to_string()));
        }
        if !conversation.is_active() {
            return Err(SessionError::Inactive(conversation_id.to_string()));
        }
        Ok(conversation)
    }

    /// Record a user message
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidState`] without an active conversation
    /// - [`SessionError::Validation`] for empty content
    /// - a state conflict if the conversation was archived or deleted meanwhile
    pub async fn send(&mut self, content: &str) -> Result<Message, SessionError> {
        self.append(MessageRole::User, content, None).await
    }

    /// Record the assistant's reply in the same chain
    ///
    /// # Errors
    ///
    /// See [`ConversationSession::send`].
    pub async fn add_assistant_message(
        &mut self,
        content: &str,
        reasoning: Option<String>,
    ) -> Result<Message, SessionError> {
        self.append(MessageRole::Assistant, content, reasoning).await
    }

    async fn append(
        &mut self,
        role: MessageRole,
        content: &str,
        reasoning: Option<String>,
    ) -> Result<Message, SessionError> {
        let conversation_id = self.active_id()?.to_string();
        if content.is_empty() {
            return Err(SessionError::Validation(
                "message content cannot be empty".to_string(),
            ));
        }

        // may have been archived or deleted since we bound it
        let latest = self.load_resumable(&conversation_id).await?;

        let sequence = self.messages.next_sequence(&conversation_id).await?;
        let message = Message {
            id: self.ids.message_id(),
            conversation_id,
            sequence,
            previous_id: self.history.last().map(|m| m.id.clone()),
            role,
            content: content.to_string(),
            reasoning: reasoning.filter(|r| !r.is_empty()),
            created_at: Utc::now(),
        };
        self.messages.create(&message).await?;
        tracing::debug!(
            message_id = %message.id,
            sequence,
            role = message.role.as_str(),
            "Message recorded"
        );

        self.history.push(message.clone());
        if self.history.len() > self.history_limit {
            let excess = self.history.len() - self.history_limit;
            self.history.drain(..excess);
        }
        self.conversation = Some(latest);
        Ok(message)
    }

    /// Reload the message cache from the repository
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidState`] without an active conversation, or a
    /// repository error.
    pub async fn refresh_history(&mut self) -> Result<(), SessionError> {
        let conversation_id = self.active_id()?.to_string();
        self.history = self
            .messages
            .latest_by_conversation(&conversation_id, self.history_limit)
            .await?;
        Ok(())
    }

    /// Drop in-memory state; nothing is persisted
    pub fn close(&mut self) {
        if let Some(conversation) = self.conversation.take() {
            tracing::debug!(conversation_id = %conversation.id, "Session closed");
        }
        self.history = Vec::new();
        self.state = SessionState::Closed;
    }

    /// Bound conversation, if any
    #[must_use]
    pub fn conversation(&self) -> Option<&Conversation> {
        self.conversation.as_ref()
    }

    /// Cached recent messages, oldest first
    #[must_use]
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Id of the bound conversation
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidState`] without an active conversation.
    pub fn conversation_id(&self) -> Result<&str, SessionError> {
        self.active_id()
    }

    /// Whether the session is bound to a conversation that accepts messages
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
            && self.conversation.as_ref().is_some_and(Conversation::is_active)
    }

    fn active_id(&self) -> Result<&str, SessionError> {
        match (&self.state, &self.conversation) {
            (SessionState::Active, Some(conversation)) => Ok(&conversation.id),
            _ => Err(SessionError::InvalidState(
                "no active conversation, call start_new or resume first".to_string(),
            )),
        }
    }
}

impl std::fmt::Debug for ConversationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationSession")
            .field("state", &self.state)
            .field("conversation", &self.conversation.as_ref().map(|c| &c.id))
            .field("history", &self.history.len())
            .finish_non_exhaustive()
    }
}
