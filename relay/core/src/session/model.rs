//! Conversation and message records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a conversation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    /// Accepting messages
    #[default]
    Active,
    /// Read-only
    Archived,
    /// Soft-deleted
    Deleted,
}

/// A persisted message thread
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation id
    pub id: String,
    /// Owner
    pub user_id: String,
    /// Display title
    pub title: String,
    /// Lifecycle state
    pub status: ConversationStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
    /// Set when soft-deleted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Conversation {
    /// New active conversation
    pub fn new(id: impl Into<String>, user_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id: user_id.into(),
            title: title.into(),
            status: ConversationStatus::Active,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Whether new messages may be added
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == ConversationStatus::Active && self.deleted_at.is_none()
    }

    /// Whether the conversation has been soft-deleted
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some() || self.status == ConversationStatus::Deleted
    }

    /// Make read-only
    pub fn archive(&mut self) {
        self.status = ConversationStatus::Archived;
        self.updated_at = Utc::now();
    }

    /// Soft-delete
    pub fn mark_deleted(&mut self) {
        let now = Utc::now();
        self.status = ConversationStatus::Deleted;
        self.updated_at = now;
        self.deleted_at.get_or_insert(now);
    }
}

/// Author of a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// End user
    User,
    /// The assistant
    Assistant,
    /// System notice
    System,
}

impl MessageRole {
    /// Lowercase wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// One message in a conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message id
    pub id: String,
    /// Owning conversation
    pub conversation_id: String,
    /// Position within the conversation, strictly increasing
    pub sequence: u64,
    /// Message this one follows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<String>,
    /// Author
    pub role: MessageRole,
    /// Text
    pub content: String,
    /// Model reasoning behind an assistant message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}
