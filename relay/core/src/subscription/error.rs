//! Subscription errors

use std::time::Duration;

use thiserror::Error;

/// Failure of a subscribe request
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SubscriptionError {
    /// Conversation id was empty
    #[error("conversation id is empty")]
    InvalidConversationId,

    /// No acknowledgement arrived in time
    #[error("no acknowledgement for {conversation_id} within {timeout:?}")]
    Timeout {
        /// Conversation that was being subscribed
        conversation_id: String,
        /// Wait that elapsed
        timeout: Duration,
    },

    /// Server refused the subscription
    #[error("subscription to {conversation_id} rejected: {reason}")]
    Rejected {
        /// Conversation that was refused
        conversation_id: String,
        /// Server-supplied reason
        reason: String,
    },

    /// The request could not be sent
    #[error("transport error: {0}")]
    Transport(String),

    /// The request could not be encoded
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Manager was cleaned up or shut down while waiting
    #[error("subscription cancelled")]
    Cancelled,
}

impl SubscriptionError {
    /// Whether a later retry could succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport(_))
    }
}
