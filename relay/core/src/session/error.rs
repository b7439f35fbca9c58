//! Session errors

use thiserror::Error;

use super::ports::RepositoryError;

/// Failure of a session operation
#[derive(Debug, Error)]
pub enum SessionError {
    /// Caller supplied unusable input
    #[error("validation failed: {0}")]
    Validation(String),

    /// Operation needs an active conversation
    #[error("invalid session state: {0}")]
    InvalidState(String),

    /// Conversation does not exist
    #[error("conversation not found: {0}")]
    NotFound(String),

    /// Conversation was deleted
    #[error("conversation {0} is deleted")]
    Deleted(String),

    /// Conversation is archived or otherwise inactive
    #[error("conversation {0} is not active")]
    Inactive(String),

    /// Persistence port failed
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl SessionError {
    /// Caller mistakes that retrying cannot fix
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::InvalidState(_))
    }

    /// Conversation state makes this operation impossible
    #[must_use]
    pub fn is_state_conflict(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Deleted(_) | Self::Inactive(_))
    }
}
