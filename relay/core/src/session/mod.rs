//! Conversation sessions
//!
//! A [`ConversationSession`] binds to one conversation and records messages in
//! a linked, strictly sequenced chain. Storage sits behind the ports in
//! [`ports`]; [`memory`] provides in-process implementations.

mod conversation;
mod error;
pub mod memory;
mod model;
pub mod ports;

pub use conversation::{ConversationSession, SessionState, DEFAULT_HISTORY_LIMIT};
pub use error::SessionError;
pub use memory::{InMemoryConversations, InMemoryMessages, SequentialIds, UuidIds};
pub use model::{Conversation, ConversationStatus, Message, MessageRole};
pub use ports::{ConversationRepository, IdGenerator, MessageRepository, RepositoryError};
