//! Conversation Subscriptions
//!
//! Subscribe/unsubscribe with acknowledgement waits, resubscription after
//! reconnects, and per-conversation message dispatch.

pub mod error;
pub mod manager;

pub use error::SubscriptionError;
pub use manager::{
    HandlerId, MessageHandler, SubscriptionConfig, SubscriptionManager, SyncHandler,
};
