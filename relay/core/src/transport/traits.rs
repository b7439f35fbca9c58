//! Transport Traits
//!
//! The real-time connection is an external collaborator. The core only needs
//! to push frames out, and to observe two independent inbound feeds: raw
//! bytes and connection-state changes.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Connection state change reported by a transport
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// First successful connection
    Connected,
    /// Connection lost
    Disconnected,
    /// Connection restored after a loss; server-side subscriptions are gone
    Reconnected,
}

/// Errors that can occur during transport operations
#[derive(Debug)]
pub enum TransportError {
    /// Transport is not connected
    NotConnected,
    /// Connection was closed
    ConnectionClosed,
    /// Failed to send a frame
    SendFailed(String),
    /// Peer sent bytes that could not be understood
    Protocol(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "Transport not connected"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::SendFailed(msg) => write!(f, "Send failed: {msg}"),
            Self::Protocol(msg) => write!(f, "Protocol error: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Outbound side of the real-time connection
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one framed envelope
    async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Check if currently connected
    fn is_connected(&self) -> bool;
}

/// Inbound feeds of a transport, drained by background listeners
#[derive(Debug)]
pub struct TransportFeeds {
    /// Raw inbound bytes; frame boundaries need not align with reads
    pub inbound: mpsc::Receiver<Vec<u8>>,
    /// Connection-state changes
    pub events: mpsc::Receiver<ConnectionEvent>,
}
