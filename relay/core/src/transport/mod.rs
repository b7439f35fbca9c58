//! Transport Layer
//!
//! Abstraction over the real-time connection that carries envelopes:
//! - [`Transport`]: outbound frame sink
//! - [`TransportFeeds`]: inbound bytes and connection-state changes
//! - [`InProcessTransport`]: channel-backed implementation for embedding and tests

pub mod in_process;
pub mod traits;

pub use in_process::{InProcessPeer, InProcessTransport};
pub use traits::{ConnectionEvent, Transport, TransportError, TransportFeeds};
