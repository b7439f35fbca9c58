//! In-Process Transport
//!
//! Channel-backed transport for embedding and tests. The [`InProcessPeer`]
//! plays the server: it sees every frame the core sends, can inject inbound
//! frames, and can simulate connection loss and recovery.
//!
//! # Usage
//!
//! ```ignore
//! let (transport, feeds, mut peer) = InProcessTransport::new_pair();
//! let manager = SubscriptionManager::new(Arc::new(transport), feeds, config);
//!
//! let sent = peer.recv_envelope().await?;
//! peer.send_envelope(&ack).await?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::protocol::{self, Envelope, FrameDecoder};

use super::traits::{ConnectionEvent, Transport, TransportError, TransportFeeds};

const DEFAULT_CAPACITY: usize = 100;

/// Core-side half of an in-process connection
pub struct InProcessTransport {
    outbound: mpsc::Sender<Vec<u8>>,
    connected: Arc<AtomicBool>,
}

/// Remote half of an in-process connection
pub struct InProcessPeer {
    outbound: mpsc::Receiver<Vec<u8>>,
    inbound: mpsc::Sender<Vec<u8>>,
    events: mpsc::Sender<ConnectionEvent>,
    connected: Arc<AtomicBool>,
    decoder: FrameDecoder,
}

impl InProcessTransport {
    /// Create a connected transport, its inbound feeds and the remote peer
    #[must_use]
    pub fn new_pair() -> (Self, TransportFeeds, InProcessPeer) {
        Self::new_pair_with_capacity(DEFAULT_CAPACITY)
    }

    /// Create with custom channel capacity
    #[must_use]
    pub fn new_pair_with_capacity(capacity: usize) -> (Self, TransportFeeds, InProcessPeer) {
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let (in_tx, in_rx) = mpsc::channel(capacity);
        let (ev_tx, ev_rx) = mpsc::channel(capacity);
        let connected = Arc::new(AtomicBool::new(true));

        let transport = Self {
            outbound: out_tx,
            connected: Arc::clone(&connected),
        };
        let feeds = TransportFeeds {
            inbound: in_rx,
            events: ev_rx,
        };
        let peer = InProcessPeer {
            outbound: out_rx,
            inbound: in_tx,
            events: ev_tx,
            connected,
            decoder: FrameDecoder::new(),
        };

        (transport, feeds, peer)
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        self.outbound
            .send(frame)
            .await
            .map_err(|_| TransportError::SendFailed("Channel closed".to_string()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl InProcessPeer {
    /// Next frame sent by the core, decoded
    ///
    /// Returns `Ok(None)` once the core side is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Protocol`] if the frame or envelope is corrupt.
    pub async fn recv_envelope(&mut self) -> Result<Option<Envelope>, TransportError> {
        loop {
            if let Some(payload) = self
                .decoder
                .next_frame()
                .map_err(|e| TransportError::Protocol(e.to_string()))?
            {
                let envelope = protocol::decode(&payload)
                    .map_err(|e| TransportError::Protocol(e.to_string()))?;
                return Ok(Some(envelope));
            }

            match self.outbound.recv().await {
                Some(bytes) => self.decoder.push(&bytes),
                None => return Ok(None),
            }
        }
    }

    /// Next already-sent envelope without waiting
    pub fn try_recv_envelope(&mut self) -> Option<Envelope> {
        loop {
            if let Ok(Some(payload)) = self.decoder.next_frame() {
                return protocol::decode(&payload).ok();
            }
            let bytes = self.outbound.try_recv().ok()?;
            self.decoder.push(&bytes);
        }
    }

    /// Deliver an envelope to the core
    ///
    /// # Errors
    ///
    /// Fails if encoding fails or the core side is gone.
    pub async fn send_envelope(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let frame = protocol::encode_frame(envelope)
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        self.send_raw(frame).await
    }

    /// Deliver raw bytes to the core
    ///
    /// # Errors
    ///
    /// Fails if the core side is gone.
    pub async fn send_raw(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.inbound
            .send(bytes)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Simulate losing the connection
    pub async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.events.send(ConnectionEvent::Disconnected).await;
    }

    /// Simulate the connection coming back
    pub async fn reconnect(&self) {
        self.connected.store(true, Ordering::SeqCst);
        let _ = self.events.send(ConnectionEvent::Reconnected).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Unsubscribe;

    fn unsubscribe(id: &str) -> Envelope {
        Envelope::new(
            id,
            Unsubscribe {
                conversation_id: id.to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_in_process_roundtrip() {
        let (transport, mut feeds, mut peer) = InProcessTransport::new_pair();

        let env = unsubscribe("c1");
        transport
            .send(protocol::encode_frame(&env).unwrap())
            .await
            .unwrap();
        assert_eq!(peer.recv_envelope().await.unwrap().unwrap(), env);

        peer.send_envelope(&env).await.unwrap();
        let bytes = feeds.inbound.recv().await.unwrap();
        assert!(bytes.len() > protocol::frame::HEADER_SIZE);
    }

    #[tokio::test]
    async fn test_in_process_disconnect() {
        let (transport, mut feeds, peer) = InProcessTransport::new_pair();
        assert!(transport.is_connected());

        peer.disconnect().await;
        assert!(!transport.is_connected());
        assert_eq!(
            feeds.events.recv().await,
            Some(ConnectionEvent::Disconnected)
        );

        let result = transport.send(vec![1, 2, 3]).await;
        assert!(matches!(result, Err(TransportError::NotConnected)));

        peer.reconnect().await;
        assert!(transport.is_connected());
        assert_eq!(
            feeds.events.recv().await,
            Some(ConnectionEvent::Reconnected)
        );
    }

    #[tokio::test]
    async fn test_in_process_channel_closed() {
        let (transport, _feeds, peer) = InProcessTransport::new_pair();
        drop(peer);

        let result = transport.send(vec![1]).await;
        assert!(matches!(result, Err(TransportError::SendFailed(_))));
    }

    #[tokio::test]
    async fn test_try_recv_envelope() {
        let (transport, _feeds, mut peer) = InProcessTransport::new_pair();
        assert!(peer.try_recv_envelope().is_none());

        let env = unsubscribe("c2");
        transport
            .send(protocol::encode_frame(&env).unwrap())
            .await
            .unwrap();
        assert_eq!(peer.try_recv_envelope(), Some(env));
    }
}
