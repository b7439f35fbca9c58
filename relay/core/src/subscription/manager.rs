//! Subscription Manager
//!
//! Tracks which conversations this client follows and routes inbound
//! envelopes to per-conversation handlers.
//!
//! # Per-conversation state
//!
//! ```text
//! Unsubscribed ──subscribe──► Subscribing ──ack──► Subscribed
//!       ▲                          │                   │
//!       │                   timeout/reject         unsubscribe
//!       │                          ▼                   ▼
//!       └──────────────────── Unsubscribed ◄──── Unsubscribing
//! ```
//!
//! # Tasks
//!
//! Two background tasks start with the manager and stop when it is shut
//! down or dropped:
//!
//! - the listener drains inbound bytes, resolves pending acks and
//!   dispatches everything else to handlers
//! - the connection watcher resubscribes every active conversation, one at
//!   a time, after a reconnect

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::error::SubscriptionError;
use crate::protocol::{
    self, ConversationSync, Envelope, FrameDecoder, MessageBody, Subscribe, SubscribeAck,
    Unsubscribe, UnsubscribeAck,
};
use crate::transport::{ConnectionEvent, Transport, TransportFeeds};

/// Handler for envelopes addressed to one conversation
pub type MessageHandler = Arc<dyn Fn(&Envelope) -> anyhow::Result<()> + Send + Sync>;

/// Handler for conversation catch-up batches
pub type SyncHandler = Arc<dyn Fn(&ConversationSync) -> anyhow::Result<()> + Send + Sync>;

/// Registration handle, used to remove a handler
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Subscription settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionConfig {
    /// How long to wait for a subscribe/unsubscribe acknowledgement
    pub ack_timeout: Duration,
    /// Subscribe as an agent
    pub agent_mode: bool,
    /// Subscribe as a voice session
    pub voice_mode: bool,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(10),
            agent_mode: false,
            voice_mode: false,
        }
    }
}

type AckSender = oneshot::Sender<Result<SubscribeAck, SubscriptionError>>;

/// One caller waiting on a subscribe ack, keyed so it can withdraw itself
type Waiter = (u64, AckSender);

#[derive(Default)]
struct Registry {
    active: HashSet<String>,
    pending_subscribe: HashMap<String, Vec<Waiter>>,
    pending_unsubscribe: HashMap<String, Vec<oneshot::Sender<UnsubscribeAck>>>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    config: SubscriptionConfig,
    registry: Mutex<Registry>,
    handlers: DashMap<String, Vec<(HandlerId, MessageHandler)>>,
    sync_handlers: DashMap<String, Vec<(HandlerId, SyncHandler)>>,
    next_handler: AtomicU64,
    next_waiter: AtomicU64,
}

/// Conversation subscriptions over one transport
pub struct SubscriptionManager {
    inner: Arc<Inner>,
    shutdown: CancellationToken,
}

impl SubscriptionManager {
    /// Create a manager and start its background tasks
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        transport: Arc<dyn Transport>,
        feeds: TransportFeeds,
        config: SubscriptionConfig,
    ) -> Self {
        let inner = Arc::new(Inner {
            transport,
            config,
            registry: Mutex::new(Registry::default()),
            handlers: DashMap::new(),
            sync_handlers: DashMap::new(),
            next_handler: AtomicU64::new(1),
            next_waiter: AtomicU64::new(1),
        });
        let shutdown = CancellationToken::new();

        tokio::spawn(listen(
            Arc::clone(&inner),
            feeds.inbound,
            shutdown.clone(),
        ));
        tokio::spawn(watch_connection(
            Arc::clone(&inner),
            feeds.events,
            shutdown.clone(),
        ));

        Self { inner, shutdown }
    }

    /// Subscribe to a conversation and wait for the acknowledgement
    ///
    /// Returns immediately without touching the transport if already
    /// subscribed. Concurrent calls for the same id share one request.
    ///
    /// # Errors
    ///
    /// - [`SubscriptionError::Timeout`] if no ack arrives within the configured wait
    /// - [`SubscriptionError::Rejected`] if the server refuses
    /// - [`SubscriptionError::Transport`] if the request could not be sent
    pub async fn subscribe(
        &self,
        conversation_id: &str,
        from_sequence: Option<u64>,
    ) -> Result<SubscribeAck, SubscriptionError> {
        self.inner.subscribe(conversation_id, from_sequence).await
    }

    /// Leave a conversation
    ///
    /// The id leaves the active set immediately. Failing to send the request
    /// or to receive an ack is logged and otherwise ignored.
    pub async fn unsubscribe(&self, conversation_id: &str) {
        self.inner.unsubscribe(conversation_id).await;
    }

    /// Whether the conversation is currently subscribed
    #[must_use]
    pub fn is_subscribed(&self, conversation_id: &str) -> bool {
        self.inner.registry.lock().active.contains(conversation_id)
    }

    /// Subscribed conversation ids, sorted
    #[must_use]
    pub fn active_conversations(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.registry.lock().active.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether a subscribe for this id is waiting on its ack
    #[must_use]
    pub fn is_pending(&self, conversation_id: &str) -> bool {
        self.inner
            .registry
            .lock()
            .pending_subscribe
            .contains_key(conversation_id)
    }

    /// Number of acknowledgement waits outstanding
    #[must_use]
    pub fn pending_count(&self) -> usize {
        let registry = self.inner.registry.lock();
        registry.pending_subscribe.len() + registry.pending_unsubscribe.len()
    }

    /// Register a handler for non-ack envelopes of one conversation
    pub fn add_handler<F>(&self, conversation_id: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(&Envelope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id();
        let handler: MessageHandler = Arc::new(handler);
        self.inner
            .handlers
            .entry(conversation_id.into())
            .or_default()
            .push((id, handler));
        id
    }

    /// Register a handler for catch-up batches of one conversation
    pub fn add_sync_handler<F>(&self, conversation_id: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(&ConversationSync) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id();
        let handler: SyncHandler = Arc::new(handler);
        self.inner
            .sync_handlers
            .entry(conversation_id.into())
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove a handler; returns whether it was registered
    pub fn remove_handler(&self, conversation_id: &str, id: HandlerId) -> bool {
        remove_from(&self.inner.handlers, conversation_id, id)
            || remove_from(&self.inner.sync_handlers, conversation_id, id)
    }

    /// Forget every subscription, handler and pending wait
    ///
    /// Pending subscribe calls fail with [`SubscriptionError::Cancelled`].
    pub fn cleanup(&self) {
        let (subscribers, unsubscribers) = {
            let mut registry = self.inner.registry.lock();
            registry.active.clear();
            (
                std::mem::take(&mut registry.pending_subscribe),
                std::mem::take(&mut registry.pending_unsubscribe),
            )
        };

        for (_, waiter) in subscribers.into_values().flatten() {
            let _ = waiter.send(Err(SubscriptionError::Cancelled));
        }
        drop(unsubscribers);

        self.inner.handlers.clear();
        self.inner.sync_handlers.clear();
        tracing::debug!("Subscription registry cleared");
    }

    /// Clean up and stop the background tasks
    pub fn shutdown(&self) {
        self.cleanup();
        self.shutdown.cancel();
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("active", &self.active_conversations())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

fn remove_from<H>(
    table: &DashMap<String, Vec<(HandlerId, H)>>,
    conversation_id: &str,
    id: HandlerId,
) -> bool {
    let Some(mut handlers) = table.get_mut(conversation_id) else {
        return false;
    };
    let before = handlers.len();
    handlers.retain(|(handler_id, _)| *handler_id != id);
    let removed = handlers.len() != before;
    let now_empty = handlers.is_empty();
    drop(handlers);

    if now_empty {
        table.remove_if(conversation_id, |_, h| h.is_empty());
    }
    removed
}

impl Inner {
    fn next_id(&self) -> HandlerId {
        HandlerId(self.next_handler.fetch_add(1, Ordering::Relaxed))
    }

    async fn subscribe(
        &self,
        conversation_id: &str,
        from_sequence: Option<u64>,
    ) -> Result<SubscribeAck, SubscriptionError> {
        if conversation_id.is_empty() {
            return Err(SubscriptionError::InvalidConversationId);
        }

        let (tx, rx) = oneshot::channel();
        let waiter = self.next_waiter.fetch_add(1, Ordering::Relaxed);
        let initiator = {
            let mut registry = self.registry.lock();
            if registry.active.contains(conversation_id) {
                tracing::debug!(conversation_id, "Already subscribed");
                return Ok(SubscribeAck {
                    conversation_id: conversation_id.to_string(),
                    success: true,
                    error: None,
                    missed_messages: 0,
                });
            }
            // a later subscribe supersedes an unsubscribe still waiting on its ack
            if registry.pending_unsubscribe.remove(conversation_id).is_some() {
                tracing::debug!(conversation_id, "Subscribe supersedes pending unsubscribe");
            }
            match registry.pending_subscribe.entry(conversation_id.to_string()) {
                Entry::Occupied(mut waiters) => {
                    let waiters = waiters.get_mut();
                    waiters.retain(|(_, w)| !w.is_closed());
                    // nobody left listening for the earlier request, so send a fresh one
                    let initiator = waiters.is_empty();
                    waiters.push((waiter, tx));
                    initiator
                }
                Entry::Vacant(slot) => {
                    slot.insert(vec![(waiter, tx)]);
                    true
                }
            }
        };
        let _withdraw = PendingWait {
            inner: self,
            conversation_id,
            waiter,
        };

        if initiator {
            let request = Envelope::new(
                conversation_id,
                Subscribe {
                    conversation_id: conversation_id.to_string(),
                    from_sequence,
                    agent_mode: self.config.agent_mode,
                    voice_mode: self.config.voice_mode,
                },
            );
            if let Err(err) = self.send(&request).await {
                tracing::warn!(conversation_id, error = %err, "Subscribe request not sent");
                self.fail_pending(conversation_id, &err);
                return Err(err);
            }
            tracing::debug!(conversation_id, ?from_sequence, "Subscribe sent");
        }

        let timeout = self.config.ack_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SubscriptionError::Cancelled),
            Err(_) => {
                let err = SubscriptionError::Timeout {
                    conversation_id: conversation_id.to_string(),
                    timeout,
                };
                if initiator {
                    tracing::warn!(conversation_id, ?timeout, "Subscribe ack timed out");
                    self.fail_pending(conversation_id, &err);
                }
                Err(err)
            }
        }
    }

    /// Remove the pending entry and hand `err` to anyone still waiting on it
    fn fail_pending(&self, conversation_id: &str, err: &SubscriptionError) {
        let waiters = self.registry.lock().pending_subscribe.remove(conversation_id);
        for (_, waiter) in waiters.into_iter().flatten() {
            let _ = waiter.send(Err(err.clone()));
        }
    }

    /// Take one waiter out of the pending table, dropping the entry once empty
    fn withdraw(&self, conversation_id: &str, waiter: u64) {
        let mut registry = self.registry.lock();
        let now_empty = match registry.pending_subscribe.get_mut(conversation_id) {
            Some(waiters) => {
                waiters.retain(|(id, _)| *id != waiter);
                waiters.is_empty()
            }
            None => false,
        };
        if now_empty {
            registry.pending_subscribe.remove(conversation_id);
        }
    }

    async fn unsubscribe(&self, conversation_id: &str) {
        let (tx, rx) = oneshot::channel();
        let interrupted = {
            let mut registry = self.registry.lock();
            registry.active.remove(conversation_id);
            registry
                .pending_unsubscribe
                .entry(conversation_id.to_string())
                .or_default()
                .push(tx);
            registry.pending_subscribe.remove(conversation_id)
        };

        // an in-flight subscribe must not land in the active set once its ack arrives
        if let Some(waiters) = interrupted {
            tracing::debug!(conversation_id, "Unsubscribe cancels pending subscribe");
            for (_, waiter) in waiters {
                let _ = waiter.send(Err(SubscriptionError::Cancelled));
            }
        }

        let request = Envelope::new(
            conversation_id,
            Unsubscribe {
                conversation_id: conversation_id.to_string(),
            },
        );
        if let Err(err) = self.send(&request).await {
            tracing::warn!(conversation_id, error = %err, "Unsubscribe not sent, treating as done");
            self.registry.lock().pending_unsubscribe.remove(conversation_id);
            return;
        }

        match tokio::time::timeout(self.config.ack_timeout, rx).await {
            Ok(Ok(ack)) if !ack.success => {
                tracing::warn!(conversation_id, "Unsubscribe refused by server, ignoring");
            }
            Ok(_) => tracing::debug!(conversation_id, "Unsubscribed"),
            Err(_) => {
                tracing::warn!(conversation_id, "Unsubscribe ack timed out, treating as done");
                self.registry.lock().pending_unsubscribe.remove(conversation_id);
            }
        }
    }

    async fn send(&self, envelope: &Envelope) -> Result<(), SubscriptionError> {
        let frame = protocol::encode_frame(envelope)
            .map_err(|e| SubscriptionError::Encoding(e.to_string()))?;
        self.transport
            .send(frame)
            .await
            .map_err(|e| SubscriptionError::Transport(e.to_string()))
    }

    fn route(&self, envelope: Envelope) {
        match &envelope.body {
            Some(MessageBody::SubscribeAck(ack)) => self.resolve_subscribe(ack),
            Some(MessageBody::UnsubscribeAck(ack)) => self.resolve_unsubscribe(ack),
            _ => self.dispatch(&envelope),
        }
    }

    fn resolve_subscribe(&self, ack: &SubscribeAck) {
        let waiters = {
            let mut registry = self.registry.lock();
            let waiters = registry.pending_subscribe.remove(&ack.conversation_id);
            if waiters.is_some() && ack.success {
                registry.active.insert(ack.conversation_id.clone());
            }
            waiters
        };

        let Some(waiters) = waiters else {
            tracing::debug!(conversation_id = %ack.conversation_id, "Unsolicited subscribe ack");
            return;
        };

        if ack.success {
            tracing::info!(
                conversation_id = %ack.conversation_id,
                missed_messages = ack.missed_messages,
                "Subscribed"
            );
        } else {
            tracing::warn!(
                conversation_id = %ack.conversation_id,
                error = ?ack.error,
                "Subscription rejected"
            );
        }

        for (_, waiter) in waiters {
            let result = if ack.success {
                Ok(ack.clone())
            } else {
                Err(SubscriptionError::Rejected {
                    conversation_id: ack.conversation_id.clone(),
                    reason: ack.error.clone().unwrap_or_else(|| "unspecified".to_string()),
                })
            };
            let _ = waiter.send(result);
        }
    }

    fn resolve_unsubscribe(&self, ack: &UnsubscribeAck) {
        let waiters = self
            .registry
            .lock()
            .pending_unsubscribe
            .remove(&ack.conversation_id);
        for waiter in waiters.into_iter().flatten() {
            let _ = waiter.send(ack.clone());
        }
    }

    fn dispatch(&self, envelope: &Envelope) {
        let Some(conversation_id) = envelope.conversation_id.as_deref() else {
            tracing::debug!(message_type = %envelope.message_type, "Envelope without conversation, dropping");
            return;
        };

        // snapshot so handlers may (de)register without deadlocking the table
        let handlers = self
            .handlers
            .get(conversation_id)
            .map(|h| h.value().clone())
            .unwrap_or_default();
        for (id, handler) in &handlers {
            invoke(conversation_id, *id, || handler(envelope));
        }

        if let Some(MessageBody::ConversationSync(sync)) = &envelope.body {
            let sync_handlers = self
                .sync_handlers
                .get(conversation_id)
                .map(|h| h.value().clone())
                .unwrap_or_default();
            for (id, handler) in &sync_handlers {
                invoke(conversation_id, *id, || handler(sync));
            }
        }
    }

    async fn resubscribe_all(&self) {
        let mut ids: Vec<String> = self.registry.lock().active.drain().collect();
        ids.sort();
        tracing::info!(count = ids.len(), "Reconnected, resubscribing");

        // one at a time so two requests for the same id never race
        for id in ids {
            match self.subscribe(&id, None).await {
                Ok(ack) => tracing::debug!(
                    conversation_id = %id,
                    missed_messages = ack.missed_messages,
                    "Resubscribed"
                ),
                Err(e) => tracing::warn!(conversation_id = %id, error = %e, "Resubscribe failed"),
            }
        }
    }
}

/// Withdraws a subscribe waiter however its call ends, including when the
/// caller's future is dropped mid-wait
struct PendingWait<'a> {
    inner: &'a Inner,
    conversation_id: &'a str,
    waiter: u64,
}

impl Drop for PendingWait<'_> {
    fn drop(&mut self) {
        self.inner.withdraw(self.conversation_id, self.waiter);
    }
}

/// Run one handler, containing both errors and panics
fn invoke(conversation_id: &str, id: HandlerId, call: impl FnOnce() -> anyhow::Result<()>) {
    match std::panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(conversation_id, handler = id.0, error = %e, "Handler failed");
        }
        Err(_) => {
            tracing::error!(conversation_id, handler = id.0, "Handler panicked");
        }
    }
}

async fn listen(
    inner: Arc<Inner>,
    mut inbound: mpsc::Receiver<Vec<u8>>,
    shutdown: CancellationToken,
) {
    let mut decoder = FrameDecoder::new();

    loop {
        let bytes = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            bytes = inbound.recv() => match bytes {
                Some(bytes) => bytes,
                None => {
                    tracing::debug!("Inbound feed closed");
                    break;
                }
            },
        };

        decoder.push(&bytes);
        loop {
            match decoder.next_frame() {
                Ok(Some(payload)) => match protocol::decode(&payload) {
                    Ok(envelope) => inner.route(envelope),
                    Err(e) => tracing::warn!(error = %e, "Dropping undecodable envelope"),
                },
                Ok(None) => break,
                Err(e) => tracing::warn!(error = %e, "Dropping corrupt frame"),
            }
        }
    }
    tracing::debug!("Listener stopped");
}

async fn watch_connection(
    inner: Arc<Inner>,
    mut events: mpsc::Receiver<ConnectionEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            ConnectionEvent::Connected => tracing::debug!("Transport connected"),
            ConnectionEvent::Disconnected => tracing::info!("Transport disconnected"),
            ConnectionEvent::Reconnected => {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = inner.resubscribe_all() => {}
                }
            }
        }
    }
    tracing::debug!("Connection watcher stopped");
}
