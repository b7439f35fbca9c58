//! Streaming Model Gateway
//!
//! OpenAI-compatible chat completions. Establishing a request goes through
//! the [`Resilience`] wrapper; once a stream has started it is owned by a
//! single relay task that ends on the first of:
//!
//! - natural completion (`[DONE]`, a finish reason, or end of body)
//! - the stream timeout, measured from when the relay starts
//! - cancellation by the owning [`ChatStream`] (explicit or by drop)
//!
//! The relay never inherits the establishment deadline, so a slow but
//! healthy stream keeps flowing after `chat_stream` has returned.

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::sse::ChunkDecoder;
use super::types::{ChatMessage, ChatResponse, StreamChunk, StreamError, Tool, ToolCall};
use crate::http::{build_client, send_checked};
use crate::resilience::{Resilience, ResilienceConfig, ServiceError};

/// Chunks buffered between the relay and a slow consumer
const RELAY_BUFFER: usize = 100;

/// How long a terminal chunk may wait for buffer space
const TERMINAL_GRACE: Duration = Duration::from_secs(1);

/// Gateway configuration
#[derive(Clone, Debug, PartialEq)]
pub struct LlmConfig {
    /// Server base URL; a trailing `/` or `/v1` is ignored
    pub base_url: String,
    /// Bearer token
    pub api_key: Option<String>,
    /// Model name
    pub model: String,
    /// Completion token cap
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Prepended to every conversation
    pub system_prompt: Option<String>,
    /// Lifetime bound for one streamed response
    pub stream_timeout: Duration,
    /// TCP connect bound
    pub connect_timeout: Duration,
    /// Breaker/retry/deadline for establishing requests
    pub resilience: ResilienceConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            api_key: None,
            model: "llama3.2".to_string(),
            max_tokens: Some(1024),
            temperature: Some(0.7),
            system_prompt: None,
            stream_timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(10),
            resilience: ResilienceConfig::default(),
        }
    }
}

impl LlmConfig {
    /// Full chat-completions endpoint
    #[must_use]
    pub fn completions_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let base = base.strip_suffix("/v1").unwrap_or(base);
        format!("{base}/v1/chat/completions")
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<&'a ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "<[Tool]>::is_empty")]
    tools: &'a [Tool],
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

/// Chat-completions client
#[derive(Clone)]
pub struct ModelGateway {
    http: reqwest::Client,
    config: LlmConfig,
    resilience: Resilience,
    active_relays: Arc<AtomicUsize>,
}

impl fmt::Debug for ModelGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelGateway")
            .field("url", &self.config.completions_url())
            .field("model", &self.config.model)
            .field("active_relays", &self.active_relays())
            .finish_non_exhaustive()
    }
}

impl ModelGateway {
    /// Create a gateway
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be constructed.
    pub fn new(config: LlmConfig) -> Result<Self, ServiceError> {
        // no total timeout: the relay enforces the stream lifetime itself
        let http = build_client(config.connect_timeout, None)?;
        let resilience = Resilience::new("llm", &config.resilience);
        Ok(Self {
            http,
            config,
            resilience,
            active_relays: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Configuration in effect
    #[must_use]
    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Resilience wrapper guarding this gateway
    #[must_use]
    pub fn resilience(&self) -> &Resilience {
        &self.resilience
    }

    /// Number of relay tasks currently alive
    #[must_use]
    pub fn active_relays(&self) -> usize {
        self.active_relays.load(Ordering::SeqCst)
    }

    /// Non-streaming completion
    ///
    /// # Errors
    ///
    /// Any [`ServiceError`] from the resilience wrapper, or
    /// [`ServiceError::Decode`] if the response carries no choice.
    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse, ServiceError> {
        self.chat_with_tools(messages, &[]).await
    }

    /// Non-streaming completion with callable tools
    ///
    /// # Errors
    ///
    /// See [`ModelGateway::chat`].
    pub async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[Tool],
    ) -> Result<ChatResponse, ServiceError> {
        let system = self.system_message();
        let body = self.request_body(system.as_ref(), messages, tools, false);

        let response: CompletionResponse = self
            .resilience
            .call(|attempt| {
                let request = self.post().json(&body);
                async move {
                    if attempt > 0 {
                        tracing::debug!(attempt, "Retrying chat completion");
                    }
                    let response = send_checked(request).await?;
                    response
                        .json::<CompletionResponse>()
                        .await
                        .map_err(ServiceError::from)
                }
            })
            .await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::Decode("completion has no choices".to_string()))?;

        let message = choice.message;
        Ok(ChatResponse {
            content: message.content.unwrap_or_default(),
            reasoning: message
                .reasoning_content
                .or(message.reasoning)
                .filter(|r| !r.is_empty()),
            tool_calls: message.tool_calls,
            finish_reason: choice.finish_reason,
        })
    }

    /// Streaming completion
    ///
    /// # Errors
    ///
    /// Fails only while establishing the stream. Failures after that arrive
    /// as a terminal chunk carrying a [`StreamError`].
    pub async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<ChatStream, ServiceError> {
        self.chat_stream_with_tools(messages, &[]).await
    }

    /// Streaming completion with callable tools
    ///
    /// # Errors
    ///
    /// See [`ModelGateway::chat_stream`].
    pub async fn chat_stream_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[Tool],
    ) -> Result<ChatStream, ServiceError> {
        let system = self.system_message();
        let body = self.request_body(system.as_ref(), messages, tools, true);

        let response = self
            .resilience
            .call(|_| {
                let request = self.post().json(&body);
                async move { send_checked(request).await }
            })
            .await?;

        tracing::debug!(model = %self.config.model, "Chat stream established");
        Ok(spawn_relay(
            response.bytes_stream(),
            self.config.stream_timeout,
            &self.active_relays,
        ))
    }

    fn post(&self) -> reqwest::RequestBuilder {
        let request = self.http.post(self.config.completions_url());
        match self.config.api_key.as_deref() {
            Some(key) if !key.is_empty() => request.bearer_auth(key),
            _ => request,
        }
    }

    fn system_message(&self) -> Option<ChatMessage> {
        self.config
            .system_prompt
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(ChatMessage::system)
    }

    fn request_body<'a>(
        &'a self,
        system: Option<&'a ChatMessage>,
        messages: &'a [ChatMessage],
        tools: &'a [Tool],
        stream: bool,
    ) -> CompletionRequest<'a> {
        CompletionRequest {
            model: &self.config.model,
            messages: system.into_iter().chain(messages).collect(),
            stream,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            tools,
        }
    }
}

/// Decrements the live-relay count when the relay task ends, however it ends
struct RelayGuard(Arc<AtomicUsize>);

impl RelayGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for RelayGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Spawn the relay task for a response body and hand back its consumer side
pub(crate) fn spawn_relay<S, B, E>(
    body: S,
    timeout: Duration,
    active: &Arc<AtomicUsize>,
) -> ChatStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let (tx, rx) = mpsc::channel(RELAY_BUFFER);
    let cancel = CancellationToken::new();
    let guard = RelayGuard::new(active);

    tokio::spawn(relay(body, tx, cancel.clone(), timeout, guard));

    ChatStream {
        rx,
        cancel,
        finished: false,
    }
}

enum Delivery {
    Sent,
    Stopped,
    TimedOut,
}

async fn relay<S, B, E>(
    body: S,
    tx: mpsc::Sender<StreamChunk>,
    cancel: CancellationToken,
    timeout: Duration,
    _guard: RelayGuard,
) where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: fmt::Display,
{
    let deadline = Instant::now() + timeout;
    let mut body = std::pin::pin!(body);
    let mut decoder = ChunkDecoder::new();

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!("Stream cancelled by owner");
                let _ = tx.try_send(StreamChunk::failed(StreamError::Cancelled));
                return;
            }
            () = tokio::time::sleep_until(deadline) => {
                tracing::warn!(timeout_secs = timeout.as_secs(), "Stream timed out");
                deliver_terminal(&tx, StreamChunk::failed(StreamError::Timeout(timeout)), &cancel).await;
                return;
            }
            () = tx.closed() => {
                tracing::debug!("Stream consumer went away");
                return;
            }
            next = body.next() => next,
        };

        let chunks = match next {
            Some(Ok(bytes)) => decoder.push(bytes.as_ref()),
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Stream read failed");
                let chunk = StreamChunk::failed(StreamError::Transport(e.to_string()));
                deliver_terminal(&tx, chunk, &cancel).await;
                return;
            }
            None => decoder.finish(),
        };

        for chunk in chunks {
            let terminal = chunk.is_terminal();
            match emit(&tx, chunk, &cancel, deadline).await {
                Delivery::Sent if terminal => return,
                Delivery::Sent => {}
                Delivery::Stopped => return,
                Delivery::TimedOut => {
                    tracing::warn!(timeout_secs = timeout.as_secs(), "Stream timed out");
                    deliver_terminal(&tx, StreamChunk::failed(StreamError::Timeout(timeout)), &cancel)
                        .await;
                    return;
                }
            }
        }

        if decoder.is_finished() {
            return;
        }
    }
}

/// Send one chunk, giving up on cancellation or the stream deadline
async fn emit(
    tx: &mpsc::Sender<StreamChunk>,
    chunk: StreamChunk,
    cancel: &CancellationToken,
    deadline: Instant,
) -> Delivery {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Delivery::Stopped,
        () = tokio::time::sleep_until(deadline) => Delivery::TimedOut,
        sent = tx.send(chunk) => {
            if sent.is_ok() { Delivery::Sent } else { Delivery::Stopped }
        }
    }
}

/// Best-effort delivery of a final chunk to a consumer that may be full or gone
async fn deliver_terminal(
    tx: &mpsc::Sender<StreamChunk>,
    chunk: StreamChunk,
    cancel: &CancellationToken,
) {
    match tx.try_send(chunk) {
        Ok(()) | Err(TrySendError::Closed(_)) => {}
        Err(TrySendError::Full(chunk)) => {
            tokio::select! {
                () = cancel.cancelled() => {}
                _ = tokio::time::timeout(TERMINAL_GRACE, tx.send(chunk)) => {}
            }
        }
    }
}

/// Consumer side of one streamed completion
///
/// Yields chunks until a terminal one (`done` or `error`). Dropping the
/// stream cancels its relay task.
#[derive(Debug)]
pub struct ChatStream {
    rx: mpsc::Receiver<StreamChunk>,
    cancel: CancellationToken,
    finished: bool,
}

impl ChatStream {
    /// Receive the next chunk; `None` once the stream has ended
    pub async fn next_chunk(&mut self) -> Option<StreamChunk> {
        if self.finished {
            return None;
        }
        let chunk = self.rx.recv().await;
        self.observe(chunk.as_ref());
        chunk
    }

    /// Stop the relay task
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this stream; link it to a wider scope if needed
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drain the stream into a single response
    ///
    /// # Errors
    ///
    /// The [`StreamError`] of the terminal chunk, or
    /// [`StreamError::Cancelled`] if the relay ended without one.
    pub async fn collect_response(mut self) -> Result<ChatResponse, StreamError> {
        let mut response = ChatResponse::default();
        let mut reasoning = String::new();

        while let Some(chunk) = self.next_chunk().await {
            if let Some(err) = chunk.error {
                return Err(err);
            }
            response.content.push_str(&chunk.content);
            reasoning.push_str(&chunk.reasoning);
            response.tool_calls.extend(chunk.tool_call);
            if chunk.done {
                response.finish_reason = chunk.finish_reason;
                response.reasoning = Some(reasoning).filter(|r| !r.is_empty());
                return Ok(response);
            }
        }
        Err(StreamError::Cancelled)
    }

    fn observe(&mut self, chunk: Option<&StreamChunk>) {
        if chunk.map_or(true, StreamChunk::is_terminal) {
            self.finished = true;
        }
    }
}

impl Stream for ChatStream {
    type Item = StreamChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        let polled = self.rx.poll_recv(cx);
        if let Poll::Ready(chunk) = &polled {
            let chunk = chunk.as_ref();
            self.observe(chunk);
        }
        polled
    }
}

impl Drop for ChatStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
