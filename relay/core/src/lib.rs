//! Relay Core - Real-Time Protocol and Streaming Resilience
//!
//! The plumbing between a conversational assistant's clients, its model
//! server and its speech services. It has no UI and no storage of its own;
//! both sit behind ports.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     Real-time connection                          │
//! │            (Transport: frames out, bytes + events in)             │
//! └──────────────┬───────────────────────────────────▲───────────────┘
//!                │ decode                             │ encode
//! ┌──────────────▼──────────────┐     ┌───────────────┴──────────────┐
//! │     SubscriptionManager     │     │         AnswerRelay          │
//! │  acks, timeouts, resubscribe│     │ StartAnswer → sentences →    │
//! │  handler dispatch           │     │ GenerationComplete           │
//! └──────────────┬──────────────┘     └───────────────▲──────────────┘
//!                │ handlers                           │ StreamChunk
//! ┌──────────────▼──────────────┐     ┌───────────────┴──────────────┐
//! │    ConversationSession      │     │        ModelGateway          │
//! │  Uninitialized/Active/Closed│     │  SSE → chunks, tool calls,   │
//! │  sequenced message chain    │     │  cancellable relay task      │
//! └──────────────┬──────────────┘     └───────────────┬──────────────┘
//!                │ ports                              │ Resilience
//!         Repositories, ids              breaker + deadline + retry
//!                                        (also ASR / TTS adapters)
//! ```
//!
//! # Module Overview
//!
//! - [`protocol`]: envelope codec, closed type registry, byte framing
//! - [`transport`]: connection port and an in-process implementation
//! - [`subscription`]: subscribe/unsubscribe with acks and resubscription
//! - [`llm`]: streaming chat completions with stream-scoped cancellation
//! - [`answer`]: publishing a streamed answer as protocol envelopes
//! - [`resilience`]: circuit breaker and bounded retry
//! - [`speech`]: transcription and synthesis adapters
//! - [`session`]: conversation session state machine and its ports
//! - [`config`]: TOML + environment configuration

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod answer;
pub mod config;
mod http;
pub mod llm;
pub mod protocol;
pub mod resilience;
pub mod session;
pub mod speech;
pub mod subscription;
pub mod transport;

// Re-exports for convenience
pub use answer::{AnswerError, AnswerRelay, SentenceSplitter};
pub use config::{load_config, ConfigError, ConfigOverrides, ConfigSource, RelayConfig};
pub use llm::{ChatMessage, ChatStream, LlmConfig, ModelGateway, StreamChunk, StreamError};
pub use protocol::{
    decode, encode, encode_frame, DecodingError, EncodingError, Envelope, FrameDecoder,
    MessageBody, MessageType, TraceContext,
};
pub use resilience::{CircuitState, Resilience, ResilienceConfig, ServiceError};
pub use session::{ConversationSession, SessionError, SessionState};
pub use speech::{AsrAdapter, SpeechConfig, Synthesizer, Transcriber, TtsAdapter};
pub use subscription::{SubscriptionConfig, SubscriptionError, SubscriptionManager};
pub use transport::{ConnectionEvent, InProcessTransport, Transport, TransportFeeds};
