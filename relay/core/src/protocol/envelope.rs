//! Envelope
//!
//! Outer wire message: routing metadata, W3C trace context and a typed body.

use rand::Rng;

use super::registry::MessageBody;
use super::types::MessageType;

/// Trace flag bit marking a sampled trace
pub const TRACE_FLAG_SAMPLED: u8 = 0x01;

/// W3C trace context carried alongside an envelope
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceContext {
    /// 32 lowercase hex characters
    pub trace_id: String,
    /// 16 lowercase hex characters
    pub span_id: String,
    /// Trace flags byte
    pub flags: u8,
}

impl TraceContext {
    /// Start a new sampled trace with random ids
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let trace: [u8; 16] = rng.gen();
        let span: [u8; 8] = rng.gen();
        Self {
            trace_id: hex::encode(trace),
            span_id: hex::encode(span),
            flags: TRACE_FLAG_SAMPLED,
        }
    }

    /// Child span within the same trace
    #[must_use]
    pub fn child(&self) -> Self {
        let span: [u8; 8] = rand::thread_rng().gen();
        Self {
            trace_id: self.trace_id.clone(),
            span_id: hex::encode(span),
            flags: self.flags,
        }
    }

    /// Parse a `traceparent` header (`00-{trace}-{span}-{flags}`)
    ///
    /// Returns `None` for unsupported versions, wrong lengths, non-hex
    /// characters and the all-zero ids the W3C format reserves as invalid.
    #[must_use]
    pub fn parse(traceparent: &str) -> Option<Self> {
        let mut parts = traceparent.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;
        if parts.next().is_some() || version != "00" {
            return None;
        }
        if !is_hex_id(trace_id, 32) || !is_hex_id(span_id, 16) || flags.len() != 2 {
            return None;
        }
        let flags = u8::from_str_radix(flags, 16).ok()?;
        Some(Self {
            trace_id: trace_id.to_ascii_lowercase(),
            span_id: span_id.to_ascii_lowercase(),
            flags,
        })
    }

    /// Render as a `traceparent` header
    #[must_use]
    pub fn traceparent(&self) -> String {
        format!("00-{}-{}-{:02x}", self.trace_id, self.span_id, self.flags)
    }

    /// Whether the sampled flag is set
    #[must_use]
    pub fn is_sampled(&self) -> bool {
        self.flags & TRACE_FLAG_SAMPLED != 0
    }
}

fn is_hex_id(value: &str, len: usize) -> bool {
    value.len() == len
        && value.bytes().all(|b| b.is_ascii_hexdigit())
        && value.bytes().any(|b| b != b'0')
}

/// A protocol message as seen by the rest of the crate
///
/// `body` is optional only so that malformed envelopes can be represented and
/// rejected by the codec; envelopes built with [`Envelope::new`] always carry
/// one whose type matches `message_type`.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    /// Conversation this message belongs to
    pub conversation_id: Option<String>,
    /// Registered type code
    pub message_type: MessageType,
    /// Typed body
    pub body: Option<MessageBody>,
    /// Distributed tracing context
    pub trace: Option<TraceContext>,
    /// Observability session correlation id
    pub session_id: Option<String>,
    /// Observability user correlation id
    pub user_id: Option<String>,
}

impl Envelope {
    /// Envelope scoped to a conversation
    pub fn new(conversation_id: impl Into<String>, body: impl Into<MessageBody>) -> Self {
        let mut envelope = Self::unscoped(body);
        envelope.conversation_id = Some(conversation_id.into());
        envelope
    }

    /// Envelope not tied to any conversation
    pub fn unscoped(body: impl Into<MessageBody>) -> Self {
        let body = body.into();
        Self {
            conversation_id: None,
            message_type: body.message_type(),
            body: Some(body),
            trace: None,
            session_id: None,
            user_id: None,
        }
    }

    /// Attach trace context
    #[must_use]
    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Attach session and user correlation ids
    #[must_use]
    pub fn with_correlation(
        mut self,
        session_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        self.session_id = Some(session_id.into());
        self.user_id = Some(user_id.into());
        self
    }

    /// Whether both trace and span ids are present
    #[must_use]
    pub fn has_trace_context(&self) -> bool {
        self.trace
            .as_ref()
            .is_some_and(|t| !t.trace_id.is_empty() && !t.span_id.is_empty())
    }

    /// W3C `traceparent` header, if trace context is present
    #[must_use]
    pub fn traceparent(&self) -> Option<String> {
        if !self.has_trace_context() {
            return None;
        }
        self.trace.as_ref().map(TraceContext::traceparent)
    }

    /// Conversation id or empty string
    #[must_use]
    pub fn conversation(&self) -> &str {
        self.conversation_id.as_deref().unwrap_or_default()
    }
}
