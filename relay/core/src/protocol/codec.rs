//! Envelope Codec
//!
//! Pure encode/decode of [`Envelope`]s against the closed type registry.
//! Envelopes travel as MessagePack maps with named keys; routing keys and
//! bodies are camelCase while the trace and correlation keys are snake_case.
//! Errors are scoped to the single message being processed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::envelope::{Envelope, TraceContext};
use super::frame::{self, FrameError};
use super::registry;
use super::types::MessageType;

/// Failure to encode an envelope
#[derive(Debug, Error)]
pub enum EncodingError {
    /// Type code is not in the registry
    #[error("unregistered message type {0}")]
    UnknownType(MessageType),

    /// Envelope has no body
    #[error("envelope body is empty")]
    EmptyBody,

    /// Body variant does not belong to the envelope's type
    #[error("body {body} does not match envelope type {envelope}")]
    BodyMismatch {
        /// Type declared on the envelope
        envelope: MessageType,
        /// Type of the body actually carried
        body: MessageType,
    },

    /// Body could not be turned into a generic value
    #[error("failed to serialize body: {0}")]
    Body(#[from] serde_json::Error),

    /// MessagePack serialization failed
    #[error("failed to serialize envelope: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    /// Encoded envelope does not fit in a frame
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Failure to decode an envelope
#[derive(Debug, Error)]
pub enum DecodingError {
    /// No input bytes
    #[error("empty input")]
    Empty,

    /// Bytes are not a well-formed envelope
    #[error("malformed envelope: {0}")]
    Malformed(#[source] rmp_serde::decode::Error),

    /// Type code is not in the registry
    #[error("unregistered message type {0}")]
    UnknownType(MessageType),

    /// Body does not fit the registered shape for its type
    #[error("malformed {name} body: {source}")]
    Body {
        /// Registered body name
        name: &'static str,
        /// Underlying parse error
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Serialize)]
struct WireEnvelopeRef<'a> {
    #[serde(rename = "conversationId", skip_serializing_if = "Option::is_none")]
    conversation_id: Option<&'a str>,
    #[serde(rename = "type")]
    message_type: MessageType,
    body: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    span_id: Option<&'a str>,
    #[serde(skip_serializing_if = "is_zero")]
    trace_flags: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct WireEnvelope {
    #[serde(rename = "conversationId", default)]
    conversation_id: Option<String>,
    #[serde(rename = "type")]
    message_type: MessageType,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    trace_id: Option<String>,
    #[serde(default)]
    span_id: Option<String>,
    #[serde(default)]
    trace_flags: u8,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(value: &u8) -> bool {
    *value == 0
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Encode an envelope to its wire payload
///
/// # Errors
///
/// Fails if the type is unregistered, the body is missing or belongs to a
/// different type, or serialization fails.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, EncodingError> {
    if registry::lookup(envelope.message_type).is_none() {
        return Err(EncodingError::UnknownType(envelope.message_type));
    }

    let body = envelope.body.as_ref().ok_or(EncodingError::EmptyBody)?;
    if body.message_type() != envelope.message_type {
        return Err(EncodingError::BodyMismatch {
            envelope: envelope.message_type,
            body: body.message_type(),
        });
    }

    let trace = envelope.trace.as_ref();
    let wire = WireEnvelopeRef {
        conversation_id: envelope.conversation_id.as_deref(),
        message_type: envelope.message_type,
        body: body.to_value()?,
        trace_id: trace.map(|t| t.trace_id.as_str()),
        span_id: trace.map(|t| t.span_id.as_str()),
        trace_flags: trace.map_or(0, |t| t.flags),
        session_id: envelope.session_id.as_deref(),
        user_id: envelope.user_id.as_deref(),
    };

    Ok(rmp_serde::to_vec_named(&wire)?)
}

/// Decode a wire payload into an envelope
///
/// The body is rebuilt through the constructor registered for its type; a
/// missing body is treated as an empty object so types whose fields all have
/// defaults still decode.
///
/// # Errors
///
/// Fails on empty or malformed input and on unregistered types.
pub fn decode(data: &[u8]) -> Result<Envelope, DecodingError> {
    if data.is_empty() {
        return Err(DecodingError::Empty);
    }

    let wire: WireEnvelope = rmp_serde::from_slice(data).map_err(DecodingError::Malformed)?;

    let entry = registry::lookup(wire.message_type)
        .ok_or(DecodingError::UnknownType(wire.message_type))?;

    let raw_body = match wire.body {
        Some(Value::Null) | None => Value::Object(serde_json::Map::new()),
        Some(value) => value,
    };
    let body = (entry.construct)(raw_body).map_err(|source| DecodingError::Body {
        name: entry.name,
        source,
    })?;

    let trace = match (non_empty(wire.trace_id), non_empty(wire.span_id)) {
        (Some(trace_id), Some(span_id)) => Some(TraceContext {
            trace_id,
            span_id,
            flags: wire.trace_flags,
        }),
        _ => None,
    };

    Ok(Envelope {
        conversation_id: non_empty(wire.conversation_id),
        message_type: wire.message_type,
        body: Some(body),
        trace,
        session_id: non_empty(wire.session_id),
        user_id: non_empty(wire.user_id),
    })
}

/// Encode an envelope and wrap it in a transport frame
///
/// # Errors
///
/// See [`encode`]; also fails if the payload exceeds the frame limit.
pub fn encode_frame(envelope: &Envelope) -> Result<Vec<u8>, EncodingError> {
    let payload = encode(envelope)?;
    Ok(frame::encode(&payload)?)
}
