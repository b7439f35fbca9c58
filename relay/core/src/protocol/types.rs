//! Message Types and Body Payloads
//!
//! Every envelope on the wire carries an integer type code and a body whose
//! shape is fixed by that code. Field names are camelCase on the wire.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::registry;

// ============================================================================
// Message Type
// ============================================================================

/// Integer type code of an envelope
///
/// Codes are stable across releases; new types are added with new codes and
/// existing codes are never reassigned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageType(pub u16);

impl MessageType {
    /// Error report for a conversation or message
    pub const ERROR: Self = Self(1);
    /// Message authored by the user
    pub const USER_MESSAGE: Self = Self(2);
    /// Complete assistant message
    pub const ASSISTANT_MESSAGE: Self = Self(3);
    /// One step of model reasoning
    pub const REASONING_STEP: Self = Self(5);
    /// Model asks for a tool invocation
    pub const TOOL_USE_REQUEST: Self = Self(6);
    /// Outcome of a tool invocation
    pub const TOOL_USE_RESULT: Self = Self(7);
    /// Generic acknowledgement
    pub const ACKNOWLEDGEMENT: Self = Self(8);
    /// An assistant answer is starting
    pub const START_ANSWER: Self = Self(13);
    /// A memory was consulted while answering
    pub const MEMORY_TRACE: Self = Self(14);
    /// Incremental sentence of a streaming answer
    pub const ASSISTANT_SENTENCE: Self = Self(16);
    /// Catch-up batch of persisted messages for a conversation
    pub const CONVERSATION_SYNC: Self = Self(17);
    /// Request to generate (or regenerate) an answer
    pub const GENERATION_REQUEST: Self = Self(33);
    /// Progress summary of long-running thinking
    pub const THINKING_SUMMARY: Self = Self(34);
    /// Conversation title changed
    pub const TITLE_UPDATE: Self = Self(35);
    /// Subscribe to a conversation
    pub const SUBSCRIBE: Self = Self(40);
    /// Unsubscribe from a conversation
    pub const UNSUBSCRIBE: Self = Self(41);
    /// Reply to [`MessageType::SUBSCRIBE`]
    pub const SUBSCRIBE_ACK: Self = Self(42);
    /// Reply to [`MessageType::UNSUBSCRIBE`]
    pub const UNSUBSCRIBE_ACK: Self = Self(43);
    /// Sibling set changed for a forked conversation
    pub const BRANCH_UPDATE: Self = Self(50);
    /// Generation finished (successfully or not)
    pub const GENERATION_COMPLETE: Self = Self(80);

    /// Raw integer code
    #[must_use]
    pub fn code(self) -> u16 {
        self.0
    }

    /// Registered name, or `None` for codes outside the registry
    #[must_use]
    pub fn name(self) -> Option<&'static str> {
        registry::lookup(self).map(|entry| entry.name)
    }

    /// Whether this code is part of the registry
    #[must_use]
    pub fn is_registered(self) -> bool {
        registry::lookup(self).is_some()
    }

    /// Whether this type is a subscription acknowledgement
    #[must_use]
    pub fn is_subscription_ack(self) -> bool {
        self == Self::SUBSCRIBE_ACK || self == Self::UNSUBSCRIBE_ACK
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}({})", self.0),
            None => write!(f, "Unknown({})", self.0),
        }
    }
}

// ============================================================================
// Conversation content
// ============================================================================

/// Error report delivered to a conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    /// Machine-readable error code
    pub code: String,
    /// Human-readable description
    pub message: String,
    /// Message the error relates to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Conversation the error relates to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// Message authored by the user
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessage {
    /// Message id
    pub id: String,
    /// Owning conversation
    pub conversation_id: String,
    /// Text content
    pub content: String,
    /// Message this one follows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<String>,
}

/// Complete assistant message
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantMessage {
    /// Message id
    pub id: String,
    /// Owning conversation
    pub conversation_id: String,
    /// Text content
    pub content: String,
    /// Message this one follows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<String>,
    /// Reasoning that produced the content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Unix milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// One step of model reasoning
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningStep {
    /// Step id
    pub id: String,
    /// Answer this step belongs to
    pub message_id: String,
    /// Owning conversation
    pub conversation_id: String,
    /// Position within the answer's reasoning
    pub sequence: u32,
    /// Reasoning text
    pub content: String,
}

/// Model asks for a tool invocation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUseRequest {
    /// Tool call id
    pub id: String,
    /// Answer that requested the tool
    pub message_id: String,
    /// Owning conversation
    pub conversation_id: String,
    /// Tool to invoke
    pub tool_name: String,
    /// Decoded JSON arguments
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
    /// Where the tool runs (`server`, `client`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<String>,
}

/// Outcome of a tool invocation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUseResult {
    /// Result id
    pub id: String,
    /// Tool call this answers
    pub request_id: String,
    /// Answer that requested the tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Owning conversation
    pub conversation_id: String,
    /// Whether the tool succeeded
    pub success: bool,
    /// Tool output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Generic acknowledgement
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledgement {
    /// Id of the acknowledged message, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_id: Option<String>,
    /// Whether the acknowledged message was accepted
    #[serde(default = "default_true")]
    pub success: bool,
}

/// An assistant answer is starting
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartAnswer {
    /// Id the finished answer will carry
    pub message_id: String,
    /// Owning conversation
    pub conversation_id: String,
    /// Message being answered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<String>,
}

/// A memory was consulted while answering
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryTrace {
    /// Trace id
    pub id: String,
    /// Memory that was used
    pub memory_id: String,
    /// Answer that used it
    pub message_id: String,
    /// Owning conversation
    pub conversation_id: String,
    /// Memory content
    pub content: String,
    /// Relevance score (0.0 - 1.0)
    pub relevance: f32,
}

/// Incremental sentence of a streaming answer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantSentence {
    /// Sentence id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Answer this sentence belongs to
    pub message_id: String,
    /// Message being answered
    #[serde(default)]
    pub previous_id: String,
    /// Owning conversation
    pub conversation_id: String,
    /// Position within the answer, starting at 1
    pub sequence: u32,
    /// Sentence text
    pub text: String,
    /// Set on the last sentence of the answer
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_final: bool,
}

/// One persisted message inside a [`ConversationSync`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncedMessage {
    /// Message id
    pub id: String,
    /// Message this one follows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<String>,
    /// `user`, `assistant` or `system`
    pub role: String,
    /// Text content
    pub content: String,
    /// Per-conversation sequence number
    pub sequence: u64,
}

/// Catch-up batch of messages a subscriber missed
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSync {
    /// Conversation being synchronized
    pub conversation_id: String,
    /// Messages in sequence order
    #[serde(default)]
    pub messages: Vec<SyncedMessage>,
    /// Highest sequence number known to the sender
    pub last_sequence: u64,
}

/// Request to generate an answer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    /// Owning conversation
    pub conversation_id: String,
    /// Message to answer
    pub message_id: String,
    /// Message preceding it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<String>,
    /// `send`, `regenerate` or `edit`
    pub request_type: String,
    /// Replacement content for `edit`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_content: Option<String>,
    /// Allow tool calls
    #[serde(default)]
    pub enable_tools: bool,
    /// Request reasoning output
    #[serde(default)]
    pub enable_reasoning: bool,
    /// Stream the answer
    #[serde(default)]
    pub enable_streaming: bool,
    /// Unix milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// Progress summary of long-running thinking
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingSummary {
    /// Summary id
    pub id: String,
    /// Answer being worked on
    pub message_id: String,
    /// Owning conversation
    pub conversation_id: String,
    /// Summary text
    pub content: String,
    /// Progress (0.0 - 1.0)
    #[serde(default)]
    pub progress: f32,
    /// Unix milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// Conversation title changed
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleUpdate {
    /// Conversation renamed
    pub conversation_id: String,
    /// New title
    pub title: String,
}

// ============================================================================
// Subscription control
// ============================================================================

/// Subscribe to live updates of a conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscribe {
    /// Conversation to follow
    pub conversation_id: String,
    /// Replay messages after this sequence number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_sequence: Option<u64>,
    /// Subscriber acts as an agent
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub agent_mode: bool,
    /// Subscriber is a voice session
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub voice_mode: bool,
}

/// Stop following a conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unsubscribe {
    /// Conversation to leave
    pub conversation_id: String,
}

/// Reply to [`Subscribe`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeAck {
    /// Conversation the reply is for
    pub conversation_id: String,
    /// Whether the subscription was accepted
    pub success: bool,
    /// Rejection reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Messages published since the requested sequence
    #[serde(default)]
    pub missed_messages: u32,
}

/// Reply to [`Unsubscribe`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeAck {
    /// Conversation the reply is for
    pub conversation_id: String,
    /// Whether the request was honoured
    pub success: bool,
}

// ============================================================================
// Branching and completion
// ============================================================================

/// Summary of one sibling in a forked conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiblingInfo {
    /// Sibling message id
    pub id: String,
    /// Sibling content
    pub content: String,
    /// RFC 3339 creation time
    pub created_at: String,
}

/// Sibling set changed for a forked conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchUpdate {
    /// Owning conversation
    pub conversation_id: String,
    /// Message the siblings branch from
    pub parent_message_id: String,
    /// Newly created sibling
    pub new_sibling: SiblingInfo,
    /// All siblings including the new one
    #[serde(default)]
    pub all_siblings: Vec<SiblingInfo>,
    /// Number of siblings
    pub total_count: u32,
}

/// Generation finished
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationComplete {
    /// Answer that finished
    pub message_id: String,
    /// Owning conversation
    pub conversation_id: String,
    /// Whether the answer completed normally
    pub success: bool,
    /// Failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_display() {
        assert_eq!(MessageType::SUBSCRIBE.to_string(), "Subscribe(40)");
        assert_eq!(MessageType(999).to_string(), "Unknown(999)");
    }

    #[test]
    fn test_ack_classification() {
        assert!(MessageType::SUBSCRIBE_ACK.is_subscription_ack());
        assert!(MessageType::UNSUBSCRIBE_ACK.is_subscription_ack());
        assert!(!MessageType::ACKNOWLEDGEMENT.is_subscription_ack());
    }

    #[test]
    fn test_bodies_use_camel_case() {
        let sentence = AssistantSentence {
            id: None,
            message_id: "m1".to_string(),
            previous_id: "u1".to_string(),
            conversation_id: "c1".to_string(),
            sequence: 2,
            text: "Hello.".to_string(),
            is_final: true,
        };
        let json = serde_json::to_value(&sentence).unwrap();
        assert_eq!(json["messageId"], "m1");
        assert_eq!(json["isFinal"], true);
        assert!(json.get("id").is_none());
    }

    #[test]
    fn test_subscribe_ack_missed_messages_defaults_to_zero() {
        let ack: SubscribeAck =
            serde_json::from_str(r#"{"conversationId":"c1","success":true}"#).unwrap();
        assert_eq!(ack.missed_messages, 0);
        assert!(ack.error.is_none());
    }
}
