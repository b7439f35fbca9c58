//! Message Type Registry
//!
//! Closed, immutable mapping from type code to body constructor. The table is
//! a `static` slice sorted by code, so lookups need no locking and nothing can
//! register a type at runtime.

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::types::{
    Acknowledgement, AssistantMessage, AssistantSentence, BranchUpdate, ConversationSync,
    ErrorMessage, GenerationComplete, GenerationRequest, MemoryTrace, MessageType, ReasoningStep,
    StartAnswer, Subscribe, SubscribeAck, ThinkingSummary, TitleUpdate, ToolUseRequest,
    ToolUseResult, Unsubscribe, UnsubscribeAck, UserMessage,
};

/// Constructor that rebuilds a typed body from its decoded JSON form
pub type BodyConstructor = fn(Value) -> Result<MessageBody, serde_json::Error>;

/// One registry row
#[derive(Debug)]
pub struct RegistryEntry {
    /// Type code
    pub message_type: MessageType,
    /// Body name, used in logs and errors
    pub name: &'static str,
    /// Body constructor
    pub construct: BodyConstructor,
}

fn construct<T>(value: Value) -> Result<MessageBody, serde_json::Error>
where
    T: DeserializeOwned + Into<MessageBody>,
{
    serde_json::from_value::<T>(value).map(Into::into)
}

macro_rules! message_registry {
    ($($code:ident => $body:ident),* $(,)?) => {
        /// Typed envelope body, one variant per registered message type
        #[derive(Clone, Debug, PartialEq)]
        #[allow(missing_docs)]
        pub enum MessageBody {
            $($body($body),)*
        }

        impl MessageBody {
            /// Type code this body is registered under
            #[must_use]
            pub fn message_type(&self) -> MessageType {
                match self {
                    $(Self::$body(_) => MessageType::$code,)*
                }
            }

            pub(crate) fn to_value(&self) -> Result<Value, serde_json::Error> {
                match self {
                    $(Self::$body(body) => serde_json::to_value(body),)*
                }
            }
        }

        $(
            impl From<$body> for MessageBody {
                fn from(body: $body) -> Self {
                    Self::$body(body)
                }
            }
        )*

        static REGISTRY: &[RegistryEntry] = &[
            $(RegistryEntry {
                message_type: MessageType::$code,
                name: stringify!($body),
                construct: construct::<$body>,
            },)*
        ];
    };
}

// Keep sorted by code.
message_registry! {
    ERROR => ErrorMessage,
    USER_MESSAGE => UserMessage,
    ASSISTANT_MESSAGE => AssistantMessage,
    REASONING_STEP => ReasoningStep,
    TOOL_USE_REQUEST => ToolUseRequest,
    TOOL_USE_RESULT => ToolUseResult,
    ACKNOWLEDGEMENT => Acknowledgement,
    START_ANSWER => StartAnswer,
    MEMORY_TRACE => MemoryTrace,
    ASSISTANT_SENTENCE => AssistantSentence,
    CONVERSATION_SYNC => ConversationSync,
    GENERATION_REQUEST => GenerationRequest,
    THINKING_SUMMARY => ThinkingSummary,
    TITLE_UPDATE => TitleUpdate,
    SUBSCRIBE => Subscribe,
    UNSUBSCRIBE => Unsubscribe,
    SUBSCRIBE_ACK => SubscribeAck,
    UNSUBSCRIBE_ACK => UnsubscribeAck,
    BRANCH_UPDATE => BranchUpdate,
    GENERATION_COMPLETE => GenerationComplete,
}

/// Find the registry row for a type code
#[must_use]
pub fn lookup(message_type: MessageType) -> Option<&'static RegistryEntry> {
    REGISTRY
        .binary_search_by_key(&message_type, |entry| entry.message_type)
        .ok()
        .map(|idx| &REGISTRY[idx])
}

/// All registered rows in code order
#[must_use]
pub fn entries() -> &'static [RegistryEntry] {
    REGISTRY
}
