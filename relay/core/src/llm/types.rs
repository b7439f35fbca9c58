//! Chat Types
//!
//! OpenAI-compatible request/response shapes plus the [`StreamChunk`] unit
//! the gateway relays to consumers.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Author of a chat message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions for the model
    System,
    /// End user
    User,
    /// The model
    Assistant,
    /// Tool output fed back to the model
    Tool,
}

/// One message in a chat request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author
    pub role: Role,
    /// Text content
    #[serde(default)]
    pub content: String,
    /// Tool calls made by the assistant
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Tool call this message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// System instruction
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// User turn
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Assistant turn
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Tool result for a previous call
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::with_role(Role::Tool, content);
        msg.tool_call_id = Some(call_id.into());
        msg
    }
}

/// A completed function call requested by the model
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call id, echoed back in the tool result
    pub id: String,
    /// Always `function`
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    /// Function name and JSON-encoded arguments
    pub function: FunctionCall,
}

/// Function name and raw argument string
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Function name
    pub name: String,
    /// JSON-encoded arguments
    #[serde(default)]
    pub arguments: String,
}

impl ToolCall {
    /// Build a function call
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: function_kind(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    /// Decode the argument string; an empty string is an empty object
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the arguments are not a JSON object.
    pub fn parse_arguments(
        &self,
    ) -> Result<serde_json::Map<String, serde_json::Value>, serde_json::Error> {
        if self.function.arguments.trim().is_empty() {
            return Ok(serde_json::Map::new());
        }
        serde_json::from_str(&self.function.arguments)
    }
}

fn function_kind() -> String {
    "function".to_string()
}

/// Function the model may call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// Always `function`
    #[serde(rename = "type")]
    pub kind: String,
    /// Function metadata
    pub function: ToolFunction,
}

/// Function metadata
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolFunction {
    /// Function name
    pub name: String,
    /// What the function does
    pub description: String,
    /// JSON schema of the arguments
    pub parameters: serde_json::Value,
}

impl Tool {
    /// Describe a callable function
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            kind: function_kind(),
            function: ToolFunction {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// Non-streaming chat result
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChatResponse {
    /// Assistant text
    pub content: String,
    /// Reasoning text, if the model produced any
    pub reasoning: Option<String>,
    /// Requested tool calls
    pub tool_calls: Vec<ToolCall>,
    /// Why generation stopped
    pub finish_reason: Option<String>,
}

/// Why a stream ended abnormally
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    /// Stream outlived its timeout
    #[error("stream timed out after {0:?}")]
    Timeout(Duration),

    /// Owner cancelled the stream
    #[error("stream cancelled")]
    Cancelled,

    /// Reading the response body failed
    #[error("stream read failed: {0}")]
    Transport(String),

    /// Model server reported an error mid-stream
    #[error("upstream error: {0}")]
    Upstream(String),
}

/// One incremental unit of a streamed response
///
/// A chunk with `error` set, or with `done` set, is the last one.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamChunk {
    /// Content delta
    pub content: String,
    /// Reasoning delta
    pub reasoning: String,
    /// Completed tool call
    pub tool_call: Option<ToolCall>,
    /// Why generation stopped
    pub finish_reason: Option<String>,
    /// Terminal failure
    pub error: Option<StreamError>,
    /// Stream finished normally
    pub done: bool,
}

impl StreamChunk {
    /// Content delta
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: text.into(),
            ..Self::default()
        }
    }

    /// Reasoning delta
    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            reasoning: text.into(),
            ..Self::default()
        }
    }

    /// Completed tool call
    #[must_use]
    pub fn tool_call(call: ToolCall) -> Self {
        Self {
            tool_call: Some(call),
            ..Self::default()
        }
    }

    /// Normal end of stream
    #[must_use]
    pub fn done(finish_reason: Option<String>) -> Self {
        Self {
            finish_reason,
            done: true,
            ..Self::default()
        }
    }

    /// Terminal failure
    #[must_use]
    pub fn failed(error: StreamError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    /// Whether no chunk follows this one
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.done || self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serialization() {
        let json = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "hi"}));

        let json = serde_json::to_value(ChatMessage::tool_result("t1", "42")).unwrap();
        assert_eq!(json["tool_call_id"], "t1");
        assert_eq!(json["role"], "tool");
    }

    #[test]
    fn test_parse_arguments() {
        let call = ToolCall::function("t1", "add", r#"{"x":1}"#);
        assert_eq!(call.parse_arguments().unwrap()["x"], 1);

        let empty = ToolCall::function("t2", "now", "");
        assert!(empty.parse_arguments().unwrap().is_empty());

        let broken = ToolCall::function("t3", "add", r#"{"x":"#);
        assert!(broken.parse_arguments().is_err());
    }

    #[test]
    fn test_terminal_chunks() {
        assert!(StreamChunk::done(None).is_terminal());
        assert!(StreamChunk::failed(StreamError::Cancelled).is_terminal());
        assert!(!StreamChunk::content("a").is_terminal());
    }
}
