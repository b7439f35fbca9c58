//! Model Gateway
//!
//! Chat completions against an OpenAI-compatible server, streamed as
//! [`StreamChunk`]s with tool calls reassembled from their fragments.

pub mod gateway;
pub mod sse;
pub mod types;

pub use gateway::{ChatStream, LlmConfig, ModelGateway};
pub use sse::{ChunkDecoder, SseEvent, SseParser, ToolCallAccumulator, ToolCallDelta};
pub use types::{
    ChatMessage, ChatResponse, FunctionCall, Role, StreamChunk, StreamError, Tool, ToolCall,
    ToolFunction,
};
