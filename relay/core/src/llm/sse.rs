//! Server-Sent Events decoding
//!
//! Turns raw response-body bytes into [`StreamChunk`]s. Three layers:
//!
//! 1. [`SseParser`] splits bytes into `data:` payloads (buffering partial
//!    lines and partial UTF-8 sequences across network chunks)
//! 2. [`ToolCallAccumulator`] stitches fragmented tool-call deltas together
//! 3. [`ChunkDecoder`] maps each JSON payload onto chunks and guarantees
//!    exactly one terminal `done` chunk

use serde::Deserialize;

use super::types::{StreamChunk, StreamError, ToolCall};

const DONE_SENTINEL: &str = "[DONE]";

/// One SSE data event
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SseEvent {
    /// JSON payload line
    Data(String),
    /// `[DONE]` sentinel
    Done,
}

/// Line splitter for `text/event-stream` bodies
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    /// Create an empty parser
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed body bytes, returning every complete event
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = parse_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing line that had no newline
    pub fn finish(&mut self) -> Option<SseEvent> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buffer);
        parse_line(&line)
    }
}

fn parse_line(raw: &[u8]) -> Option<SseEvent> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches(['\n', '\r']);

    // comments, blank separators and non-data fields carry nothing for us
    let payload = line.strip_prefix("data:")?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);

    if payload.trim() == DONE_SENTINEL {
        Some(SseEvent::Done)
    } else if payload.trim().is_empty() {
        None
    } else {
        Some(SseEvent::Data(payload.to_string()))
    }
}

/// Incremental tool-call fragment
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ToolCallDelta {
    /// Position of the call in the response
    #[serde(default)]
    pub index: Option<u32>,
    /// Present only on the first fragment of a call
    #[serde(default)]
    pub id: Option<String>,
    /// Name and argument fragments
    #[serde(default)]
    pub function: FunctionDelta,
}

/// Function name/argument fragments
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct FunctionDelta {
    /// Function name fragment
    #[serde(default)]
    pub name: Option<String>,
    /// Argument fragment
    #[serde(default)]
    pub arguments: Option<String>,
}

impl ToolCallDelta {
    /// Fragment opening a new call
    pub fn start(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            index: None,
            id: Some(id.into()),
            function: FunctionDelta {
                name: Some(name.into()),
                arguments: Some(arguments.into()),
            },
        }
    }

    /// Fragment continuing the current call
    pub fn continuation(arguments: impl Into<String>) -> Self {
        Self {
            function: FunctionDelta {
                name: None,
                arguments: Some(arguments.into()),
            },
            ..Self::default()
        }
    }
}

/// Stitches tool-call deltas into complete calls
///
/// A delta with a non-empty id starts a new call and flushes the previous
/// one; a delta without an id extends the current call.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    current: Option<ToolCall>,
}

impl ToolCallAccumulator {
    /// Create an empty accumulator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one delta; returns the previous call if this delta completed it
    pub fn push(&mut self, delta: &ToolCallDelta) -> Option<ToolCall> {
        let name = delta.function.name.as_deref().unwrap_or_default();
        let arguments = delta.function.arguments.as_deref().unwrap_or_default();

        match delta.id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => self.current.replace(ToolCall::function(id, name, arguments)),
            None => {
                match self.current.as_mut() {
                    Some(call) => {
                        call.function.name.push_str(name);
                        call.function.arguments.push_str(arguments);
                    }
                    None => {
                        tracing::debug!("Tool-call fragment without an id, starting anonymous call");
                        self.current = Some(ToolCall::function("", name, arguments));
                    }
                }
                None
            }
        }
    }

    /// Take the pending call, if any
    pub fn finish(&mut self) -> Option<ToolCall> {
        self.current.take()
    }

    /// Whether a call is being accumulated
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.current.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct StreamPayload {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

/// Bytes-in, chunks-out decoder for one streamed completion
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    parser: SseParser,
    tools: ToolCallAccumulator,
    finished: bool,
}

impl ChunkDecoder {
    /// Create a decoder for a fresh stream
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the terminal chunk has been produced
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed body bytes
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamChunk> {
        let mut chunks = Vec::new();
        for event in self.parser.push(bytes) {
            self.apply(event, &mut chunks);
        }
        chunks
    }

    /// Body ended; flush whatever is pending and terminate the stream
    pub fn finish(&mut self) -> Vec<StreamChunk> {
        let mut chunks = Vec::new();
        if let Some(event) = self.parser.finish() {
            self.apply(event, &mut chunks);
        }
        if !self.finished {
            self.complete(None, &mut chunks);
        }
        chunks
    }

    fn apply(&mut self, event: SseEvent, out: &mut Vec<StreamChunk>) {
        if self.finished {
            return;
        }

        let data = match event {
            SseEvent::Done => {
                self.complete(None, out);
                return;
            }
            SseEvent::Data(data) => data,
        };

        let payload: StreamPayload = match serde_json::from_str(&data) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed stream payload");
                return;
            }
        };

        if let Some(error) = payload.error {
            let message = error
                .get("message")
                .and_then(serde_json::Value::as_str)
                .map_or_else(|| error.to_string(), str::to_string);
            out.push(StreamChunk::failed(StreamError::Upstream(message)));
            self.finished = true;
            return;
        }

        for choice in payload.choices {
            let delta = choice.delta;

            if let Some(reasoning) = delta.reasoning_content.or(delta.reasoning) {
                if !reasoning.is_empty() {
                    out.push(StreamChunk::reasoning(reasoning));
                }
            }
            if let Some(content) = delta.content {
                if !content.is_empty() {
                    out.push(StreamChunk::content(content));
                }
            }
            for fragment in &delta.tool_calls {
                if let Some(done) = self.tools.push(fragment) {
                    out.push(StreamChunk::tool_call(done));
                }
            }

            if let Some(reason) = choice.finish_reason.filter(|r| !r.is_empty()) {
                self.complete(Some(reason), out);
                return;
            }
        }
    }

    fn complete(&mut self, reason: Option<String>, out: &mut Vec<StreamChunk>) {
        if let Some(call) = self.tools.finish() {
            out.push(StreamChunk::tool_call(call));
        }
        out.push(StreamChunk::done(reason));
        self.finished = true;
    }
}
