//! Answer Relay
//!
//! Turns one streamed model response into the envelopes a subscriber sees:
//!
//! ```text
//! StartAnswer
//!   ReasoningStep*  AssistantSentence*  ToolUseRequest*   (interleaved as produced)
//! GenerationComplete{success: true}
//!   or
//! Error, GenerationComplete{success: false}
//! ```
//!
//! The last sentence is held back until the stream ends so it can carry
//! `isFinal`.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use thiserror::Error;

use crate::llm::{StreamChunk, StreamError, ToolCall};
use crate::protocol::{
    self, AssistantSentence, EncodingError, Envelope, ErrorMessage, GenerationComplete,
    MessageBody, ReasoningStep, StartAnswer, ToolUseRequest,
};
use crate::transport::{Transport, TransportError};

use super::sentence::SentenceSplitter;

/// Failure while relaying an answer
#[derive(Debug, Error)]
pub enum AnswerError {
    /// An envelope could not be encoded
    #[error("failed to encode answer envelope: {0}")]
    Encoding(#[from] EncodingError),

    /// The connection refused a frame
    #[error("failed to send answer envelope: {0}")]
    Transport(#[from] TransportError),

    /// The model stream ended in failure; subscribers were told
    #[error("generation failed: {0}")]
    Stream(#[from] StreamError),
}

/// Publishes streamed answers over a transport
#[derive(Clone)]
pub struct AnswerRelay {
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for AnswerRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerRelay")
            .field("connected", &self.transport.is_connected())
            .finish()
    }
}

impl AnswerRelay {
    /// Relay over the given transport
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Publish `stream` as answer `message_id` and return its full text
    ///
    /// The stream is dropped on return, which cancels a
    /// [`ChatStream`](crate::llm::ChatStream) relay that is still running.
    ///
    /// # Errors
    ///
    /// - [`AnswerError::Stream`] if the model failed; `Error` and a failed
    ///   `GenerationComplete` were already sent
    /// - [`AnswerError::Encoding`] or [`AnswerError::Transport`] if an
    ///   envelope could not be delivered
    pub async fn relay<S>(
        &self,
        conversation_id: &str,
        message_id: &str,
        previous_id: Option<&str>,
        mut stream: S,
    ) -> Result<String, AnswerError>
    where
        S: Stream<Item = StreamChunk> + Unpin,
    {
        let mut answer = Answer::new(conversation_id, message_id, previous_id);
        tracing::debug!(conversation_id, message_id, "Answer started");
        self.send(
            conversation_id,
            StartAnswer {
                message_id: message_id.to_string(),
                conversation_id: conversation_id.to_string(),
                previous_id: previous_id.map(str::to_string),
            },
        )
        .await?;

        while let Some(chunk) = stream.next().await {
            if let Some(error) = chunk.error {
                return self.fail(answer, error).await;
            }

            if !chunk.reasoning.is_empty() {
                let step = answer.reasoning_step(chunk.reasoning);
                self.send(conversation_id, step).await?;
            }

            if !chunk.content.is_empty() {
                for sentence in answer.push_content(&chunk.content) {
                    self.send(conversation_id, sentence).await?;
                }
            }

            if let Some(call) = chunk.tool_call {
                let request = answer.tool_request(call);
                tracing::debug!(tool = %request.tool_name, message_id, "Tool use requested");
                self.send(conversation_id, request).await?;
            }

            if chunk.done {
                return self.complete(answer).await;
            }
        }

        // relay ended without a terminal chunk
        self.fail(answer, StreamError::Cancelled).await
    }

    async fn complete(&self, mut answer: Answer) -> Result<String, AnswerError> {
        for sentence in answer.finish_content() {
            self.send(&answer.conversation_id, sentence).await?;
        }
        self.send(
            &answer.conversation_id,
            GenerationComplete {
                message_id: answer.message_id.clone(),
                conversation_id: answer.conversation_id.clone(),
                success: true,
                error: None,
            },
        )
        .await?;

        tracing::info!(
            conversation_id = %answer.conversation_id,
            message_id = %answer.message_id,
            sentences = answer.sentence_seq,
            chars = answer.text.len(),
            "Answer complete"
        );
        Ok(answer.text)
    }

    async fn fail(&self, mut answer: Answer, error: StreamError) -> Result<String, AnswerError> {
        tracing::warn!(
            conversation_id = %answer.conversation_id,
            message_id = %answer.message_id,
            error = %error,
            "Answer failed"
        );

        for sentence in answer.flush_partial() {
            self.send(&answer.conversation_id, sentence).await?;
        }
        self.send(
            &answer.conversation_id,
            ErrorMessage {
                code: error_code(&error).to_string(),
                message: error.to_string(),
                message_id: Some(answer.message_id.clone()),
                conversation_id: Some(answer.conversation_id.clone()),
            },
        )
        .await?;
        self.send(
            &answer.conversation_id,
            GenerationComplete {
                message_id: answer.message_id.clone(),
                conversation_id: answer.conversation_id.clone(),
                success: false,
                error: Some(error.to_string()),
            },
        )
        .await?;

        Err(AnswerError::Stream(error))
    }

    async fn send(
        &self,
        conversation_id: &str,
        body: impl Into<MessageBody>,
    ) -> Result<(), AnswerError> {
        let frame = protocol::encode_frame(&Envelope::new(conversation_id, body))?;
        self.transport.send(frame).await?;
        Ok(())
    }
}

fn error_code(error: &StreamError) -> &'static str {
    match error {
        StreamError::Timeout(_) => "generation_timeout",
        StreamError::Cancelled => "generation_cancelled",
        StreamError::Transport(_) => "stream_failed",
        StreamError::Upstream(_) => "upstream_error",
    }
}

/// Per-answer bookkeeping
struct Answer {
    conversation_id: String,
    message_id: String,
    previous_id: String,
    splitter: SentenceSplitter,
    held: Option<String>,
    sentence_seq: u32,
    reasoning_seq: u32,
    tool_seq: u32,
    text: String,
}

impl Answer {
    fn new(conversation_id: &str, message_id: &str, previous_id: Option<&str>) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            message_id: message_id.to_string(),
            previous_id: previous_id.unwrap_or_default().to_string(),
            splitter: SentenceSplitter::new(),
            held: None,
            sentence_seq: 0,
            reasoning_seq: 0,
            tool_seq: 0,
            text: String::new(),
        }
    }

    fn push_content(&mut self, delta: &str) -> Vec<AssistantSentence> {
        self.text.push_str(delta);
        let mut ready = Vec::new();
        for sentence in self.splitter.push(delta) {
            if let Some(previous) = self.held.replace(sentence) {
                ready.push(self.sentence(previous, false));
            }
        }
        ready
    }

    fn finish_content(&mut self) -> Vec<AssistantSentence> {
        let mut ready = Vec::new();
        if let Some(tail) = self.splitter.finish() {
            if let Some(previous) = self.held.replace(tail) {
                ready.push(self.sentence(previous, false));
            }
        }
        if let Some(last) = self.held.take() {
            ready.push(self.sentence(last, true));
        }
        ready
    }

    fn flush_partial(&mut self) -> Vec<AssistantSentence> {
        let pending: Vec<String> = self
            .held
            .take()
            .into_iter()
            .chain(self.splitter.finish())
            .collect();
        pending
            .into_iter()
            .map(|text| self.sentence(text, false))
            .collect()
    }

    fn sentence(&mut self, text: String, is_final: bool) -> AssistantSentence {
        self.sentence_seq += 1;
        AssistantSentence {
            id: Some(format!("{}-s{}", self.message_id, self.sentence_seq)),
            message_id: self.message_id.clone(),
            previous_id: self.previous_id.clone(),
            conversation_id: self.conversation_id.clone(),
            sequence: self.sentence_seq,
            text,
            is_final,
        }
    }

    fn reasoning_step(&mut self, content: String) -> ReasoningStep {
        self.reasoning_seq += 1;
        ReasoningStep {
            id: format!("{}-r{}", self.message_id, self.reasoning_seq),
            message_id: self.message_id.clone(),
            conversation_id: self.conversation_id.clone(),
            sequence: self.reasoning_seq,
            content,
        }
    }

    fn tool_request(&mut self, call: ToolCall) -> ToolUseRequest {
        self.tool_seq += 1;
        let arguments = call.parse_arguments().unwrap_or_else(|e| {
            tracing::warn!(
                tool = %call.function.name,
                error = %e,
                "Tool arguments are not a JSON object, sending none"
            );
            serde_json::Map::new()
        });
        let id = if call.id.is_empty() {
            format!("{}-t{}", self.message_id, self.tool_seq)
        } else {
            call.id
        };

        ToolUseRequest {
            id,
            message_id: self.message_id.clone(),
            conversation_id: self.conversation_id.clone(),
            tool_name: call.function.name,
            arguments,
            execution: None,
        }
    }
}
