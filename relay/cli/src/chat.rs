//! Interactive chat loop
//!
//! Reads one prompt per line from stdin, records it in an in-memory
//! conversation session and prints the model's reply. `/quit` or EOF ends
//! the session; Ctrl-C cancels a reply mid-stream.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use relay_core::llm::{ChatMessage, ChatStream, ModelGateway};
use relay_core::session::{
    ConversationSession, InMemoryConversations, InMemoryMessages, Message, MessageRole, UuidIds,
};
use relay_core::RelayConfig;

/// How the chat loop should behave
#[derive(Debug, Clone)]
pub struct ChatOptions {
    /// Conversation title
    pub title: String,
    /// Stream replies as they are generated
    pub stream: bool,
    /// Print reasoning deltas
    pub show_reasoning: bool,
}

/// A finished model reply
#[derive(Debug, Default)]
struct Reply {
    content: String,
    reasoning: String,
    interrupted: bool,
}

fn to_prompt(history: &[Message]) -> Vec<ChatMessage> {
    history
        .iter()
        .map(|m| match m.role {
            MessageRole::User => ChatMessage::user(&m.content),
            MessageRole::Assistant => ChatMessage::assistant(&m.content),
            MessageRole::System => ChatMessage::system(&m.content),
        })
        .collect()
}

/// Run the interactive loop until EOF or `/quit`
pub async fn run(config: &RelayConfig, options: ChatOptions) -> Result<()> {
    let gateway =
        ModelGateway::new(config.llm_config()).context("Failed to create model gateway")?;
    let mut session = ConversationSession::new(
        Arc::new(InMemoryConversations::new()),
        Arc::new(InMemoryMessages::new()),
        Arc::new(UuidIds),
    )
    .with_history_limit(config.history_limit);

    session
        .start_new(&options.title)
        .await
        .context("Failed to start conversation")?;

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    eprintln!(
        "Chatting with {} at {} (/quit to exit)",
        config.llm.model, config.llm.base_url
    );

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }

        session
            .send(line)
            .await
            .context("Failed to record message")?;
        let prompt = to_prompt(session.history());

        let reply = if options.stream {
            match gateway.chat_stream(&prompt).await {
                Ok(stream) => print_stream(stream, &mut stdout, options.show_reasoning).await?,
                Err(e) => {
                    eprintln!("error: {e}");
                    continue;
                }
            }
        } else {
            match gateway.chat(&prompt).await {
                Ok(response) => {
                    stdout.write_all(response.content.as_bytes()).await?;
                    stdout.write_all(b"\n").await?;
                    Reply {
                        content: response.content,
                        reasoning: response.reasoning.unwrap_or_default(),
                        interrupted: false,
                    }
                }
                Err(e) => {
                    eprintln!("error: {e}");
                    continue;
                }
            }
        };

        if reply.interrupted {
            debug!("Reply interrupted, not recorded");
            continue;
        }
        let reasoning = (!reply.reasoning.is_empty()).then_some(reply.reasoning);
        if let Err(e) = session.add_assistant_message(&reply.content, reasoning).await {
            warn!(error = %e, "Failed to record reply");
        }
    }

    session.close();
    Ok(())
}

/// Print a streamed reply, cancelling it on Ctrl-C
async fn print_stream(
    mut stream: ChatStream,
    stdout: &mut tokio::io::Stdout,
    show_reasoning: bool,
) -> Result<Reply> {
    let mut reply = Reply::default();

    loop {
        let chunk = tokio::select! {
            chunk = stream.next_chunk() => chunk,
            _ = tokio::signal::ctrl_c() => {
                stream.cancel();
                eprintln!("\n[cancelled]");
                reply.interrupted = true;
                break;
            }
        };
        let Some(chunk) = chunk else {
            break;
        };

        if show_reasoning && !chunk.reasoning.is_empty() {
            eprint!("{}", chunk.reasoning);
        }
        reply.reasoning.push_str(&chunk.reasoning);

        if !chunk.content.is_empty() {
            stdout.write_all(chunk.content.as_bytes()).await?;
            stdout.flush().await?;
            reply.content.push_str(&chunk.content);
        }
        if let Some(call) = &chunk.tool_call {
            eprintln!("\n[tool call: {}({})]", call.function.name, call.function.arguments);
        }
        if let Some(error) = &chunk.error {
            eprintln!("\nerror: {error}");
            reply.interrupted = true;
            break;
        }
        if chunk.done {
            break;
        }
    }

    stdout.write_all(b"\n").await?;
    Ok(reply)
}
