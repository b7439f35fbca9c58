//! Integration tests for the streaming path
//!
//! These tests wire several components together the way an embedding
//! service would:
//! - model gateway streaming into the answer relay, fanned out to a subscriber
//! - a conversation session recording both sides of an exchange
//! - the gateway's circuit breaker shedding load from a failing model server

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use relay_core::llm::{ChatMessage, LlmConfig, ModelGateway};
use relay_core::protocol::{Envelope, MessageBody, MessageType, SubscribeAck};
use relay_core::resilience::{CircuitState, ResilienceConfig, RetryConfig, ServiceError};
use relay_core::session::{
    ConversationSession, InMemoryConversations, InMemoryMessages, MessageRole, SequentialIds,
};
use relay_core::subscription::{SubscriptionConfig, SubscriptionManager};
use relay_core::transport::InProcessTransport;
use relay_core::AnswerRelay;

use pretty_assertions::assert_eq;

// =============================================================================
// Helpers
// =============================================================================

fn sse_body(deltas: &[&str]) -> Vec<u8> {
    let mut body = String::new();
    for delta in deltas {
        let payload = serde_json::json!({"choices": [{"delta": {"content": delta}}]});
        body.push_str(&format!("data: {payload}\n\n"));
    }
    body.push_str("data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n");
    body.push_str("data: [DONE]\n\n");
    body.into_bytes()
}

async fn model_server(deltas: &[&str]) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_bytes(sse_body(deltas)),
        )
        .mount(&server)
        .await;
    server
}

fn gateway_for(server: &MockServer, resilience: ResilienceConfig) -> ModelGateway {
    ModelGateway::new(LlmConfig {
        base_url: server.uri(),
        model: "test-model".to_string(),
        resilience,
        ..LlmConfig::default()
    })
    .unwrap()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// =============================================================================
// Test 1: Streamed answer reaches a subscriber
// =============================================================================

/// A streamed completion is relayed as sentences and delivered, in order, to
/// a handler registered on a subscribed conversation.
///
/// Two in-process connections stand in for the server: the relay publishes
/// on one, and whatever it publishes is forwarded to the subscriber on the
/// other.
#[tokio::test]
async fn test_streamed_answer_reaches_subscriber() {
    let server = model_server(&["Hello there. ", "How can I ", "help?"]).await;
    let gateway = gateway_for(&server, ResilienceConfig::default());

    // publishing side
    let (out_transport, _out_feeds, mut publisher_peer) = InProcessTransport::new_pair();
    let relay = AnswerRelay::new(Arc::new(out_transport));

    // subscribing side
    let (in_transport, in_feeds, mut subscriber_peer) = InProcessTransport::new_pair();
    let manager = SubscriptionManager::new(
        Arc::new(in_transport),
        in_feeds,
        SubscriptionConfig::default(),
    );

    let received: Arc<Mutex<Vec<Envelope>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    manager.add_handler("c1", move |envelope: &Envelope| {
        sink.lock().push(envelope.clone());
        Ok(())
    });

    let (ack, ()) = tokio::join!(manager.subscribe("c1", None), async {
        let request = subscriber_peer.recv_envelope().await.unwrap().unwrap();
        assert_eq!(request.message_type, MessageType::SUBSCRIBE);
        let ack = Envelope::new(
            "c1",
            SubscribeAck {
                conversation_id: "c1".to_string(),
                success: true,
                error: None,
                missed_messages: 0,
            },
        );
        subscriber_peer.send_envelope(&ack).await.unwrap();
    });
    assert!(ack.unwrap().success);

    let stream = gateway
        .chat_stream(&[ChatMessage::user("hi")])
        .await
        .unwrap();
    let text = relay.relay("c1", "m2", Some("m1"), stream).await.unwrap();
    assert_eq!(text, "Hello there. How can I help?");

    let mut forwarded = 0;
    while let Some(envelope) = publisher_peer.try_recv_envelope() {
        subscriber_peer.send_envelope(&envelope).await.unwrap();
        forwarded += 1;
    }
    wait_until(|| received.lock().len() == forwarded).await;

    let received = received.lock();
    let types: Vec<MessageType> = received.iter().map(|e| e.message_type).collect();
    assert_eq!(
        types,
        [
            MessageType::START_ANSWER,
            MessageType::ASSISTANT_SENTENCE,
            MessageType::ASSISTANT_SENTENCE,
            MessageType::GENERATION_COMPLETE,
        ]
    );
    match &received[2].body {
        Some(MessageBody::AssistantSentence(sentence)) => {
            assert_eq!(sentence.text, "How can I help?");
            assert_eq!(sentence.sequence, 2);
            assert!(sentence.is_final);
        }
        other => panic!("expected final sentence, got {other:?}"),
    }

    // the relay task is gone once the answer is published
    wait_until(|| gateway.active_relays() == 0).await;
}

// =============================================================================
// Test 2: Session records a full exchange
// =============================================================================

/// User message, streamed reply and the next user message form one chain
/// with strictly increasing sequence numbers.
#[tokio::test]
async fn test_session_records_streamed_exchange() {
    let server = model_server(&["Paris is the capital."]).await;
    let gateway = gateway_for(&server, ResilienceConfig::default());
    let (transport, _feeds, _peer) = InProcessTransport::new_pair();
    let relay = AnswerRelay::new(Arc::new(transport));

    let mut session = ConversationSession::new(
        Arc::new(InMemoryConversations::new()),
        Arc::new(InMemoryMessages::new()),
        Arc::new(SequentialIds::new()),
    );
    session.start_new("Geography").await.unwrap();
    let conversation_id = session.conversation_id().unwrap().to_string();

    let question = session.send("What is the capital of France?").await.unwrap();

    let prompt: Vec<ChatMessage> = session
        .history()
        .iter()
        .map(|m| match m.role {
            MessageRole::User => ChatMessage::user(&m.content),
            MessageRole::Assistant => ChatMessage::assistant(&m.content),
            MessageRole::System => ChatMessage::system(&m.content),
        })
        .collect();
    let stream = gateway.chat_stream(&prompt).await.unwrap();
    let answer_text = relay
        .relay(&conversation_id, "pending", Some(&question.id), stream)
        .await
        .unwrap();

    let answer = session.add_assistant_message(&answer_text, None).await.unwrap();
    let follow_up = session.send("And of Spain?").await.unwrap();

    assert_eq!(answer.previous_id.as_deref(), Some(question.id.as_str()));
    assert_eq!(follow_up.previous_id.as_deref(), Some(answer.id.as_str()));
    assert!(question.sequence < answer.sequence && answer.sequence < follow_up.sequence);
    assert_eq!(answer.content, "Paris is the capital.");
    assert_eq!(session.history().len(), 3);
}

// =============================================================================
// Test 3: Breaker sheds load from a failing model server
// =============================================================================

/// Five consecutive failures open the breaker; the sixth call fails fast
/// without reaching the server.
#[tokio::test]
async fn test_breaker_opens_after_repeated_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(5)
        .mount(&server)
        .await;

    let resilience = ResilienceConfig {
        retry: RetryConfig::disabled(),
        ..ResilienceConfig::default()
    };
    let gateway = gateway_for(&server, resilience);
    let messages = [ChatMessage::user("hi")];

    for _ in 0..5 {
        let err = gateway.chat(&messages).await.unwrap_err();
        assert_eq!(err.status(), Some(503));
    }
    assert_eq!(gateway.resilience().breaker().state(), CircuitState::Open);

    let err = gateway.chat(&messages).await.unwrap_err();
    assert!(matches!(err, ServiceError::CircuitOpen { .. }));

    let err = gateway.chat_stream(&messages).await.unwrap_err();
    assert!(matches!(err, ServiceError::CircuitOpen { .. }));
    // MockServer verifies the expected request count on drop
}
