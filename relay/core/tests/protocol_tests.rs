//! Wire protocol tests against the public API
//!
//! Every registered type is encoded, framed, split across reads and decoded
//! again; unregistered codes are refused in both directions.

use relay_core::protocol::{
    decode, encode, encode_frame, registry, Acknowledgement, AssistantMessage, AssistantSentence,
    BranchUpdate, ConversationSync, DecodingError, EncodingError, Envelope, ErrorMessage,
    FrameDecoder, GenerationComplete, GenerationRequest, MemoryTrace, MessageBody, MessageType,
    ReasoningStep, SiblingInfo, StartAnswer, Subscribe, SubscribeAck, SyncedMessage,
    ThinkingSummary, TitleUpdate, ToolUseRequest, ToolUseResult, TraceContext, Unsubscribe,
    UnsubscribeAck, UserMessage,
};

use pretty_assertions::assert_eq;
use tokio_test::assert_ok;

fn s(value: &str) -> String {
    value.to_string()
}

fn sibling(id: &str) -> SiblingInfo {
    SiblingInfo {
        id: s(id),
        content: s("alternative answer"),
        created_at: s("2026-01-01T00:00:00Z"),
    }
}

/// One representative body per registered type
fn sample_bodies() -> Vec<MessageBody> {
    let mut arguments = serde_json::Map::new();
    arguments.insert(s("city"), serde_json::json!("Lisbon"));

    vec![
        ErrorMessage {
            code: s("generation_timeout"),
            message: s("stream timed out"),
            message_id: Some(s("m2")),
            conversation_id: Some(s("c1")),
        }
        .into(),
        UserMessage {
            id: s("m1"),
            conversation_id: s("c1"),
            content: s("What's the weather?"),
            previous_id: None,
        }
        .into(),
        AssistantMessage {
            id: s("m2"),
            conversation_id: s("c1"),
            content: s("Sunny."),
            previous_id: Some(s("m1")),
            reasoning: Some(s("checked forecast")),
            timestamp: Some(1_767_225_600_000),
        }
        .into(),
        ReasoningStep {
            id: s("m2-r1"),
            message_id: s("m2"),
            conversation_id: s("c1"),
            sequence: 1,
            content: s("look up the forecast"),
        }
        .into(),
        ToolUseRequest {
            id: s("t1"),
            message_id: s("m2"),
            conversation_id: s("c1"),
            tool_name: s("weather"),
            arguments,
            execution: Some(s("server")),
        }
        .into(),
        ToolUseResult {
            id: s("r1"),
            request_id: s("t1"),
            message_id: Some(s("m2")),
            conversation_id: s("c1"),
            success: true,
            result: Some(serde_json::json!({"temp": 21})),
            error: None,
        }
        .into(),
        Acknowledgement {
            acknowledged_id: Some(s("m1")),
            success: true,
        }
        .into(),
        StartAnswer {
            message_id: s("m2"),
            conversation_id: s("c1"),
            previous_id: Some(s("m1")),
        }
        .into(),
        MemoryTrace {
            id: s("mt1"),
            memory_id: s("mem7"),
            message_id: s("m2"),
            conversation_id: s("c1"),
            content: s("prefers Celsius"),
            relevance: 0.75,
        }
        .into(),
        AssistantSentence {
            id: Some(s("m2-s1")),
            message_id: s("m2"),
            previous_id: s("m1"),
            conversation_id: s("c1"),
            sequence: 1,
            text: s("Sunny."),
            is_final: true,
        }
        .into(),
        ConversationSync {
            conversation_id: s("c1"),
            messages: vec![SyncedMessage {
                id: s("m1"),
                previous_id: None,
                role: s("user"),
                content: s("What's the weather?"),
                sequence: 1,
            }],
            last_sequence: 1,
        }
        .into(),
        GenerationRequest {
            conversation_id: s("c1"),
            message_id: s("m1"),
            previous_id: None,
            request_type: s("send"),
            new_content: None,
            enable_tools: true,
            enable_reasoning: false,
            enable_streaming: true,
            timestamp: None,
        }
        .into(),
        ThinkingSummary {
            id: s("th1"),
            message_id: s("m2"),
            conversation_id: s("c1"),
            content: s("comparing sources"),
            progress: 0.5,
            timestamp: None,
        }
        .into(),
        TitleUpdate {
            conversation_id: s("c1"),
            title: s("Weather"),
        }
        .into(),
        Subscribe {
            conversation_id: s("c1"),
            from_sequence: Some(4),
            agent_mode: false,
            voice_mode: true,
        }
        .into(),
        Unsubscribe {
            conversation_id: s("c1"),
        }
        .into(),
        SubscribeAck {
            conversation_id: s("c1"),
            success: true,
            error: None,
            missed_messages: 2,
        }
        .into(),
        UnsubscribeAck {
            conversation_id: s("c1"),
            success: true,
        }
        .into(),
        BranchUpdate {
            conversation_id: s("c1"),
            parent_message_id: s("m1"),
            new_sibling: sibling("m3"),
            all_siblings: vec![sibling("m2"), sibling("m3")],
            total_count: 2,
        }
        .into(),
        GenerationComplete {
            message_id: s("m2"),
            conversation_id: s("c1"),
            success: true,
            error: None,
        }
        .into(),
    ]
}

#[test]
fn test_samples_cover_the_registry() {
    let mut sampled: Vec<MessageType> = sample_bodies()
        .iter()
        .map(MessageBody::message_type)
        .collect();
    sampled.sort();
    let registered: Vec<MessageType> = registry::entries()
        .iter()
        .map(|e| e.message_type)
        .collect();
    assert_eq!(sampled, registered);
}

#[test]
fn test_every_registered_type_round_trips() {
    for body in sample_bodies() {
        let envelope = Envelope::new("c1", body)
            .with_trace(TraceContext::generate())
            .with_correlation("sess-1", "user-1");

        let bytes = assert_ok!(encode(&envelope));
        let decoded = assert_ok!(decode(&bytes));
        assert_eq!(decoded, envelope, "round trip of {}", envelope.message_type);
    }
}

#[test]
fn test_framed_stream_survives_arbitrary_read_boundaries() {
    let envelopes: Vec<Envelope> = sample_bodies()
        .into_iter()
        .map(|body| Envelope::new("c1", body))
        .collect();
    let wire: Vec<u8> = envelopes
        .iter()
        .flat_map(|e| encode_frame(e).unwrap())
        .collect();

    // awkward read sizes that straddle headers and payloads
    for read_size in [1, 3, 7, 64, 1024] {
        let mut decoder = FrameDecoder::new();
        let mut received = Vec::new();
        for chunk in wire.chunks(read_size) {
            decoder.push(chunk);
            while let Some(payload) = decoder.next_frame().unwrap() {
                received.push(decode(&payload).unwrap());
            }
        }
        assert_eq!(received, envelopes, "read size {read_size}");
    }
}

#[test]
fn test_unknown_type_is_refused_both_ways() {
    let mut envelope = Envelope::new(
        "c1",
        TitleUpdate {
            conversation_id: s("c1"),
            title: s("x"),
        },
    );
    envelope.message_type = MessageType(999);
    assert!(matches!(
        encode(&envelope),
        Err(EncodingError::UnknownType(MessageType(999)))
    ));

    let raw = rmp_serde::to_vec_named(&serde_json::json!({
        "conversationId": "c1",
        "type": 999,
        "body": {},
    }))
    .unwrap();
    assert!(matches!(
        decode(&raw),
        Err(DecodingError::UnknownType(MessageType(999)))
    ));
}

#[test]
fn test_wire_shape_uses_named_msgpack_keys() {
    let envelope = Envelope::new(
        "c1",
        SubscribeAck {
            conversation_id: s("c1"),
            success: false,
            error: Some(s("no such conversation")),
            missed_messages: 0,
        },
    );
    let wire: serde_json::Value = rmp_serde::from_slice(&encode(&envelope).unwrap()).unwrap();

    assert_eq!(wire["conversationId"], "c1");
    assert_eq!(wire["type"], 42);
    assert_eq!(wire["body"]["error"], "no such conversation");
    assert_eq!(wire["body"]["missedMessages"], 0);
    assert!(wire.get("trace_id").is_none());
}
