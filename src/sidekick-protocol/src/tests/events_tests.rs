//! Tests for stream payload parsing.

use pretty_assertions::assert_eq;

use crate::events::{StreamEvent, StreamPayload};

fn event(line: &str) -> Option<StreamEvent> {
    StreamPayload::from_line(line)
        .expect("data line")
        .expect("valid json")
        .into_event()
}

#[test]
fn test_message_line() {
    assert_eq!(
        event(r#"data: {"event": "message", "answer": "Hel", "message_id": "m1"}"#),
        Some(StreamEvent::Message {
            fragment: "Hel".to_string()
        })
    );
}

#[test]
fn test_agent_message_is_a_fragment() {
    assert_eq!(
        event(r#"data: {"event": "agent_message", "answer": "lo"}"#),
        Some(StreamEvent::Message {
            fragment: "lo".to_string()
        })
    );
}

#[test]
fn test_message_end_carries_id() {
    assert_eq!(
        event(r#"data: {"event": "message_end", "message_id": "abc"}"#),
        Some(StreamEvent::MessageEnd {
            message_id: Some("abc".to_string())
        })
    );
}

#[test]
fn test_message_end_id_key() {
    assert_eq!(
        event(r#"data: {"event": "message_end", "id": "msg-1"}"#),
        Some(StreamEvent::MessageEnd {
            message_id: Some("msg-1".to_string())
        })
    );
    assert_eq!(
        event(r#"data: {"event": "message_end", "id": "row-9", "message_id": "msg-1"}"#),
        Some(StreamEvent::MessageEnd {
            message_id: Some("msg-1".to_string())
        })
    );
    assert_eq!(
        event(r#"data: {"event": "message_end"}"#),
        Some(StreamEvent::MessageEnd { message_id: None })
    );
}

#[test]
fn test_error_line_with_and_without_message() {
    assert_eq!(
        event(r#"data: {"event": "error", "message": "quota exceeded", "status": 429}"#),
        Some(StreamEvent::Error {
            message: "quota exceeded".to_string()
        })
    );
    assert_eq!(
        event(r#"data: {"event": "error"}"#),
        Some(StreamEvent::Error {
            message: "Stream error".to_string()
        })
    );
}

#[test]
fn test_unknown_events_are_dropped() {
    assert_eq!(event(r#"data: {"event": "ping"}"#), None);
    assert_eq!(
        event(r#"data: {"event": "workflow_started", "task_id": "t"}"#),
        None
    );
}

#[test]
fn test_lines_without_prefix_are_not_payloads() {
    assert!(StreamPayload::from_line("event: ping").is_none());
    assert!(StreamPayload::from_line("").is_none());
    assert!(StreamPayload::from_line("data:{\"event\":\"message\"}").is_none());
}

#[test]
fn test_carriage_return_is_stripped() {
    assert_eq!(
        event("data: {\"event\": \"message\", \"answer\": \"x\"}\r"),
        Some(StreamEvent::Message {
            fragment: "x".to_string()
        })
    );
}

#[test]
fn test_malformed_json_is_reported() {
    let parsed = StreamPayload::from_line("data: {\"event\": \"message\", ").expect("data line");
    assert!(parsed.is_err());
}

#[test]
fn test_terminal_events() {
    assert!(StreamEvent::End.is_terminal());
    assert!(
        StreamEvent::Error {
            message: String::new()
        }
        .is_terminal()
    );
    assert!(
        !StreamEvent::Message {
            fragment: String::new()
        }
        .is_terminal()
    );
}
