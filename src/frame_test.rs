use super::*;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
enum FakeError {
    #[error("visible message")]
    Visible,
    #[error("never shown")]
    Silent,
}

impl ClientError for FakeError {
    fn error_event(&self) -> Option<&'static str> {
        match self {
            Self::Visible => Some("game:error"),
            Self::Silent => None,
        }
    }
}

#[test]
fn new_sets_event_and_timestamp() {
    let frame = Frame::new("room:join", Data::new());
    assert_eq!(frame.event, "room:join");
    assert!(frame.ts > 0);
    assert!(frame.data.is_empty());
}

#[test]
fn with_data_inserts_payload_keys() {
    let frame = Frame::empty("chat:message")
        .with_data("message", "გამარჯობა")
        .with_data("count", 3);
    assert_eq!(frame.data.get("message").and_then(|v| v.as_str()), Some("გამარჯობა"));
    assert_eq!(frame.data.get("count").and_then(serde_json::Value::as_i64), Some(3));
}

#[test]
fn prefix_splits_on_first_colon() {
    assert_eq!(Frame::empty("room:join").prefix(), "room");
    assert_eq!(Frame::empty("noprefix").prefix(), "noprefix");
}

#[test]
fn from_error_visible_carries_message() {
    let frame = Frame::from_error(&FakeError::Visible).expect("visible error should map to a frame");
    assert_eq!(frame.event, "game:error");
    assert_eq!(frame.data.get("message").and_then(|v| v.as_str()), Some("visible message"));
}

#[test]
fn from_error_silent_maps_to_none() {
    assert!(Frame::from_error(&FakeError::Silent).is_none());
}

#[test]
fn from_view_flattens_object() {
    #[derive(serde::Serialize)]
    struct View {
        code: String,
        count: u32,
    }
    let frame = Frame::from_view("room:update", &View { code: "AB2CD".into(), count: 4 });
    assert_eq!(frame.data.get("code").and_then(|v| v.as_str()), Some("AB2CD"));
    assert_eq!(frame.data.get("count").and_then(serde_json::Value::as_u64), Some(4));
}

#[test]
fn deserializes_inbound_json_with_defaults() {
    let frame: Frame = serde_json::from_str(r#"{"event":"player:ready","data":{"ready":true}}"#)
        .expect("inbound frame should parse");
    assert_eq!(frame.event, "player:ready");
    assert_eq!(frame.ts, 0);
    assert_eq!(frame.data.get("ready"), Some(&json!(true)));
}

#[test]
fn rejects_frame_without_event() {
    let result: Result<Frame, _> = serde_json::from_str(r#"{"data":{}}"#);
    assert!(result.is_err());
}

#[test]
fn serializes_round_trip() {
    let frame = Frame::empty("sticks:result").with_data("letter", "ა");
    let json = serde_json::to_string(&frame).expect("frame should serialize");
    let restored: Frame = serde_json::from_str(&json).expect("frame should parse back");
    assert_eq!(restored.event, frame.event);
    assert_eq!(restored.data.get("letter").and_then(|v| v.as_str()), Some("ა"));
}
