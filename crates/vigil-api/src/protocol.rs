//! Wire frames exchanged with the event bus.
//!
//! Every frame is a single JSON text message. Outbound frames are tagged
//! by `type`; inbound frames are plain topic notifications:
//!
//! ```text
//! → {"type":"subscribe","topic":"front_door/detect/state"}
//! → {"type":"publish","topic":"front_door/detect/set","payload":"ON","retain":false}
//! ← {"topic":"front_door/detect/state","payload":"ON","retain":true}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::Error;

// ── Outbound ─────────────────────────────────────────────────────────

/// A frame the client sends to the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe {
        topic: String,
    },
    Unsubscribe {
        topic: String,
    },
    Publish {
        topic: String,
        payload: serde_json::Value,
        #[serde(default)]
        retain: bool,
    },
}

impl ClientFrame {
    /// The topic this frame addresses.
    pub fn topic(&self) -> &str {
        match self {
            Self::Subscribe { topic } | Self::Unsubscribe { topic } | Self::Publish { topic, .. } => {
                topic
            }
        }
    }

    /// Serialize to the JSON text sent over the socket.
    pub fn encode(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}

// ── Inbound ──────────────────────────────────────────────────────────

/// A value notification received from the bus.
///
/// The payload is opaque: the connection layer never interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    /// Full topic string, e.g. `"front_door/detect/state"`.
    pub topic: String,

    /// Message body. Two-valued features carry `"ON"` / `"OFF"`.
    pub payload: serde_json::Value,

    /// Whether the bus replayed a retained value rather than a live change.
    #[serde(default)]
    pub retain: bool,
}

/// Decode an inbound text frame.
///
/// Frames without a topic or payload are rejected as a whole so that a
/// partial value never reaches subscribers.
pub fn decode_message(text: &str) -> Result<BusMessage, Error> {
    let message: BusMessage = serde_json::from_str(text).map_err(|e| Error::Decode {
        message: e.to_string(),
        body: text.to_owned(),
    })?;

    if message.topic.is_empty() {
        return Err(Error::Decode {
            message: "empty topic".into(),
            body: text.to_owned(),
        });
    }

    Ok(message)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn encode_subscribe_frame() {
        let frame = ClientFrame::Subscribe {
            topic: "front_door/detect/state".into(),
        };
        insta::assert_snapshot!(
            frame.encode().unwrap(),
            @r#"{"type":"subscribe","topic":"front_door/detect/state"}"#
        );
    }

    #[test]
    fn encode_publish_frame() {
        let frame = ClientFrame::Publish {
            topic: "front_door/detect/set".into(),
            payload: serde_json::json!("ON"),
            retain: false,
        };
        insta::assert_snapshot!(
            frame.encode().unwrap(),
            @r#"{"type":"publish","topic":"front_door/detect/set","payload":"ON","retain":false}"#
        );
    }

    #[test]
    fn frame_topic_accessor() {
        let frame = ClientFrame::Unsubscribe {
            topic: "garage/audio/state".into(),
        };
        assert_eq!(frame.topic(), "garage/audio/state");
    }

    #[test]
    fn decode_value_notification() {
        let msg =
            decode_message(r#"{"topic":"front_door/detect/state","payload":"OFF","retain":true}"#)
                .unwrap();
        assert_eq!(msg.topic, "front_door/detect/state");
        assert_eq!(msg.payload, serde_json::json!("OFF"));
        assert!(msg.retain);
    }

    #[test]
    fn decode_defaults_retain_to_false() {
        let msg = decode_message(r#"{"topic":"yard/motion_threshold/state","payload":25}"#).unwrap();
        assert_eq!(msg.payload, serde_json::json!(25));
        assert!(!msg.retain);
    }

    #[test]
    fn decode_rejects_missing_payload() {
        let err = decode_message(r#"{"topic":"front_door/detect/state"}"#).unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }

    #[test]
    fn decode_rejects_empty_topic() {
        let err = decode_message(r#"{"topic":"","payload":"ON"}"#).unwrap_err();
        match err {
            Error::Decode { message, body } => {
                assert_eq!(message, "empty topic");
                assert!(body.contains("\"ON\""));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_message("not json at all").is_err());
    }
}
