//! JSON framing of relay messages.
//!
//! Outbound events are `{"event", "data", "ack"?}`; the relay answers a
//! numbered event with `{"ack", "data"}` and pushes its own events as
//! `{"event", "data"}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RelayWsError;

/// A text frame received from the relay.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WireFrame {
    Event {
        event: String,
        #[serde(default)]
        data: Value,
    },
    Ack {
        ack: u64,
        #[serde(default)]
        data: Value,
    },
}

#[derive(Serialize)]
struct OutgoingEvent<'a> {
    event: &'a str,
    data: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    ack: Option<u64>,
}

/// Encode an outbound event, numbered when an acknowledgement is expected.
///
/// # Errors
///
/// Returns [`RelayWsError::Frame`] when the payload cannot be serialized.
pub fn encode(event: &str, data: &Value, ack: Option<u64>) -> Result<String, RelayWsError> {
    serde_json::to_string(&OutgoingEvent { event, data, ack }).map_err(RelayWsError::Frame)
}

/// Decode a text frame from the relay.
///
/// # Errors
///
/// Returns [`RelayWsError::Frame`] for invalid JSON or an unknown shape.
pub fn decode(text: &str) -> Result<WireFrame, RelayWsError> {
    serde_json::from_str(text).map_err(RelayWsError::Frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn should_omit_ack_for_fire_and_forget_events() {
        let text = encode("state_changed", &json!({"value": 1}), None).unwrap();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, json!({"event": "state_changed", "data": {"value": 1}}));
    }

    #[test]
    fn should_number_events_expecting_ack() {
        let text = encode("state_changed", &json!({}), Some(7)).unwrap();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["ack"], json!(7));
    }

    #[test]
    fn should_decode_event_and_ack_frames() {
        assert_eq!(
            decode(r#"{"event":"command","data":{"type":"get_devices"}}"#).unwrap(),
            WireFrame::Event {
                event: "command".to_string(),
                data: json!({"type": "get_devices"}),
            }
        );
        assert_eq!(
            decode(r#"{"ack":3,"data":{"ok":true}}"#).unwrap(),
            WireFrame::Ack {
                ack: 3,
                data: json!({"ok": true}),
            }
        );
    }

    #[test]
    fn should_default_missing_data_to_null() {
        assert_eq!(
            decode(r#"{"event":"location_sync_completed"}"#).unwrap(),
            WireFrame::Event {
                event: "location_sync_completed".to_string(),
                data: Value::Null,
            }
        );
    }

    #[test]
    fn should_reject_unknown_shapes() {
        assert!(decode(r#"{"hello":"world"}"#).is_err());
        assert!(decode("not json").is_err());
    }
}
