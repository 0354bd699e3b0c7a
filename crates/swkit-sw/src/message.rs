//! Page → coordinator control messages.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A control message posted by a page. Fire-and-forget: nothing is sent back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Activate the waiting version now instead of waiting for pages to close.
    #[serde(rename = "SKIP_WAITING")]
    SkipWaiting,
}

impl ClientMessage {
    /// Decode a posted value; `None` for anything unrecognized.
    pub fn decode(data: &JsonValue) -> Option<Self> {
        serde_json::from_value(data.clone()).ok()
    }

    pub fn to_value(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_skip_waiting() {
        assert_eq!(
            ClientMessage::decode(&json!({ "type": "SKIP_WAITING" })),
            Some(ClientMessage::SkipWaiting)
        );
    }

    #[test]
    fn test_decode_unknown() {
        assert_eq!(ClientMessage::decode(&json!({ "type": "CLEAR_CACHE" })), None);
        assert_eq!(ClientMessage::decode(&json!("SKIP_WAITING")), None);
    }

    #[test]
    fn test_encode() {
        assert_eq!(
            ClientMessage::SkipWaiting.to_value(),
            json!({ "type": "SKIP_WAITING" })
        );
    }
}
