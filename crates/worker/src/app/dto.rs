//! Push delivery envelope.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    /// Base64-encoded JSON payload.
    pub data: String,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub delivery_attempt: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEnvelope {
    pub message: PushMessage,
    #[serde(default)]
    pub subscription: Option<String>,
    /// Some brokers put the attempt counter next to the message.
    #[serde(default)]
    pub delivery_attempt: Option<u32>,
}

impl PushEnvelope {
    pub fn decode_data(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(self.message.data.trim())
    }

    /// 1 when the broker does not report it.
    pub fn delivery_attempt(&self) -> u32 {
        self.message
            .delivery_attempt
            .or(self.delivery_attempt)
            .unwrap_or(1)
            .max(1)
    }

    pub fn encode(payload: &[u8], message_id: impl Into<String>) -> Self {
        Self {
            message: PushMessage {
                data: STANDARD.encode(payload),
                message_id: Some(message_id.into()),
                attributes: HashMap::new(),
                delivery_attempt: None,
            },
            subscription: None,
            delivery_attempt: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_broker_envelope() {
        let raw = json!({
            "message": {
                "data": STANDARD.encode(br#"{"a":1}"#),
                "messageId": "m-1",
                "attributes": {"source": "api"}
            },
            "subscription": "projects/p/subscriptions/content",
            "deliveryAttempt": 3
        });
        let env: PushEnvelope = serde_json::from_value(raw).unwrap();
        assert_eq!(env.message.message_id.as_deref(), Some("m-1"));
        assert_eq!(env.decode_data().unwrap(), br#"{"a":1}"#.to_vec());
        assert_eq!(env.delivery_attempt(), 3);
    }

    #[test]
    fn message_level_attempt_wins() {
        let mut env = PushEnvelope::encode(b"{}", "m-2");
        assert_eq!(env.delivery_attempt(), 1);
        env.delivery_attempt = Some(2);
        env.message.delivery_attempt = Some(4);
        assert_eq!(env.delivery_attempt(), 4);
    }

    #[test]
    fn bad_base64_is_an_error() {
        let mut env = PushEnvelope::encode(b"{}", "m-3");
        env.message.data = "%%%".into();
        assert!(env.decode_data().is_err());
    }
}
