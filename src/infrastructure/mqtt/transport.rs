//! Transport port
//!
//! [`Transport`] is the outbound half of the broker connection (publish,
//! subscribe, unsubscribe). [`InboundSink`] is the inbound half: the event
//! loop hands every received message to exactly one sink, one at a time.

use async_trait::async_trait;
use serde_json::Value;

use crate::support::TransportError;

/// A message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    pub fn parse_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// Payload as text, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;
}

pub trait InboundSink: Send + Sync {
    fn on_message(&self, message: InboundMessage);
}

/// Wire form of a JSON value: strings go out verbatim, everything else
/// is serialized.
pub fn encode_payload(value: &Value) -> Result<Vec<u8>, TransportError> {
    match value {
        Value::String(s) => Ok(s.clone().into_bytes()),
        other => serde_json::to_vec(other).map_err(|e| TransportError::Serialization(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_string_verbatim() {
        assert_eq!(encode_payload(&json!("ping")).unwrap(), b"ping".to_vec());
    }

    #[test]
    fn test_encode_object() {
        let bytes = encode_payload(&json!({"action": "get_status"})).unwrap();
        assert_eq!(bytes, br#"{"action":"get_status"}"#.to_vec());
    }

    #[test]
    fn test_inbound_parse_json() {
        let message = InboundMessage::new("MCU/1", br#"{"ok":true}"#.to_vec());
        assert_eq!(message.parse_json().unwrap(), json!({"ok": true}));

        let garbage = InboundMessage::new("MCU/1", b"not json".to_vec());
        assert!(garbage.parse_json().is_err());
        assert_eq!(garbage.text(), "not json");
    }
}
