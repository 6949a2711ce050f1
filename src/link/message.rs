use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Message kind on the link wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Plain,
    PlainWithRetain,
    Ack,
}

/// Link envelope
///
/// `id` identifies the message within one client; the producer keeps it unique.
/// An `Ack` carries the id of the message it acknowledges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    #[serde(default)]
    pub qos: u32,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub payload: Bytes,
}

impl Message {
    /// Plain QoS 0 message stamped with the current time
    pub fn new(id: u64, topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            timestamp: now_millis(),
            qos: 0,
            kind: MessageKind::Plain,
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    pub fn with_qos(mut self, qos: u32) -> Self {
        self.qos = qos;
        self
    }

    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }

    /// Acknowledgment for this message
    pub fn ack(&self) -> Self {
        Self {
            id: self.id,
            timestamp: now_millis(),
            qos: self.qos,
            kind: MessageKind::Ack,
            topic: self.topic.clone(),
            payload: Bytes::new(),
        }
    }

    pub fn is_ack(&self) -> bool {
        self.kind == MessageKind::Ack
    }
}

fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::JsonCodec;

    #[test]
    fn test_new_message_defaults() {
        let message = Message::new(7, "a/b", "payload");
        assert_eq!(message.id, 7);
        assert_eq!(message.qos, 0);
        assert_eq!(message.kind, MessageKind::Plain);
        assert_eq!(message.payload, Bytes::from("payload"));
        assert!(message.timestamp > 0);
    }

    #[test]
    fn test_ack_mirrors_id() {
        let message = Message::new(42, "t", "x").with_qos(1);
        let ack = message.ack();
        assert!(ack.is_ack());
        assert_eq!(ack.id, 42);
        assert_eq!(ack.qos, 1);
        assert!(ack.payload.is_empty());
    }

    #[test]
    fn test_sparse_wire_message_decodes() {
        let message: Message = JsonCodec::decode(br#"{"id":3,"timestamp":10}"#).unwrap();
        assert_eq!(message.kind, MessageKind::Plain);
        assert!(message.topic.is_empty());
    }

    #[test]
    fn test_kind_wire_names() {
        let message = Message::new(1, "t", "").with_kind(MessageKind::PlainWithRetain);
        let value: serde_json::Value =
            serde_json::from_slice(&JsonCodec::encode(&message).unwrap()).unwrap();
        assert_eq!(value["kind"], "plain_with_retain");
    }
}
