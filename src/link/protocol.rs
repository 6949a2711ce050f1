use super::message::Message;
use crate::error::{ClientError, CodecError};
use crate::protocol::{Inbound, JsonCodec, Protocol};
use crate::transport::Transport;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Opening frame carrying per-connection credentials
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Link stream rules: messages in both directions, acks classified apart
#[derive(Debug, Clone, Default)]
pub struct LinkProtocol {
    metadata: Option<Metadata>,
}

impl LinkProtocol {
    /// Send credentials at the start of every connection
    ///
    /// Nothing is sent when both values are absent.
    pub fn with_credentials(username: Option<String>, password: Option<String>) -> Self {
        let metadata = (username.is_some() || password.is_some())
            .then_some(Metadata { username, password });
        Self { metadata }
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }
}

#[async_trait]
impl Protocol for LinkProtocol {
    type Frame = Message;

    fn name(&self) -> &'static str {
        "link"
    }

    fn encode(&self, frame: &Message) -> Result<Bytes, CodecError> {
        JsonCodec::encode(frame)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message, CodecError> {
        JsonCodec::decode(bytes)
    }

    async fn handshake(&self, transport: &mut Transport) -> Result<(), ClientError> {
        if let Some(metadata) = &self.metadata {
            transport.write_frame(JsonCodec::encode(metadata)?).await?;
        }
        Ok(())
    }

    fn classify(&self, frame: Message) -> Result<Inbound<Message>, ClientError> {
        if frame.is_ack() {
            Ok(Inbound::Acknowledge(frame))
        } else {
            Ok(Inbound::Message(frame))
        }
    }
}
