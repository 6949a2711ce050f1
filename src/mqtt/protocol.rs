//! MQTT session rules on top of the generic client core

use super::codec::MqttCodec;
use super::counter::Counter;
use super::packet::{Connect, Packet, ReturnCode, Subscribe, Subscription};
use crate::error::{ClientError, CodecError};
use crate::protocol::{Inbound, Protocol};
use crate::transport::Transport;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info};

/// Connect parameters plus the subscriptions restored on every session
#[derive(Debug, Clone)]
pub struct MqttProtocol {
    connect: Connect,
    subscriptions: Vec<Subscription>,
    ids: Arc<Counter>,
}

impl MqttProtocol {
    pub fn new(connect: Connect, subscriptions: Vec<Subscription>) -> Self {
        Self {
            connect,
            subscriptions,
            ids: Arc::new(Counter::new()),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.connect.client_id
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    /// Packet id source shared with the client handle
    pub fn ids(&self) -> &Counter {
        &self.ids
    }

    fn check_connack(packet: Packet) -> Result<(), ClientError> {
        match packet {
            Packet::ConnAck(ack) if ack.return_code == ReturnCode::Accepted => Ok(()),
            Packet::ConnAck(ack) => Err(ClientError::ConnectionRefused(ack.return_code)),
            other => Err(ClientError::unexpected("connack", other.kind())),
        }
    }
}

#[async_trait]
impl Protocol for MqttProtocol {
    type Frame = Packet;

    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn encode(&self, frame: &Packet) -> Result<Bytes, CodecError> {
        MqttCodec::encode(frame)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Packet, CodecError> {
        MqttCodec::decode(bytes)
    }

    async fn handshake(&self, transport: &mut Transport) -> Result<(), ClientError> {
        let connect = self.encode(&Packet::Connect(self.connect.clone()))?;
        transport.write_frame(connect).await?;

        let reply = transport.expect_frame().await?;
        Self::check_connack(self.decode(&reply)?)?;
        debug!(client_id = %self.connect.client_id, "connack accepted");

        if !self.subscriptions.is_empty() {
            let subscribe = Packet::Subscribe(Subscribe {
                id: self.ids.next_id(),
                subscriptions: self.subscriptions.clone(),
            });
            transport.write_frame(self.encode(&subscribe)?).await?;
            info!(
                client_id = %self.connect.client_id,
                count = self.subscriptions.len(),
                "subscriptions restored"
            );
        }
        Ok(())
    }

    fn classify(&self, frame: Packet) -> Result<Inbound<Packet>, ClientError> {
        match frame {
            Packet::Publish(_) => Ok(Inbound::Message(frame)),
            Packet::PubAck(_) => Ok(Inbound::Acknowledge(frame)),
            Packet::SubAck(ref ack) if ack.has_failure() => Err(ClientError::SubscriptionFailed),
            Packet::SubAck(_) | Packet::UnsubAck(_) | Packet::PingResp => Ok(Inbound::Control),
            other => Err(ClientError::unexpected(
                "publish, puback, suback, unsuback or pingresp",
                other.kind(),
            )),
        }
    }

    fn heartbeat(&self) -> Option<Packet> {
        Some(Packet::PingReq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::packet::{ConnAck, PubAck, Publish, QoS, SubAck, SubAckCode};

    fn protocol() -> MqttProtocol {
        MqttProtocol::new(
            Connect {
                client_id: "test".to_string(),
                username: None,
                password: None,
                clean_session: true,
                keep_alive: 0,
            },
            vec![],
        )
    }

    #[test]
    fn test_connack_checks() {
        let accepted = Packet::ConnAck(ConnAck {
            session_present: false,
            return_code: ReturnCode::Accepted,
        });
        assert!(MqttProtocol::check_connack(accepted).is_ok());

        let refused = Packet::ConnAck(ConnAck {
            session_present: false,
            return_code: ReturnCode::NotAuthorized,
        });
        assert!(matches!(
            MqttProtocol::check_connack(refused),
            Err(ClientError::ConnectionRefused(ReturnCode::NotAuthorized))
        ));

        assert!(matches!(
            MqttProtocol::check_connack(Packet::PingResp),
            Err(ClientError::UnexpectedPacket { actual: "pingresp", .. })
        ));
    }

    #[test]
    fn test_classify_user_frames() {
        let protocol = protocol();
        let publish = Packet::Publish(Publish::new("a/b", "hi"));
        assert!(matches!(protocol.classify(publish), Ok(Inbound::Message(_))));
        assert!(matches!(
            protocol.classify(Packet::PubAck(PubAck { id: 3 })),
            Ok(Inbound::Acknowledge(Packet::PubAck(PubAck { id: 3 })))
        ));
    }

    #[test]
    fn test_classify_control_frames() {
        let protocol = protocol();
        assert!(matches!(protocol.classify(Packet::PingResp), Ok(Inbound::Control)));

        let granted = Packet::SubAck(SubAck {
            id: 1,
            return_codes: vec![SubAckCode::Granted(QoS::AtLeastOnce)],
        });
        assert!(matches!(protocol.classify(granted), Ok(Inbound::Control)));

        let failed = Packet::SubAck(SubAck {
            id: 1,
            return_codes: vec![SubAckCode::Failure],
        });
        assert!(matches!(
            protocol.classify(failed),
            Err(ClientError::SubscriptionFailed)
        ));
    }

    #[test]
    fn test_classify_rejects_client_only_packets() {
        let protocol = protocol();
        let connack = Packet::ConnAck(ConnAck {
            session_present: true,
            return_code: ReturnCode::Accepted,
        });
        assert!(matches!(
            protocol.classify(connack),
            Err(ClientError::UnexpectedPacket { actual: "connack", .. })
        ));
        assert!(protocol.classify(Packet::Disconnect).is_err());
    }

    #[test]
    fn test_frames_use_mqtt_encoding() {
        let protocol = protocol();
        let connect = protocol
            .encode(&Packet::Connect(protocol.connect.clone()))
            .unwrap();
        assert_eq!(connect[0], 0x10);
        assert_eq!(
            protocol.decode(&[0x40, 0x02, 0x00, 0x03]).unwrap(),
            Packet::PubAck(PubAck { id: 3 })
        );
    }

    #[test]
    fn test_heartbeat_is_pingreq() {
        assert_eq!(protocol().heartbeat(), Some(Packet::PingReq));
    }
}
