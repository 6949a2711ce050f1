//! MQTT 3.1.1 wire codec
//!
//! Packets are serialized by `rumqttc`'s `mqttbytes::v4` module. One frame
//! holds exactly one control packet; QoS 2 flow packets are not spoken.

use super::packet::{
    ConnAck, Connect, Packet, PubAck, Publish, QoS, ReturnCode, SubAck, SubAckCode, Subscribe,
    Subscription, UnsubAck, Unsubscribe,
};
use crate::error::CodecError;
use bytes::{Bytes, BytesMut};
use rumqttc::mqttbytes::{self, v4};

/// Pure encode/decode between [`Packet`] and MQTT bytes
pub struct MqttCodec;

impl MqttCodec {
    pub fn encode(packet: &Packet) -> Result<Bytes, CodecError> {
        let mut buf = BytesMut::new();
        match packet {
            Packet::Connect(connect) => to_wire_connect(connect).write(&mut buf)?,
            Packet::ConnAck(ack) => v4::ConnAck {
                session_present: ack.session_present,
                code: to_wire_code(ack.return_code),
            }
            .write(&mut buf)?,
            Packet::Publish(publish) => v4::Publish {
                dup: publish.dup,
                qos: to_wire_qos(publish.qos),
                retain: publish.retain,
                topic: publish.topic.clone(),
                pkid: publish.id,
                payload: publish.payload.clone(),
            }
            .write(&mut buf)?,
            Packet::PubAck(ack) => v4::PubAck { pkid: ack.id }.write(&mut buf)?,
            Packet::Subscribe(subscribe) => v4::Subscribe {
                pkid: subscribe.id,
                filters: subscribe
                    .subscriptions
                    .iter()
                    .map(|s| v4::SubscribeFilter {
                        path: s.topic.clone(),
                        qos: to_wire_qos(s.qos),
                    })
                    .collect(),
            }
            .write(&mut buf)?,
            Packet::SubAck(ack) => v4::SubAck {
                pkid: ack.id,
                return_codes: ack
                    .return_codes
                    .iter()
                    .map(|code| match code {
                        SubAckCode::Granted(qos) => {
                            v4::SubscribeReasonCode::Success(to_wire_qos(*qos))
                        }
                        SubAckCode::Failure => v4::SubscribeReasonCode::Failure,
                    })
                    .collect(),
            }
            .write(&mut buf)?,
            Packet::Unsubscribe(unsubscribe) => v4::Unsubscribe {
                pkid: unsubscribe.id,
                topics: unsubscribe.topics.clone(),
            }
            .write(&mut buf)?,
            Packet::UnsubAck(ack) => v4::UnsubAck { pkid: ack.id }.write(&mut buf)?,
            Packet::PingReq => v4::PingReq.write(&mut buf)?,
            Packet::PingResp => v4::PingResp.write(&mut buf)?,
            Packet::Disconnect => v4::Disconnect.write(&mut buf)?,
        };
        Ok(buf.freeze())
    }

    /// Decode one complete packet; leftover bytes are an error
    pub fn decode(bytes: &[u8]) -> Result<Packet, CodecError> {
        let mut buf = BytesMut::from(bytes);
        let packet = v4::read(&mut buf, bytes.len())?;
        if !buf.is_empty() {
            return Err(CodecError::TrailingBytes(buf.len()));
        }

        let packet = match packet {
            v4::Packet::Connect(connect) => Packet::Connect(from_wire_connect(connect)),
            v4::Packet::ConnAck(ack) => Packet::ConnAck(ConnAck {
                session_present: ack.session_present,
                return_code: from_wire_code(ack.code),
            }),
            v4::Packet::Publish(publish) => Packet::Publish(Publish {
                id: publish.pkid,
                dup: publish.dup,
                qos: from_wire_qos(publish.qos),
                topic: publish.topic,
                payload: publish.payload,
                retain: publish.retain,
            }),
            v4::Packet::PubAck(ack) => Packet::PubAck(PubAck { id: ack.pkid }),
            v4::Packet::Subscribe(subscribe) => Packet::Subscribe(Subscribe {
                id: subscribe.pkid,
                subscriptions: subscribe
                    .filters
                    .into_iter()
                    .map(|f| Subscription::new(f.path, from_wire_qos(f.qos)))
                    .collect(),
            }),
            v4::Packet::SubAck(ack) => Packet::SubAck(SubAck {
                id: ack.pkid,
                return_codes: ack
                    .return_codes
                    .into_iter()
                    .map(|code| match code {
                        v4::SubscribeReasonCode::Success(qos) => {
                            SubAckCode::Granted(from_wire_qos(qos))
                        }
                        v4::SubscribeReasonCode::Failure => SubAckCode::Failure,
                    })
                    .collect(),
            }),
            v4::Packet::Unsubscribe(unsubscribe) => Packet::Unsubscribe(Unsubscribe {
                id: unsubscribe.pkid,
                topics: unsubscribe.topics,
            }),
            v4::Packet::UnsubAck(ack) => Packet::UnsubAck(UnsubAck { id: ack.pkid }),
            v4::Packet::PingReq => Packet::PingReq,
            v4::Packet::PingResp => Packet::PingResp,
            v4::Packet::Disconnect => Packet::Disconnect,
            v4::Packet::PubRec(_) => return Err(CodecError::UnsupportedPacket("pubrec")),
            v4::Packet::PubRel(_) => return Err(CodecError::UnsupportedPacket("pubrel")),
            v4::Packet::PubComp(_) => return Err(CodecError::UnsupportedPacket("pubcomp")),
        };
        Ok(packet)
    }
}

fn to_wire_connect(connect: &Connect) -> v4::Connect {
    let mut wire = v4::Connect::new(connect.client_id.clone());
    wire.keep_alive = connect.keep_alive;
    wire.clean_session = connect.clean_session;
    if connect.username.is_some() || connect.password.is_some() {
        wire.login = Some(v4::Login::new(
            connect.username.clone().unwrap_or_default(),
            connect.password.clone().unwrap_or_default(),
        ));
    }
    wire
}

fn from_wire_connect(connect: v4::Connect) -> Connect {
    let (username, password) = match connect.login {
        Some(login) => (
            Some(login.username).filter(|u| !u.is_empty()),
            Some(login.password).filter(|p| !p.is_empty()),
        ),
        None => (None, None),
    };
    Connect {
        client_id: connect.client_id,
        username,
        password,
        clean_session: connect.clean_session,
        keep_alive: connect.keep_alive,
    }
}

fn to_wire_qos(qos: QoS) -> mqttbytes::QoS {
    match qos {
        QoS::AtMostOnce => mqttbytes::QoS::AtMostOnce,
        QoS::AtLeastOnce => mqttbytes::QoS::AtLeastOnce,
        QoS::ExactlyOnce => mqttbytes::QoS::ExactlyOnce,
    }
}

fn from_wire_qos(qos: mqttbytes::QoS) -> QoS {
    match qos {
        mqttbytes::QoS::AtMostOnce => QoS::AtMostOnce,
        mqttbytes::QoS::AtLeastOnce => QoS::AtLeastOnce,
        mqttbytes::QoS::ExactlyOnce => QoS::ExactlyOnce,
    }
}

fn to_wire_code(code: ReturnCode) -> v4::ConnectReturnCode {
    match code {
        ReturnCode::Accepted => v4::ConnectReturnCode::Success,
        ReturnCode::UnacceptableProtocolVersion => v4::ConnectReturnCode::RefusedProtocolVersion,
        ReturnCode::IdentifierRejected => v4::ConnectReturnCode::BadClientId,
        ReturnCode::ServerUnavailable => v4::ConnectReturnCode::ServiceUnavailable,
        ReturnCode::BadUsernameOrPassword => v4::ConnectReturnCode::BadUserNamePassword,
        ReturnCode::NotAuthorized => v4::ConnectReturnCode::NotAuthorized,
    }
}

fn from_wire_code(code: v4::ConnectReturnCode) -> ReturnCode {
    match code {
        v4::ConnectReturnCode::Success => ReturnCode::Accepted,
        v4::ConnectReturnCode::RefusedProtocolVersion => ReturnCode::UnacceptableProtocolVersion,
        v4::ConnectReturnCode::BadClientId => ReturnCode::IdentifierRejected,
        v4::ConnectReturnCode::ServiceUnavailable => ReturnCode::ServerUnavailable,
        v4::ConnectReturnCode::BadUserNamePassword => ReturnCode::BadUsernameOrPassword,
        v4::ConnectReturnCode::NotAuthorized => ReturnCode::NotAuthorized,
    }
}
