//! MQTT-style publish/subscribe variant
//!
//! Packets travel as MQTT 3.1.1 control packets, one per transport frame.
//! Each session opens with CONNECT/CONNACK and restores the configured
//! subscriptions; PUBLISH frames reach the observer as messages and PUBACK
//! frames as acknowledgments.

mod client;
mod codec;
mod counter;
mod packet;
mod protocol;

pub use client::MqttClient;
pub use codec::MqttCodec;
pub use counter::Counter;
pub use packet::{
    ConnAck, Connect, Packet, PacketId, PubAck, Publish, QoS, ReturnCode, SubAck, SubAckCode,
    Subscribe, Subscription, UnsubAck, Unsubscribe,
};
pub use protocol::MqttProtocol;
