use super::packet::{
    Connect, Packet, PacketId, PubAck, Publish, QoS, Subscribe, Subscription, Unsubscribe,
};
use super::protocol::MqttProtocol;
use crate::client::{Client, ConnectionState};
use crate::config::MqttSection;
use crate::error::ClientError;
use crate::observer::Observer;
use crate::transport::{Connector, Framing, TcpConnector};
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;

/// Auto-reconnecting MQTT client
///
/// Every operation enqueues one packet; the background supervisor delivers it
/// once a session with an accepted CONNACK is live.
pub struct MqttClient {
    inner: Client<MqttProtocol>,
}

impl MqttClient {
    /// Build a client that dials `section.address` over TCP or TLS
    pub fn new(
        section: &MqttSection,
        observer: Option<Arc<dyn Observer<Packet>>>,
    ) -> Result<Self, ClientError> {
        section.validate()?;
        let connector = TcpConnector::with_certificate(
            &section.address,
            Framing::Mqtt,
            section.max_message_size,
            section.certificate.as_ref(),
        )?;
        Self::with_connector(section, Arc::new(connector), observer)
    }

    /// Build a client over a caller-supplied connector
    pub fn with_connector(
        section: &MqttSection,
        connector: Arc<dyn Connector>,
        observer: Option<Arc<dyn Observer<Packet>>>,
    ) -> Result<Self, ClientError> {
        section.validate()?;
        let connect = Connect {
            client_id: section.client_id.clone(),
            username: section.credentials.username()?,
            password: section.credentials.password()?,
            clean_session: section.clean_session,
            keep_alive: section.keep_alive_secs,
        };
        let protocol = MqttProtocol::new(connect, section.subscriptions.clone());
        let inner = Client::new(section.client_options(), protocol, connector, observer)?;
        Ok(Self { inner })
    }

    /// Queue a PUBLISH
    ///
    /// A fresh packet id is assigned when `qos` is above zero and `id` is zero.
    pub async fn publish(
        &self,
        qos: QoS,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        id: PacketId,
        retain: bool,
        dup: bool,
    ) -> Result<(), ClientError> {
        let id = if qos != QoS::AtMostOnce && id == 0 {
            self.next_id()
        } else {
            id
        };
        let publish = Publish {
            id,
            dup,
            qos,
            topic: topic.into(),
            payload: payload.into(),
            retain,
        };
        self.send(Packet::Publish(publish)).await
    }

    /// Queue a SUBSCRIBE for additional topics
    pub async fn subscribe(&self, subscriptions: Vec<Subscription>) -> Result<(), ClientError> {
        let subscribe = Subscribe {
            id: self.next_id(),
            subscriptions,
        };
        self.send(Packet::Subscribe(subscribe)).await
    }

    pub async fn unsubscribe(&self, topics: Vec<String>) -> Result<(), ClientError> {
        let unsubscribe = Unsubscribe {
            id: self.next_id(),
            topics,
        };
        self.send(Packet::Unsubscribe(unsubscribe)).await
    }

    /// Acknowledge an inbound QoS 1 publish
    pub async fn puback(&self, id: PacketId) -> Result<(), ClientError> {
        self.send(Packet::PubAck(PubAck { id })).await
    }

    /// Queue any packet as-is
    pub async fn send(&self, packet: Packet) -> Result<(), ClientError> {
        self.inner.send(packet).await
    }

    pub async fn send_with_deadline(
        &self,
        packet: Packet,
        deadline: Instant,
    ) -> Result<(), ClientError> {
        self.inner.send_with_deadline(packet, deadline).await
    }

    pub async fn send_until<C>(&self, packet: Packet, cancel: C) -> Result<(), ClientError>
    where
        C: Future<Output = ()>,
    {
        self.inner.send_until(packet, cancel).await
    }

    pub async fn close(&self) -> Result<(), ClientError> {
        self.inner.close().await
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_changes()
    }

    pub fn client_id(&self) -> &str {
        self.inner.protocol().client_id()
    }

    /// Next packet id from the counter shared with the session
    pub fn next_id(&self) -> PacketId {
        self.inner.protocol().ids().next_id()
    }
}
