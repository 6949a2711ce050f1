//! MQTT client behavior against a scripted in-memory broker


use brokerlink::mqtt::{
    MqttClient, Packet, PubAck, Publish, QoS, ReturnCode, SubAck, SubAckCode, Subscription,
};
use brokerlink::testing::{ConnectOutcome, MockConnector};
use brokerlink::ClientError;
use std::sync::Arc;
use test_helpers::{connack, eventually, mqtt_section, recording, WAIT};

fn broker() -> Arc<MockConnector> {
    Arc::new(MockConnector::new().with_greeting_packets(&[connack(ReturnCode::Accepted)]))
}

fn publishes(packets: &[Packet]) -> Vec<&Publish> {
    packets
        .iter()
        .filter_map(|p| match p {
            Packet::Publish(publish) => Some(publish),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_session_opens_with_connect() {
    // Arrange
    let connector = broker();
    let mut section = mqtt_section();
    section.credentials.username = Some("user".to_string());
    section.credentials.password = Some("secret".to_string());
    section.clean_session = false;

    // Act
    let client = MqttClient::with_connector(&section, connector.clone(), None).unwrap();
    let peer = connector.next_peer(WAIT).await.unwrap();
    assert!(peer.wait_for_written(1, WAIT).await);

    // Assert
    let written = peer.written_packets().await;
    match &written[0] {
        Packet::Connect(connect) => {
            assert_eq!(connect.client_id, "test-client");
            assert_eq!(connect.username.as_deref(), Some("user"));
            assert_eq!(connect.password.as_deref(), Some("secret"));
            assert!(!connect.clean_session);
        }
        other => panic!("expected connect first, got {other:?}"),
    }
    assert_eq!(client.client_id(), "test-client");
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_packets_are_mqtt_on_the_wire() {
    let connector = broker();
    let client = MqttClient::with_connector(&mqtt_section(), connector.clone(), None).unwrap();
    client
        .publish(QoS::AtLeastOnce, "a/b", "hi", 0, false, false)
        .await
        .unwrap();

    assert!(connector.wait_for_writes(2, WAIT).await);
    let wire = connector.wire().await;
    // CONNECT then PUBLISH with QoS 1
    assert_eq!(wire[0][0], 0x10);
    assert_eq!(&wire[0][2..8], &[0x00, 0x04, b'M', b'Q', b'T', b'T']);
    assert_eq!(wire[1][0], 0x32);
    assert_eq!(&wire[1][wire[1].len() - 2..], b"hi");
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_publish_assigns_packet_id_for_qos1() {
    let connector = broker();
    let client = MqttClient::with_connector(&mqtt_section(), connector.clone(), None).unwrap();

    client
        .publish(QoS::AtLeastOnce, "a/b", "one", 0, false, false)
        .await
        .unwrap();
    client
        .publish(QoS::AtMostOnce, "a/b", "two", 0, true, false)
        .await
        .unwrap();
    client
        .publish(QoS::AtLeastOnce, "a/b", "three", 77, false, true)
        .await
        .unwrap();

    // connect + 3 publishes
    assert!(connector.wait_for_writes(4, WAIT).await);
    let packets = connector.wire_packets().await;
    let published = publishes(&packets);
    assert_eq!(published.len(), 3);
    assert_ne!(published[0].id, 0);
    assert_eq!(published[0].payload.as_ref(), b"one");
    assert_eq!(published[1].id, 0);
    assert!(published[1].retain);
    assert_eq!(published[2].id, 77);
    assert!(published[2].dup);
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_subscriptions_restored_after_reconnect() {
    let connector = broker();
    let mut section = mqtt_section();
    section.subscriptions = vec![Subscription::new("sensors/#", QoS::AtLeastOnce)];
    let client = MqttClient::with_connector(&section, connector.clone(), None).unwrap();

    let first = connector.next_peer(WAIT).await.unwrap();
    assert!(first.wait_for_written(2, WAIT).await);
    first.disconnect().await;
    let second = connector.next_peer(WAIT).await.unwrap();
    assert!(second.wait_for_written(2, WAIT).await);

    for peer in [&first, &second] {
        let packets = peer.written_packets().await;
        assert!(matches!(packets[0], Packet::Connect(_)));
        match &packets[1] {
            Packet::Subscribe(subscribe) => {
                assert_ne!(subscribe.id, 0);
                assert_eq!(subscribe.subscriptions, section.subscriptions);
            }
            other => panic!("expected subscribe after connack, got {other:?}"),
        }
    }
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_refused_connack_keeps_retrying() {
    let connector = Arc::new(
        MockConnector::new().with_greeting_packets(&[connack(ReturnCode::NotAuthorized)]),
    );
    let (observer, handle) = recording::<Packet>();
    let client = MqttClient::with_connector(&mqtt_section(), connector.clone(), handle).unwrap();

    assert!(connector.wait_for_attempts(3, WAIT).await);
    assert!(observer.wait_for_events(2, WAIT).await);
    let errors = observer.get_errors().await;
    assert!(errors
        .iter()
        .all(|e| e == "connection refused: not authorized"));
    assert!(!client.state().is_connected());
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_first_packet_must_be_connack() {
    let connector = Arc::new(MockConnector::new().with_greeting_packets(&[Packet::PingResp]));
    let (observer, handle) = recording::<Packet>();
    let client = MqttClient::with_connector(&mqtt_section(), connector.clone(), handle).unwrap();

    assert!(observer.wait_for_events(1, WAIT).await);
    let errors = observer.get_errors().await;
    assert!(errors[0].contains("expected connack, got pingresp"), "{errors:?}");
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_connect_timeout_when_broker_stays_silent() {
    // No greeting: the broker never answers CONNECT
    let connector = Arc::new(MockConnector::new());
    let mut section = mqtt_section();
    section.timeout_ms = 50;
    let (observer, handle) = recording::<Packet>();
    let client = MqttClient::with_connector(&section, connector.clone(), handle).unwrap();

    assert!(observer.wait_for_events(1, WAIT).await);
    assert!(observer.get_errors().await[0].contains("timed out"));
    assert!(connector.wait_for_attempts(2, WAIT).await);
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_inbound_publish_and_puback_reach_observer() {
    let connector = broker();
    let (observer, handle) = recording::<Packet>();
    let client = MqttClient::with_connector(&mqtt_section(), connector.clone(), handle).unwrap();
    let peer = connector.next_peer(WAIT).await.unwrap();

    let mut inbound = Publish::new("cmd/reboot", "now");
    inbound.id = 12;
    inbound.qos = QoS::AtLeastOnce;
    assert!(peer.inject_packet(&Packet::Publish(inbound.clone())).await);
    assert!(peer.inject_packet(&Packet::PingResp).await);
    assert!(peer.inject_packet(&Packet::PubAck(PubAck { id: 5 })).await);

    assert!(observer.wait_for_events(2, WAIT).await);
    assert_eq!(
        observer.get_messages().await,
        vec![Packet::Publish(inbound)]
    );
    assert_eq!(
        observer.get_acknowledgments().await,
        vec![Packet::PubAck(PubAck { id: 5 })]
    );

    // Application acknowledges the QoS 1 publish
    client.puback(12).await.unwrap();
    let peer = &peer;
    assert!(
        eventually(WAIT, || async move {
            peer.written_packets()
                .await
                .contains(&Packet::PubAck(PubAck { id: 12 }))
        })
        .await
    );
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_failed_suback_drops_session() {
    let connector = broker();
    let (observer, handle) = recording::<Packet>();
    let client = MqttClient::with_connector(&mqtt_section(), connector.clone(), handle).unwrap();
    let first = connector.next_peer(WAIT).await.unwrap();

    client
        .subscribe(vec![Subscription::new("forbidden/#", QoS::ExactlyOnce)])
        .await
        .unwrap();
    let suback = SubAck {
        id: 1,
        return_codes: vec![SubAckCode::Failure],
    };
    assert!(first.inject_packet(&Packet::SubAck(suback)).await);

    assert!(connector.next_peer(WAIT).await.is_some());
    assert!(first.wait_closed(WAIT).await);
    assert!(observer
        .get_errors()
        .await
        .contains(&"subscription failed".to_string()));
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_unsubscribe_uses_fresh_id() {
    let connector = broker();
    let client = MqttClient::with_connector(&mqtt_section(), connector.clone(), None).unwrap();

    client
        .subscribe(vec![Subscription::new("a", QoS::AtMostOnce)])
        .await
        .unwrap();
    client.unsubscribe(vec!["a".to_string()]).await.unwrap();

    assert!(connector.wait_for_writes(3, WAIT).await);
    let packets = connector.wire_packets().await;
    let sub_id = packets.iter().find_map(|p| match p {
        Packet::Subscribe(s) => Some(s.id),
        _ => None,
    });
    let unsub_id = packets.iter().find_map(|p| match p {
        Packet::Unsubscribe(u) => Some(u.id),
        _ => None,
    });
    assert!(sub_id.is_some() && unsub_id.is_some());
    assert_ne!(sub_id, unsub_id);
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_keep_alive_sends_pingreq() {
    let connector = broker();
    let mut section = mqtt_section();
    section.keep_alive_secs = 1;
    let client = MqttClient::with_connector(&section, connector.clone(), None).unwrap();
    let peer = connector.next_peer(WAIT).await.unwrap();

    assert!(peer.wait_for_written(2, WAIT).await);
    let packets = peer.written_packets().await;
    assert_eq!(packets[1], Packet::PingReq);
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_publish_after_close_fails() {
    let connector = broker();
    let client = MqttClient::with_connector(&mqtt_section(), connector, None).unwrap();
    client.close().await.unwrap();

    let result = client
        .publish(QoS::AtMostOnce, "t", "x", 0, false, false)
        .await;
    assert!(matches!(result, Err(ClientError::ClientClosed)));
}

#[tokio::test]
async fn test_inflight_publish_survives_broken_write() {
    // Connect is write 1, so the first publish hits the broken pipe
    let connector = Arc::new(
        MockConnector::new()
            .with_greeting_packets(&[connack(ReturnCode::Accepted)])
            .with_script([ConnectOutcome::AcceptFailingWrites(1)]),
    );
    let client = MqttClient::with_connector(&mqtt_section(), connector.clone(), None).unwrap();

    client
        .publish(QoS::AtLeastOnce, "t", "precious", 0, false, false)
        .await
        .unwrap();

    let wire = connector.as_ref();
    assert!(
        eventually(WAIT, || async move {
            !publishes(&wire.wire_packets().await).is_empty()
        })
        .await
    );
    let packets = connector.wire_packets().await;
    let published = publishes(&packets);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].payload.as_ref(), b"precious");
    assert!(connector.attempts() >= 2);
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_real_tcp_address_parsing() {
    let mut section = mqtt_section();
    section.address = "mqtt://127.0.0.1".to_string();
    let client = MqttClient::new(&section, None).unwrap();
    client.close().await.unwrap();

    section.address = "ws://127.0.0.1:8080".to_string();
    assert!(matches!(
        MqttClient::new(&section, None),
        Err(ClientError::Transport(_))
    ));
}
