//! Mock implementations for testing
//!
//! `MockConnector` hands out in-memory transports according to a script of
//! connect outcomes and records every frame the client managed to write.
//! `MockPeer` is the server end of one accepted connection.

use crate::error::{ClientError, TransportError};
use crate::mqtt::{MqttCodec, Packet};
use crate::observer::{Observer, ObserverError};
use crate::protocol::JsonCodec;
use crate::transport::{Connector, FrameReader, FrameWriter, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::Instant;

/// Scripted result of one connect attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Dial fails with connection refused
    Refuse,
    /// Connection accepted
    Accept,
    /// Connection accepted, but only the first `n` writes succeed
    AcceptFailingWrites(usize),
}

#[derive(Debug, Default)]
struct ConnectorState {
    script: VecDeque<ConnectOutcome>,
    greeting: Vec<Bytes>,
    attempt_times: Vec<Instant>,
    wire: Vec<Bytes>,
    peers: VecDeque<MockPeer>,
}

/// In-memory connector with a scripted sequence of outcomes
///
/// Once the script is exhausted every attempt is accepted.
#[derive(Debug, Clone)]
pub struct MockConnector {
    state: Arc<Mutex<ConnectorState>>,
    attempts: Arc<watch::Sender<usize>>,
    accepted: Arc<watch::Sender<usize>>,
    written: Arc<watch::Sender<usize>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ConnectorState::default())),
            attempts: Arc::new(watch::channel(0).0),
            accepted: Arc::new(watch::channel(0).0),
            written: Arc::new(watch::channel(0).0),
        }
    }

    /// Queue outcomes for the next connect attempts, in order
    pub fn with_script(self, outcomes: impl IntoIterator<Item = ConnectOutcome>) -> Self {
        if let Ok(mut state) = self.state.try_lock() {
            state.script.extend(outcomes);
        }
        self
    }

    /// Frames the peer sends as soon as a connection is accepted
    pub fn with_greeting(self, frames: Vec<Bytes>) -> Self {
        if let Ok(mut state) = self.state.try_lock() {
            state.greeting = frames;
        }
        self
    }

    /// Greeting built from serializable values; values that fail to encode are skipped
    pub fn with_greeting_json<T: Serialize>(self, values: &[T]) -> Self {
        let frames = values
            .iter()
            .filter_map(|value| JsonCodec::encode(value).ok())
            .collect();
        self.with_greeting(frames)
    }

    /// Greeting of MQTT packets; packets that fail to encode are skipped
    pub fn with_greeting_packets(self, packets: &[Packet]) -> Self {
        let frames = packets
            .iter()
            .filter_map(|packet| MqttCodec::encode(packet).ok())
            .collect();
        self.with_greeting(frames)
    }

    pub async fn script(&self, outcomes: impl IntoIterator<Item = ConnectOutcome>) {
        self.state.lock().await.script.extend(outcomes);
    }

    /// Connect attempts so far, accepted or not
    pub fn attempts(&self) -> usize {
        *self.attempts.borrow()
    }

    /// When each connect attempt started
    pub async fn attempt_times(&self) -> Vec<Instant> {
        self.state.lock().await.attempt_times.clone()
    }

    pub fn accepted(&self) -> usize {
        *self.accepted.borrow()
    }

    /// Every frame successfully written by the client, across all connections
    pub async fn wire(&self) -> Vec<Bytes> {
        self.state.lock().await.wire.clone()
    }

    /// Wire frames that decode as `T`, other frames skipped
    pub async fn wire_as<T: DeserializeOwned>(&self) -> Vec<T> {
        self.wire()
            .await
            .iter()
            .filter_map(|frame| JsonCodec::decode(frame).ok())
            .collect()
    }

    /// Wire frames that decode as MQTT packets
    pub async fn wire_packets(&self) -> Vec<Packet> {
        decode_packets(&self.wire().await)
    }

    /// Wait until at least `count` frames were written
    pub async fn wait_for_writes(&self, count: usize, timeout: Duration) -> bool {
        wait_for_count(&self.written, count, timeout).await
    }

    pub async fn wait_for_attempts(&self, count: usize, timeout: Duration) -> bool {
        wait_for_count(&self.attempts, count, timeout).await
    }

    /// Take the peer of the oldest accepted connection not yet taken
    pub async fn next_peer(&self, timeout: Duration) -> Option<MockPeer> {
        let deadline = Instant::now() + timeout;
        let mut accepted = self.accepted.subscribe();
        loop {
            if let Some(peer) = self.state.lock().await.peers.pop_front() {
                return Some(peer);
            }
            match tokio::time::timeout_at(deadline, accepted.changed()).await {
                Ok(Ok(())) => continue,
                _ => return None,
            }
        }
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_packets(frames: &[Bytes]) -> Vec<Packet> {
    frames
        .iter()
        .filter_map(|frame| MqttCodec::decode(frame).ok())
        .collect()
}

async fn wait_for_count(counter: &watch::Sender<usize>, count: usize, timeout: Duration) -> bool {
    let mut rx = counter.subscribe();
    tokio::time::timeout(timeout, rx.wait_for(|n| *n >= count))
        .await
        .map(|result| result.is_ok())
        .unwrap_or(false)
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Transport, TransportError> {
        let mut state = self.state.lock().await;
        state.attempt_times.push(Instant::now());
        self.attempts.send_modify(|n| *n += 1);

        let writes_allowed = match state.script.pop_front().unwrap_or(ConnectOutcome::Accept) {
            ConnectOutcome::Refuse => {
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "mock connection refused",
                )));
            }
            ConnectOutcome::Accept => None,
            ConnectOutcome::AcceptFailingWrites(n) => Some(n),
        };

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        for frame in &state.greeting {
            let _ = inbound_tx.send(frame.clone());
        }
        let (closed_tx, closed_rx) = watch::channel(false);
        let peer = MockPeer {
            inbound: Arc::new(Mutex::new(Some(inbound_tx))),
            written: Arc::new(Mutex::new(Vec::new())),
            writes: Arc::new(watch::channel(0).0),
            closed: closed_rx,
        };
        let writer = MockWriter {
            connector: self.clone(),
            peer_log: peer.written.clone(),
            peer_writes: peer.writes.clone(),
            inbound: peer.inbound.clone(),
            writes_allowed,
            closed: closed_tx,
        };
        state.peers.push_back(peer);
        drop(state);
        self.accepted.send_modify(|n| *n += 1);

        Ok(Transport::new(
            Box::new(MockReader { rx: inbound_rx }),
            Box::new(writer),
        ))
    }
}

struct MockReader {
    rx: mpsc::UnboundedReceiver<Bytes>,
}

#[async_trait]
impl FrameReader for MockReader {
    async fn read_frame(&mut self) -> Result<Option<Bytes>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

struct MockWriter {
    connector: MockConnector,
    peer_log: Arc<Mutex<Vec<Bytes>>>,
    peer_writes: Arc<watch::Sender<usize>>,
    inbound: Arc<Mutex<Option<mpsc::UnboundedSender<Bytes>>>>,
    writes_allowed: Option<usize>,
    closed: watch::Sender<bool>,
}

#[async_trait]
impl FrameWriter for MockWriter {
    async fn write_frame(&mut self, frame: Bytes) -> Result<(), TransportError> {
        let closed = *self.closed.borrow();
        if closed || self.inbound.lock().await.is_none() {
            return Err(TransportError::Closed);
        }
        match self.writes_allowed.as_mut() {
            Some(0) => {
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "mock write failure",
                )));
            }
            Some(remaining) => *remaining -= 1,
            None => {}
        }

        self.peer_log.lock().await.push(frame.clone());
        self.connector.state.lock().await.wire.push(frame);
        self.connector.written.send_modify(|n| *n += 1);
        self.peer_writes.send_modify(|n| *n += 1);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed.send_replace(true);
        Ok(())
    }
}

/// Server side of one accepted mock connection
#[derive(Debug, Clone)]
pub struct MockPeer {
    inbound: Arc<Mutex<Option<mpsc::UnboundedSender<Bytes>>>>,
    written: Arc<Mutex<Vec<Bytes>>>,
    writes: Arc<watch::Sender<usize>>,
    closed: watch::Receiver<bool>,
}

impl MockPeer {
    /// Deliver a raw frame to the client
    pub async fn inject(&self, frame: Bytes) -> bool {
        match self.inbound.lock().await.as_ref() {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    pub async fn inject_json<T: Serialize>(&self, value: &T) -> bool {
        match JsonCodec::encode(value) {
            Ok(frame) => self.inject(frame).await,
            Err(_) => false,
        }
    }

    pub async fn inject_packet(&self, packet: &Packet) -> bool {
        match MqttCodec::encode(packet) {
            Ok(frame) => self.inject(frame).await,
            Err(_) => false,
        }
    }

    /// Drop the connection from the server side
    pub async fn disconnect(&self) {
        self.inbound.lock().await.take();
    }

    /// Frames the client wrote on this connection
    pub async fn written(&self) -> Vec<Bytes> {
        self.written.lock().await.clone()
    }

    pub async fn written_as<T: DeserializeOwned>(&self) -> Vec<T> {
        self.written()
            .await
            .iter()
            .filter_map(|frame| JsonCodec::decode(frame).ok())
            .collect()
    }

    pub async fn written_packets(&self) -> Vec<Packet> {
        decode_packets(&self.written().await)
    }

    /// Wait until the client wrote at least `count` frames on this connection
    pub async fn wait_for_written(&self, count: usize, timeout: Duration) -> bool {
        wait_for_count(&self.writes, count, timeout).await
    }

    /// Whether the client closed its side
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub async fn wait_closed(&self, timeout: Duration) -> bool {
        let mut closed = self.closed.clone();
        tokio::time::timeout(timeout, closed.wait_for(|c| *c))
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false)
    }
}

/// Observer that records every callback
#[derive(Debug)]
pub struct RecordingObserver<F> {
    pub messages: Arc<Mutex<Vec<F>>>,
    pub acknowledgments: Arc<Mutex<Vec<F>>>,
    pub errors: Arc<Mutex<Vec<String>>>,
    /// Return an error from `on_message`
    pub fail_messages: bool,
    events: watch::Sender<usize>,
}

impl<F> RecordingObserver<F> {
    pub fn new() -> Self {
        Self {
            messages: Arc::new(Mutex::new(Vec::new())),
            acknowledgments: Arc::new(Mutex::new(Vec::new())),
            errors: Arc::new(Mutex::new(Vec::new())),
            fail_messages: false,
            events: watch::channel(0).0,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_messages: true,
            ..Self::new()
        }
    }

    pub async fn get_messages(&self) -> Vec<F>
    where
        F: Clone,
    {
        self.messages.lock().await.clone()
    }

    pub async fn get_acknowledgments(&self) -> Vec<F>
    where
        F: Clone,
    {
        self.acknowledgments.lock().await.clone()
    }

    pub async fn get_errors(&self) -> Vec<String> {
        self.errors.lock().await.clone()
    }

    /// Wait until at least `count` callbacks of any kind were recorded
    pub async fn wait_for_events(&self, count: usize, timeout: Duration) -> bool {
        wait_for_count(&self.events, count, timeout).await
    }

    fn record(&self) {
        self.events.send_modify(|n| *n += 1);
    }
}

impl<F> Default for RecordingObserver<F> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<F: Clone + Send + Sync + 'static> Observer<F> for RecordingObserver<F> {
    async fn on_message(&self, frame: &F) -> Result<(), ObserverError> {
        self.messages.lock().await.push(frame.clone());
        self.record();
        if self.fail_messages {
            return Err("mock observer failure".into());
        }
        Ok(())
    }

    async fn on_acknowledge(&self, frame: &F) -> Result<(), ObserverError> {
        self.acknowledgments.lock().await.push(frame.clone());
        self.record();
        Ok(())
    }

    async fn on_error(&self, error: &ClientError) {
        self.errors.lock().await.push(error.to_string());
        self.record();
    }
}
