//! Generic auto-reconnecting client core
//!
//! A [`Client`] owns a bounded outbound queue and one background supervisor
//! task. Producers only touch the queue and the shutdown flag; the supervisor is
//! the sole owner of backoff state and of the live session.
//!
//! # Usage
//!
//! ```rust
//! use brokerlink::client::{Client, ClientOptions};
//! use brokerlink::link::{LinkProtocol, Message};
//! use brokerlink::testing::MockConnector;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let connector = Arc::new(MockConnector::new());
//! let client = Client::new(
//!     ClientOptions::default(),
//!     LinkProtocol::default(),
//!     connector.clone(),
//!     None,
//! )?;
//!
//! client.send(Message::new(1, "greeting", "hello")).await?;
//! client.close().await?;
//! # Ok::<(), brokerlink::ClientError>(())
//! # });
//! ```

mod lifecycle;
mod queue;
mod session;
mod supervisor;

pub use supervisor::ConnectionState;

pub(crate) use lifecycle::stopped;
pub(crate) use supervisor::establish;

use crate::backoff::{Backoff, BackoffConfig};
use crate::error::ClientError;
use crate::observer::{NoopObserver, Observer};
use crate::protocol::Protocol;
use crate::transport::Connector;
use lifecycle::Lifecycle;
use queue::{Pending, QueueSender};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use supervisor::Supervisor;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::info;

/// Settings consumed by the client core
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    /// Outbound queue capacity
    pub buffer_size: usize,
    /// Largest encoded frame accepted by `send`
    pub max_message_size: usize,
    /// Bound on one dial plus handshake; zero disables it
    pub timeout: Duration,
    /// Heartbeat period; zero disables it
    pub keep_alive: Duration,
    pub backoff: BackoffConfig,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            buffer_size: 10,
            max_message_size: 4 * 1024 * 1024,
            timeout: Duration::from_secs(30),
            keep_alive: Duration::ZERO,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Long-lived client handle for one logical connection
pub struct Client<P: Protocol> {
    protocol: Arc<P>,
    queue: QueueSender<P::Frame>,
    lifecycle: Lifecycle,
    state_rx: watch::Receiver<ConnectionState>,
    max_message_size: usize,
}

impl<P: Protocol> Client<P> {
    /// Create the client and start its supervisor on the current tokio runtime
    ///
    /// The first connect attempt starts immediately. Without an observer all
    /// events are dropped.
    pub fn new(
        options: ClientOptions,
        protocol: P,
        connector: Arc<dyn Connector>,
        observer: Option<Arc<dyn Observer<P::Frame>>>,
    ) -> Result<Self, ClientError> {
        let protocol = Arc::new(protocol);
        let observer =
            observer.unwrap_or_else(|| Arc::new(NoopObserver) as Arc<dyn Observer<P::Frame>>);
        let (queue, queue_rx) = queue::bounded(options.buffer_size);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        let supervisor = Supervisor {
            protocol: protocol.clone(),
            connector,
            observer,
            queue: queue_rx,
            backoff: Backoff::new(options.backoff),
            timeout: options.timeout,
            keep_alive: options.keep_alive,
            state_tx,
        };
        let lifecycle = Lifecycle::spawn(move |shutdown| supervisor.run(shutdown))?;

        Ok(Self {
            protocol,
            queue,
            lifecycle,
            state_rx,
            max_message_size: options.max_message_size,
        })
    }

    /// Enqueue a frame, waiting for queue capacity
    pub async fn send(&self, frame: P::Frame) -> Result<(), ClientError> {
        self.send_until(frame, std::future::pending()).await
    }

    /// Enqueue a frame, giving up with `Timeout` once `deadline` passes
    pub async fn send_with_deadline(
        &self,
        frame: P::Frame,
        deadline: Instant,
    ) -> Result<(), ClientError> {
        self.send_until(frame, tokio::time::sleep_until(deadline))
            .await
            .map_err(|e| match e {
                ClientError::Cancelled => ClientError::Timeout,
                other => other,
            })
    }

    /// Enqueue a frame, giving up with `Cancelled` once `cancel` resolves
    pub async fn send_until<C>(&self, frame: P::Frame, cancel: C) -> Result<(), ClientError>
    where
        C: Future<Output = ()>,
    {
        if self.lifecycle.is_stopping() {
            return Err(ClientError::ClientClosed);
        }
        let pending = self.prepare(frame)?;
        self.queue
            .enqueue_until(pending, self.lifecycle.signal(), cancel)
            .await
    }

    /// Stop the supervisor and wait for it to unwind
    ///
    /// Idempotent: later calls return the stored outcome immediately.
    pub async fn close(&self) -> Result<(), ClientError> {
        info!(protocol = self.protocol.name(), "client is closing");
        let result = self.lifecycle.close().await;
        info!(protocol = self.protocol.name(), "client has closed");
        result
    }

    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Subscribe to supervisor state transitions
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_stopping()
    }

    /// Outbound queue capacity
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.lifecycle.signal()
    }

    /// Encode up front so oversize or unencodable frames fail at the caller
    fn prepare(&self, frame: P::Frame) -> Result<Pending<P::Frame>, ClientError> {
        let bytes = self.protocol.encode(&frame)?;
        if bytes.len() > self.max_message_size {
            return Err(ClientError::MessageTooLarge {
                size: bytes.len(),
                max: self.max_message_size,
            });
        }
        Ok(Pending { frame, bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{LinkProtocol, Message};
    use crate::testing::MockConnector;

    fn options() -> ClientOptions {
        ClientOptions {
            buffer_size: 2,
            max_message_size: 256,
            timeout: Duration::from_secs(1),
            keep_alive: Duration::ZERO,
            backoff: BackoffConfig {
                min: Duration::from_millis(10),
                max: Duration::from_millis(50),
                factor: 2.0,
            },
        }
    }

    #[test]
    fn test_client_options_default() {
        let options = ClientOptions::default();
        assert_eq!(options.buffer_size, 10);
        assert_eq!(options.timeout, Duration::from_secs(30));
        assert!(options.keep_alive.is_zero());
    }

    #[tokio::test]
    async fn test_oversize_message_rejected_synchronously() {
        let connector = Arc::new(MockConnector::new());
        let client = Client::new(options(), LinkProtocol::default(), connector, None).unwrap();

        let result = client
            .send(Message::new(1, "big", vec![0u8; 1024]))
            .await;
        assert!(matches!(result, Err(ClientError::MessageTooLarge { max: 256, .. })));
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let connector = Arc::new(MockConnector::new());
        let client = Client::new(options(), LinkProtocol::default(), connector, None).unwrap();

        client.close().await.unwrap();
        assert!(client.is_closed());
        assert_eq!(client.state(), ConnectionState::Stopped);

        let result = client.send(Message::new(1, "late", "x")).await;
        assert!(matches!(result, Err(ClientError::ClientClosed)));
    }

    #[tokio::test]
    async fn test_capacity_reported() {
        let connector = Arc::new(MockConnector::new());
        let client = Client::new(options(), LinkProtocol::default(), connector, None).unwrap();
        assert_eq!(client.capacity(), 2);
        client.close().await.unwrap();
    }
}
