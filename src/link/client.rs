use super::message::Message;
use super::protocol::LinkProtocol;
use crate::backoff::{Backoff, BackoffConfig};
use crate::client::{establish, stopped, Client, ConnectionState};
use crate::config::LinkSection;
use crate::error::{ClientError, TransportError};
use crate::observer::Observer;
use crate::protocol::Protocol;
use crate::transport::{Connector, Framing, TcpConnector, Transport};
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn, Instrument};

/// Auto-reconnecting link client
///
/// `send*` goes through the bounded queue and the supervised stream. `call*`
/// bypasses the queue: it opens its own connection, waits until one can be
/// established, and blocks for the reply carrying the same message id.
pub struct LinkClient {
    inner: Client<LinkProtocol>,
    connector: Arc<dyn Connector>,
    backoff: BackoffConfig,
    timeout: Duration,
    max_message_size: usize,
}

impl LinkClient {
    /// Build a client that dials `section.address` over TCP or TLS
    pub fn new(
        section: &LinkSection,
        observer: Option<Arc<dyn Observer<Message>>>,
    ) -> Result<Self, ClientError> {
        section.validate()?;
        let connector = TcpConnector::with_certificate(
            &section.address,
            Framing::LengthPrefixed,
            section.max_message_size,
            section.certificate.as_ref(),
        )?;
        Self::with_connector(section, Arc::new(connector), observer)
    }

    pub fn with_connector(
        section: &LinkSection,
        connector: Arc<dyn Connector>,
        observer: Option<Arc<dyn Observer<Message>>>,
    ) -> Result<Self, ClientError> {
        section.validate()?;
        let protocol = LinkProtocol::with_credentials(
            section.credentials.username()?,
            section.credentials.password()?,
        );
        let options = section.client_options();
        let inner = Client::new(options.clone(), protocol, connector.clone(), observer)?;
        Ok(Self {
            inner,
            connector,
            backoff: options.backoff,
            timeout: options.timeout,
            max_message_size: options.max_message_size,
        })
    }

    /// Queue a message for the stream
    pub async fn send(&self, message: Message) -> Result<(), ClientError> {
        self.inner.send(message).await
    }

    pub async fn send_with_deadline(
        &self,
        message: Message,
        deadline: Instant,
    ) -> Result<(), ClientError> {
        self.inner.send_with_deadline(message, deadline).await
    }

    pub async fn send_until<C>(&self, message: Message, cancel: C) -> Result<(), ClientError>
    where
        C: Future<Output = ()>,
    {
        self.inner.send_until(message, cancel).await
    }

    /// Unary request, waiting as long as it takes for a connection and a reply
    pub async fn call(&self, message: Message) -> Result<Message, ClientError> {
        self.call_until(message, std::future::pending()).await
    }

    /// Unary request that fails with `Timeout` once `deadline` passes
    pub async fn call_with_deadline(
        &self,
        message: Message,
        deadline: Instant,
    ) -> Result<Message, ClientError> {
        self.call_until(message, tokio::time::sleep_until(deadline))
            .await
            .map_err(|e| match e {
                ClientError::Cancelled => ClientError::Timeout,
                other => other,
            })
    }

    /// Unary request that fails with `Cancelled` once `cancel` resolves
    ///
    /// Client shutdown also aborts the call with `ClientClosed`.
    pub async fn call_until<C>(&self, message: Message, cancel: C) -> Result<Message, ClientError>
    where
        C: Future<Output = ()>,
    {
        if self.inner.is_closed() {
            return Err(ClientError::ClientClosed);
        }
        let mut shutdown = self.inner.shutdown_signal();
        let span = crate::call_span!(message_id = message.id, topic = %message.topic);

        tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => Err(ClientError::ClientClosed),
            _ = cancel => Err(ClientError::Cancelled),
            result = self.exchange(message).instrument(span) => result,
        }
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

    async fn exchange(&self, message: Message) -> Result<Message, ClientError> {
        let protocol = self.inner.protocol();
        let request = protocol.encode(&message)?;
        if request.len() > self.max_message_size {
            return Err(ClientError::MessageTooLarge {
                size: request.len(),
                max: self.max_message_size,
            });
        }

        let mut transport = self.ready().await?;
        let result = Self::round_trip(&mut transport, protocol, request, message.id).await;
        if let Err(e) = transport.close().await {
            debug!(error = %e, "error while closing call transport");
        }
        result
    }

    /// Connect for a call, retrying transient failures with backoff
    async fn ready(&self) -> Result<Transport, ClientError> {
        let protocol = self.inner.protocol();
        let mut backoff = Backoff::new(self.backoff);
        loop {
            match establish(self.connector.as_ref(), protocol, self.timeout).await {
                Ok(transport) => return Ok(transport),
                Err(e) if e.is_transient() => {
                    let delay = backoff.next_delay();
                    warn!(
                        error = %e,
                        attempt = backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        "call is waiting for a connection"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Write the request, then read until the reply with the same id arrives
    async fn round_trip(
        transport: &mut Transport,
        protocol: &LinkProtocol,
        request: Bytes,
        id: u64,
    ) -> Result<Message, ClientError> {
        transport.write_frame(request).await?;
        loop {
            let bytes = match transport.read_frame().await {
                Ok(Some(bytes)) => bytes,
                Ok(None) | Err(TransportError::Closed) => return Err(ClientError::ConnectionLost),
                Err(e) => return Err(e.into()),
            };
            let reply = protocol.decode(&bytes)?;
            if reply.id == id {
                return Ok(reply);
            }
            debug!(expected = id, actual = reply.id, "skipping unrelated reply");
        }
    }
}
