//! Connection supervisor: keep exactly one session alive, forever
//!
//! `Idle -> Connecting -> Connected -> Disconnecting -> Reconnecting -> Connecting ... -> Stopped`
//!
//! The next attempt time is fixed before each connect, so a session that dies
//! right after connecting still waits out the backoff delay, while a session that
//! lived longer than the delay reconnects immediately.

use super::lifecycle::stopped;
use super::queue::{Pending, QueueReceiver};
use super::session::{Session, SessionEnd};
use crate::backoff::Backoff;
use crate::error::ClientError;
use crate::observer::Observer;
use crate::protocol::Protocol;
use crate::transport::{Connector, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, Instrument};

/// Observable supervisor state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, first attempt not started yet
    Idle,
    /// Dialing and handshaking
    Connecting,
    /// A session is live
    Connected,
    /// Tearing down a failed session
    Disconnecting,
    /// Waiting out the backoff delay before the given attempt
    Reconnecting(u32),
    /// Supervisor has exited; no further attempts
    Stopped,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

pub(crate) struct Supervisor<P: Protocol> {
    pub protocol: Arc<P>,
    pub connector: Arc<dyn Connector>,
    pub observer: Arc<dyn Observer<P::Frame>>,
    pub queue: QueueReceiver<P::Frame>,
    pub backoff: Backoff,
    pub timeout: Duration,
    pub keep_alive: Duration,
    pub state_tx: watch::Sender<ConnectionState>,
}

impl<P: Protocol> Supervisor<P> {
    /// Run until shutdown is requested or every producer is gone
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(protocol = self.protocol.name(), "client starts to keep connecting");

        let mut current: Option<Pending<P::Frame>> = None;
        let mut next: Option<Instant> = None;
        let mut sessions: u64 = 0;

        loop {
            if let Some(at) = next {
                self.set_state(ConnectionState::Reconnecting(self.backoff.attempt()));
                info!(
                    protocol = self.protocol.name(),
                    delay_ms = at.saturating_duration_since(Instant::now()).as_millis() as u64,
                    attempt = self.backoff.attempt(),
                    "next reconnect"
                );
                tokio::select! {
                    biased;
                    _ = stopped(&mut shutdown) => break,
                    _ = sleep_until(at) => {}
                }
            }
            if *shutdown.borrow() {
                break;
            }

            info!(protocol = self.protocol.name(), "client starts to connect");
            self.set_state(ConnectionState::Connecting);
            next = Some(Instant::now() + self.backoff.next_delay());

            let established = tokio::select! {
                biased;
                _ = stopped(&mut shutdown) => break,
                result = establish(self.connector.as_ref(), self.protocol.as_ref(), self.timeout) => result,
            };
            let transport = match established {
                Ok(transport) => transport,
                Err(e) => {
                    self.report("failed to connect", e).await;
                    continue;
                }
            };

            info!(protocol = self.protocol.name(), "client has connected");
            self.backoff.reset();
            self.set_state(ConnectionState::Connected);
            if current.is_some() {
                debug!("resubmitting in-flight frame on new session");
            }

            let session = Session::new(
                transport,
                self.protocol.clone(),
                self.observer.clone(),
                self.keep_alive,
            );
            sessions += 1;
            let span = crate::session_span!(protocol = self.protocol.name(), session = sessions);
            let end = session
                .run(&mut self.queue, &mut current, &mut shutdown)
                .instrument(span)
                .await;

            self.set_state(ConnectionState::Disconnecting);
            info!(protocol = self.protocol.name(), "client has disconnected");
            match end {
                SessionEnd::Shutdown => break,
                SessionEnd::QueueClosed => {
                    debug!("all producers dropped, stopping");
                    break;
                }
                SessionEnd::Failed(e) => self.report("session failed", e).await,
            }
        }

        if let Some(pending) = current.take() {
            debug!(frame = ?pending.frame, "dropping in-flight frame at shutdown");
        }
        self.set_state(ConnectionState::Stopped);
        info!(protocol = self.protocol.name(), "client has stopped connecting");
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    async fn report(&self, context: &str, error: ClientError) {
        error!(protocol = self.protocol.name(), error = %error, "{}", context);
        self.observer.on_error(&error).await;
    }
}

/// Dial and handshake, bounded by `timeout`
pub(crate) async fn establish<P: Protocol>(
    connector: &dyn Connector,
    protocol: &P,
    timeout: Duration,
) -> Result<Transport, ClientError> {
    let attempt = async {
        let mut transport = connector.connect().await?;
        if let Err(e) = protocol.handshake(&mut transport).await {
            let _ = transport.close().await;
            return Err(e);
        }
        Ok::<_, ClientError>(transport)
    };

    if timeout.is_zero() {
        return attempt.await;
    }
    tokio::time::timeout(timeout, attempt)
        .await
        .map_err(|_| ClientError::ConnectTimeout(timeout))?
}
