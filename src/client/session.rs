//! One established connection: a send loop and a receive loop
//!
//! Both loops run concurrently and end together as soon as either one fails.
//! The in-flight slot lives outside the session, owned by the supervisor, so a
//! frame taken from the queue survives the session that failed to write it.

use super::lifecycle::stopped;
use super::queue::{Pending, QueueReceiver};
use crate::error::{ClientError, TransportError};
use crate::observer::Observer;
use crate::protocol::{Inbound, Protocol};
use crate::transport::{FrameReader, FrameWriter, Transport};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// Why a session ended
#[derive(Debug)]
pub(crate) enum SessionEnd {
    /// Shutdown was requested
    Shutdown,
    /// Every producer handle is gone; nothing more can be sent
    QueueClosed,
    /// A transport, codec or protocol error tore the session down
    Failed(ClientError),
}

pub(crate) struct Session<P: Protocol> {
    transport: Transport,
    protocol: Arc<P>,
    observer: Arc<dyn Observer<P::Frame>>,
    keep_alive: Duration,
}

impl<P: Protocol> Session<P> {
    pub fn new(
        transport: Transport,
        protocol: Arc<P>,
        observer: Arc<dyn Observer<P::Frame>>,
        keep_alive: Duration,
    ) -> Self {
        Self {
            transport,
            protocol,
            observer,
            keep_alive,
        }
    }

    /// Drive the session until it fails or shutdown is requested
    ///
    /// `current` holds the frame most recently taken for the wire. It is cleared
    /// only after a successful write, so a failed session leaves it in place for
    /// the next one.
    pub async fn run(
        self,
        queue: &mut QueueReceiver<P::Frame>,
        current: &mut Option<Pending<P::Frame>>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let Session {
            transport,
            protocol,
            observer,
            keep_alive,
        } = self;
        let (mut reader, mut writer) = transport.into_split();
        let heartbeat = Self::heartbeat_frame(&protocol, keep_alive);

        let end = tokio::select! {
            biased;
            _ = stopped(shutdown) => SessionEnd::Shutdown,
            end = sending(&mut *writer, queue, current, heartbeat) => end,
            err = receiving(&mut *reader, protocol.as_ref(), observer.as_ref()) => SessionEnd::Failed(err),
        };

        if let Err(e) = writer.close().await {
            debug!(error = %e, "error while closing transport");
        }
        end
    }

    fn heartbeat_frame(protocol: &P, keep_alive: Duration) -> Option<(Bytes, Duration)> {
        if keep_alive.is_zero() {
            return None;
        }
        let frame = protocol.heartbeat()?;
        match protocol.encode(&frame) {
            Ok(bytes) => Some((bytes, keep_alive)),
            Err(e) => {
                warn!(error = %e, "failed to encode heartbeat, keep-alive disabled");
                None
            }
        }
    }
}

/// Send loop: carried-over frame first, then the queue in FIFO order
async fn sending<F>(
    writer: &mut dyn FrameWriter,
    queue: &mut QueueReceiver<F>,
    current: &mut Option<Pending<F>>,
    heartbeat: Option<(Bytes, Duration)>,
) -> SessionEnd
where
    F: std::fmt::Debug,
{
    let mut ticker = heartbeat.map(|(bytes, period)| {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        (ticker, bytes)
    });

    loop {
        if current.is_none() {
            tokio::select! {
                item = queue.recv() => match item {
                    Some(pending) => *current = Some(pending),
                    None => return SessionEnd::QueueClosed,
                },
                bytes = next_heartbeat(&mut ticker) => {
                    trace!("writing heartbeat");
                    if let Err(e) = writer.write_frame(bytes).await {
                        return SessionEnd::Failed(e.into());
                    }
                    continue;
                }
            }
        }

        let Some(pending) = current.as_ref() else {
            continue;
        };
        if let Err(e) = writer.write_frame(pending.bytes.clone()).await {
            debug!(frame = ?pending.frame, "write failed, keeping frame in flight");
            return SessionEnd::Failed(e.into());
        }
        trace!(frame = ?pending.frame, "frame written");
        *current = None;
    }
}

async fn next_heartbeat(ticker: &mut Option<(Interval, Bytes)>) -> Bytes {
    match ticker {
        Some((interval, bytes)) => {
            interval.tick().await;
            bytes.clone()
        }
        None => std::future::pending().await,
    }
}

/// Receive loop: returns the error that ended it
async fn receiving<P: Protocol>(
    reader: &mut dyn FrameReader,
    protocol: &P,
    observer: &dyn Observer<P::Frame>,
) -> ClientError {
    loop {
        if let Err(e) = receive_one(reader, protocol, observer).await {
            return e;
        }
    }
}

async fn receive_one<P: Protocol>(
    reader: &mut dyn FrameReader,
    protocol: &P,
    observer: &dyn Observer<P::Frame>,
) -> Result<(), ClientError> {
    let bytes = match reader.read_frame().await {
        Ok(Some(bytes)) => bytes,
        Ok(None) | Err(TransportError::Closed) => return Err(ClientError::ConnectionLost),
        Err(e) => return Err(e.into()),
    };
    let frame = protocol.decode(&bytes)?;

    match protocol.classify(frame)? {
        Inbound::Message(frame) => {
            if let Err(e) = observer.on_message(&frame).await {
                warn!(error = %e, "observer failed to handle message");
            }
        }
        Inbound::Acknowledge(frame) => {
            if let Err(e) = observer.on_acknowledge(&frame).await {
                warn!(error = %e, "observer failed to handle acknowledgment");
            }
        }
        Inbound::Control => trace!(protocol = protocol.name(), "control frame consumed"),
    }
    Ok(())
}
