//! Bounded outbound queue between producers and the active session
//!
//! Producers block while the queue is full. Every blocked producer is released
//! with `ClientClosed` the moment shutdown begins, or with `Cancelled` when its
//! own cancellation future fires first.

use super::lifecycle::stopped;
use crate::error::ClientError;
use bytes::Bytes;
use std::future::Future;
use tokio::sync::{mpsc, watch};

/// A frame accepted for delivery, together with its encoded bytes
#[derive(Debug, Clone)]
pub(crate) struct Pending<F> {
    pub frame: F,
    pub bytes: Bytes,
}

/// Producer side of the outbound queue
#[derive(Debug)]
pub(crate) struct QueueSender<F> {
    tx: mpsc::Sender<Pending<F>>,
}

/// Worker side of the outbound queue
pub(crate) type QueueReceiver<F> = mpsc::Receiver<Pending<F>>;

/// Create a FIFO queue holding at most `capacity` pending frames
pub(crate) fn bounded<F>(capacity: usize) -> (QueueSender<F>, QueueReceiver<F>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (QueueSender { tx }, rx)
}

impl<F> QueueSender<F> {
    /// Enqueue, waiting for capacity until shutdown or `cancel` fires
    pub async fn enqueue_until<C>(
        &self,
        item: Pending<F>,
        mut shutdown: watch::Receiver<bool>,
        cancel: C,
    ) -> Result<(), ClientError>
    where
        C: Future<Output = ()>,
    {
        if *shutdown.borrow() {
            return Err(ClientError::ClientClosed);
        }

        tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => Err(ClientError::ClientClosed),
            permit = self.tx.reserve() => {
                let permit = permit.map_err(|_| ClientError::ClientClosed)?;
                permit.send(item);
                Ok(())
            }
            _ = cancel => Err(ClientError::Cancelled),
        }
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}
