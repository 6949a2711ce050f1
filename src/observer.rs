//! Observer callbacks for inbound traffic and connection errors
//!
//! Every method has a no-op default, so callers implement only what they need.
//! Errors returned from `on_message`/`on_acknowledge` are logged by the session
//! and never tear down the connection.

use crate::error::ClientError;
use async_trait::async_trait;

/// Error type returned by observer callbacks
pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

/// Capability set notified by the session and supervisor
#[async_trait]
pub trait Observer<F: Send + Sync + 'static>: Send + Sync {
    /// Payload-bearing inbound frame
    async fn on_message(&self, frame: &F) -> Result<(), ObserverError> {
        let _ = frame;
        Ok(())
    }

    /// Acknowledgment for a frame this client sent
    async fn on_acknowledge(&self, frame: &F) -> Result<(), ObserverError> {
        let _ = frame;
        Ok(())
    }

    /// Transient connection failure; the client keeps reconnecting
    async fn on_error(&self, error: &ClientError) {
        let _ = error;
    }
}

/// Observer that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl<F: Send + Sync + 'static> Observer<F> for NoopObserver {}
