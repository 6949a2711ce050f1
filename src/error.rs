//! Error types for the reconnecting clients
//!
//! Errors fall into two groups. Connection-facing failures (dial, I/O, protocol
//! rejection, malformed frames) are recovered by the supervisor and only reach
//! the application through the observer. Caller-facing failures (closed client,
//! cancellation, oversize message) are returned synchronously from `send`/`call`.

use crate::config::ConfigError;
use crate::mqtt::ReturnCode;
use thiserror::Error;

/// Errors raised by a frame transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connection closed by peer")]
    Closed,
    #[error("Frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Unsupported address scheme: {0}")]
    UnsupportedScheme(String),
    #[error("TLS configuration error: {0}")]
    Tls(String),
    #[error("Transport operation timed out")]
    Timeout,
}

/// Errors raised while encoding or decoding wire frames
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("Failed to decode frame: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("Malformed MQTT packet: {0}")]
    Mqtt(#[from] rumqttc::mqttbytes::Error),
    #[error("Unsupported MQTT packet: {0}")]
    UnsupportedPacket(&'static str),
    #[error("{0} trailing bytes after MQTT packet")]
    TrailingBytes(usize),
}

/// Main error type for client operations
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client is closed")]
    ClientClosed,

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    Timeout,

    #[error("message of {size} bytes exceeds the {max} byte limit")]
    MessageTooLarge { size: usize, max: usize },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("connection lost")]
    ConnectionLost,

    #[error("connection refused: {0}")]
    ConnectionRefused(ReturnCode),

    #[error("unexpected packet: expected {expected}, got {actual}")]
    UnexpectedPacket {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("subscription failed")]
    SubscriptionFailed,

    #[error("connect attempt timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("no tokio runtime available to drive the client")]
    NoRuntime,

    #[error("client worker failed: {0}")]
    Fatal(String),
}

impl ClientError {
    /// Whether the supervisor recovers from this error by reconnecting.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::Transport(_)
                | ClientError::Codec(_)
                | ClientError::ConnectionLost
                | ClientError::ConnectionRefused(_)
                | ClientError::UnexpectedPacket { .. }
                | ClientError::SubscriptionFailed
                | ClientError::ConnectTimeout(_)
        )
    }

    pub(crate) fn unexpected(expected: &'static str, actual: &'static str) -> Self {
        Self::UnexpectedPacket { expected, actual }
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
