//! Frame transport abstraction
//!
//! The client core never dials sockets itself. It asks a [`Connector`] for a
//! [`Transport`], a duplex byte-frame channel that can be split into an
//! independent reader and writer so the session can receive while it sends.

use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;

pub mod tcp;
pub mod tls;

pub use tcp::{Framing, TcpConnector};
pub use tls::TlsSettings;

/// Read half of a frame transport
#[async_trait]
pub trait FrameReader: Send {
    /// Read the next frame. `Ok(None)` means the peer closed the stream cleanly.
    async fn read_frame(&mut self) -> Result<Option<Bytes>, TransportError>;
}

/// Write half of a frame transport
#[async_trait]
pub trait FrameWriter: Send {
    async fn write_frame(&mut self, frame: Bytes) -> Result<(), TransportError>;

    /// Flush and shut down the write direction
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Establishes one network session per call
///
/// Implementations own address resolution, TLS and credential material.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Transport, TransportError>;
}

/// One established duplex frame channel
pub struct Transport {
    reader: Box<dyn FrameReader>,
    writer: Box<dyn FrameWriter>,
}

impl Transport {
    pub fn new(reader: Box<dyn FrameReader>, writer: Box<dyn FrameWriter>) -> Self {
        Self { reader, writer }
    }

    pub async fn read_frame(&mut self) -> Result<Option<Bytes>, TransportError> {
        self.reader.read_frame().await
    }

    pub async fn write_frame(&mut self, frame: Bytes) -> Result<(), TransportError> {
        self.writer.write_frame(frame).await
    }

    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.writer.close().await
    }

    /// Read the next frame, treating a clean end of stream as an error
    pub async fn expect_frame(&mut self) -> Result<Bytes, TransportError> {
        self.read_frame().await?.ok_or(TransportError::Closed)
    }

    pub fn into_split(self) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        (self.reader, self.writer)
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}
