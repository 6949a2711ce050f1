//! Wire protocol seam between the client core and a concrete protocol
//!
//! A [`Protocol`] knows how to turn its frame type into bytes and back, how to
//! greet the server on a fresh transport, and how to classify inbound frames.
//! The client core stays ignorant of packet layouts.

use crate::error::{ClientError, CodecError};
use crate::transport::Transport;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Debug;

pub mod codec;

pub use codec::JsonCodec;

/// Classification of an inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound<F> {
    /// Payload-bearing message for the observer
    Message(F),
    /// Acknowledgment of something this client sent
    Acknowledge(F),
    /// Protocol control frame consumed internally
    Control,
}

/// Encoding, handshake and classification rules for one wire protocol
#[async_trait]
pub trait Protocol: Send + Sync + 'static {
    type Frame: Clone + Debug + Send + Sync + 'static;

    /// Short protocol name used in logs
    fn name(&self) -> &'static str;

    fn encode(&self, frame: &Self::Frame) -> Result<Bytes, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<Self::Frame, CodecError>;

    /// Exchange greeting frames on a freshly established transport
    async fn handshake(&self, transport: &mut Transport) -> Result<(), ClientError> {
        let _ = transport;
        Ok(())
    }

    /// Decide where an inbound frame goes. An error terminates the session.
    fn classify(&self, frame: Self::Frame) -> Result<Inbound<Self::Frame>, ClientError>;

    /// Frame written periodically to keep an idle session alive
    fn heartbeat(&self) -> Option<Self::Frame> {
        None
    }
}
