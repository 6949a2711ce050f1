//! Link request/stream variant
//!
//! One long-lived stream carries queued messages in both directions. Unary
//! calls use a dedicated connection per request and match the reply by id.

mod client;
mod message;
mod protocol;

pub use client::LinkClient;
pub use message::{Message, MessageKind};
pub use protocol::{LinkProtocol, Metadata};
