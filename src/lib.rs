//! brokerlink - auto-reconnecting duplex message clients
//!
//! A long-lived client keeps exactly one network session alive, reconnects
//! with exponential backoff when it fails, and decouples producers from the
//! network through a bounded outbound queue. The frame that was in flight
//! when a session died is resent first on the next one.
//!
//! # Overview
//!
//! - [`client::Client`] - generic reconnecting core over any [`protocol::Protocol`]
//! - [`mqtt::MqttClient`] - publish/subscribe variant with CONNECT/CONNACK handshake
//! - [`link::LinkClient`] - message stream plus unary request/reply calls
//! - [`observer::Observer`] - callbacks for inbound messages, acks and errors
//! - [`config::ServiceConfig`] - TOML configuration for both variants
//!
//! # Quick Start
//!
//! ```rust
//! use brokerlink::config::LinkSection;
//! use brokerlink::link::{LinkClient, Message};
//! use brokerlink::testing::MockConnector;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let connector = Arc::new(MockConnector::new());
//! let client = LinkClient::with_connector(
//!     &LinkSection::new("tcp://127.0.0.1:8273"),
//!     connector,
//!     None,
//! )?;
//!
//! client.send(Message::new(1, "sensors/temp", "21.5")).await?;
//! client.close().await?;
//! # Ok::<(), brokerlink::ClientError>(())
//! # });
//! ```

pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod link;
pub mod mqtt;
pub mod observability;
pub mod observer;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use backoff::{Backoff, BackoffConfig};
pub use client::{Client, ClientOptions, ConnectionState};
pub use config::{ConfigError, ServiceConfig};
pub use error::{ClientError, ClientResult, CodecError, TransportError};
pub use link::LinkClient;
pub use mqtt::MqttClient;
pub use observer::{NoopObserver, Observer};
