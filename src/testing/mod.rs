//! Testing utilities and mock implementations
//!
//! In-memory connectors and observers for exercising the clients without a
//! broker or server.

pub mod mocks;

pub use mocks::*;
