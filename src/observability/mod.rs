//! Observability setup
//!
//! The clients only emit `tracing` events and spans. This module installs a
//! subscriber for applications that do not bring their own.

pub mod logging;

pub use logging::{init_default_logging, init_from_config, init_logging, LogFormat, LoggingGuard};

// Span macros for structured logging
pub use logging::{call_span, session_span};
