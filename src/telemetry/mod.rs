//! Telemetry module for GG-EDGE.
//!
//! Structured logging setup and span helpers. Everything is emitted through
//! `tracing`; the host decides where it goes by installing a subscriber or
//! calling [`init_logging`].

mod logging;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use spans::{SessionSpan, SpanExt};
