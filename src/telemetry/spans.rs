//! Span utilities and extension traits for GG-EDGE tracing.
//!
//! Provides standardized span creation and result recording.

use tracing::{info_span, Span};

/// Extension trait for adding context to spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for per-call session spans.
///
/// Fields left empty at creation:
/// - `status` / `error.message`: filled by [`SpanExt::record_result`]
/// - `latency_ms`: filled after the call returns
/// - `tokens_generated` (generation only) / `dimension` (embedding only)
pub struct SessionSpan;

impl SessionSpan {
    /// Span for one generation call.
    pub fn generate(handle: u64, streaming: bool) -> Span {
        info_span!(
            "generate",
            handle,
            streaming,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
            tokens_generated = tracing::field::Empty,
        )
    }

    /// Span for one embedding call.
    pub fn embed(handle: u64) -> Span {
        info_span!(
            "embed",
            handle,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
            dimension = tracing::field::Empty,
        )
    }

    /// Span for session creation.
    pub fn create(kind: &'static str, model: &str) -> Span {
        info_span!(
            "create_session",
            kind,
            model = %model,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
        )
    }
}
