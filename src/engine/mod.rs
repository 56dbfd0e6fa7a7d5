//! Inference engine module for GG-EDGE.
//!
//! Handles tokenization, the decode/sample generation loop, streaming
//! delivery, pooled embeddings and GPU offload negotiation. Everything here
//! is generic over [`crate::backend::NativeContext`].

pub mod config;
pub mod embed;
pub mod error;
pub mod generate;
pub mod gpu;
pub mod output;
pub mod sampler;
pub mod streaming;
pub mod tokenizer;

#[cfg(test)]
mod test_support;

pub use config::GenerationParams;
pub use embed::{embed, l2_normalize};
pub use error::{DecodeError, EmbedError, GenerateError, LoadError, TokenizeError};
pub use generate::{
    generate, generate_cancellable, generate_streaming, generate_streaming_cancellable, CancelCheck,
    STOP_MARKER,
};
pub use gpu::{load_with_fallback, resolve_layer_count, GpuPlacement, GpuRequest, ALL_LAYERS};
pub use output::{FinishReason, GenerationOutcome};
pub use sampler::{SamplerChain, SamplerStage, DEFAULT_SEED};
pub use streaming::{StreamEvent, StreamSender, TokenSink, TokenStream};
