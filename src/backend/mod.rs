// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Native inference backend seam for GG-EDGE.
//!
//! The engine never talks to llama.cpp directly. Everything it needs from a
//! native library (model loading, context construction, tokenization,
//! decode, sampling, embedding readout) goes through the [`Backend`] and
//! [`NativeContext`] traits so the session and generation logic can be
//! driven by the scripted [`mock::MockBackend`] in tests.

mod lifecycle;
#[cfg(feature = "gguf")]
pub mod llama;
pub mod mock;
mod unavailable;

use std::path::Path;

use thiserror::Error;

use crate::engine::SamplerChain;

pub use lifecycle::{BackendFactory, BackendLifecycle, LifecycleState};
pub use unavailable::UnavailableBackend;

/// Backend compiled into the process-wide runtime.
#[cfg(feature = "gguf")]
pub type DefaultBackend = llama::LlamaCppBackend;

/// Backend compiled into the process-wide runtime.
#[cfg(not(feature = "gguf"))]
pub type DefaultBackend = UnavailableBackend;

/// Model-defined token id.
pub type TokenId = i32;

/// Errors reported by a native backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend init failed: {0}")]
    Init(String),

    #[error("model load failed: {0}")]
    ModelLoad(String),

    #[error("context creation failed: {0}")]
    Context(String),

    #[error("token buffer too small: {needed} tokens, capacity {capacity}")]
    TokenBufferTooSmall { needed: usize, capacity: usize },

    #[error("tokenize failed: {0}")]
    Tokenize(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("detokenize failed: {0}")]
    Detokenize(String),

    #[error("unsupported by backend: {0}")]
    Unsupported(String),
}

/// Parameters applied when loading model weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModelParams {
    /// Layers offloaded to the accelerator (0 = CPU only).
    pub n_gpu_layers: u32,
}

/// Parameters applied when building an execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextParams {
    /// Context window in tokens (0 = model default).
    pub n_ctx: u32,
    /// Threads for single-token decode.
    pub n_threads: i32,
    /// Threads for batch (prompt) decode.
    pub n_threads_batch: i32,
    /// Pooled embedding output instead of logits.
    pub embeddings: bool,
}

/// Tokenizer switches passed through to the native tokenizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenizeOptions {
    /// Insert the leading beginning-of-sequence marker.
    pub add_special: bool,
    /// Parse control sequences such as `<|im_start|>` from the raw text.
    pub parse_special: bool,
}

impl Default for TokenizeOptions {
    fn default() -> Self {
        Self { add_special: true, parse_special: true }
    }
}

/// A native inference library.
///
/// Loading is split in two phases so a context failure can release the
/// already-loaded model: [`Backend::new_context`] consumes the model and
/// drops it when context construction fails.
pub trait Backend: Send + Sync + 'static {
    /// Loaded model weights.
    type Model: Send;
    /// Execution context that owns its model.
    type Context: NativeContext;

    /// Human-readable backend name for logs.
    fn name(&self) -> &'static str;

    /// Whether accelerated (GPU) execution is compiled in and usable.
    fn supports_gpu_offload(&self) -> bool;

    /// Load model weights from `path`.
    fn load_model(&self, path: &Path, params: &ModelParams) -> Result<Self::Model, BackendError>;

    /// Native embedding width of a loaded model.
    fn embedding_dim(&self, model: &Self::Model) -> usize;

    /// Build an execution context, taking ownership of `model`.
    fn new_context(
        &self,
        model: Self::Model,
        params: &ContextParams,
    ) -> Result<Self::Context, BackendError>;
}

/// An execution context bound to one model.
///
/// Dropping a context releases the native context before its model.
pub trait NativeContext: Send {
    /// Native sampler chain type.
    type Sampler;

    /// Tokenize `text` into at most `capacity` tokens.
    ///
    /// Fails with [`BackendError::TokenBufferTooSmall`] when the encoding
    /// does not fit; partial results are never returned.
    fn tokenize(
        &self,
        text: &str,
        capacity: usize,
        options: TokenizeOptions,
    ) -> Result<Vec<TokenId>, BackendError>;

    /// Surface text of one token, at most `capacity` bytes.
    fn token_to_piece(&mut self, token: TokenId, capacity: usize) -> Result<String, BackendError>;

    /// Whether `token` ends generation (EOS, EOT, ...).
    fn is_end_of_generation(&self, token: TokenId) -> bool;

    /// Forget every token decoded so far.
    fn clear_memory(&mut self);

    /// Decode `tokens` as one batch appended to the current memory.
    fn decode(&mut self, tokens: &[TokenId]) -> Result<(), BackendError>;

    /// Build a native sampler for `chain`.
    fn build_sampler(&self, chain: &SamplerChain) -> Self::Sampler;

    /// Draw one token from the logits of the last decoded position.
    fn sample(&mut self, sampler: &mut Self::Sampler) -> TokenId;

    /// Pooled embedding of sequence `seq`, if the context produced one.
    fn sequence_embeddings(&self, seq: i32) -> Option<Vec<f32>>;

    /// Context-wide embedding of the last decoded position.
    fn context_embeddings(&self) -> Option<Vec<f32>>;
}
