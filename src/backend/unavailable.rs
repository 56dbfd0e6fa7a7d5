// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Backend used when no native engine is compiled in.
//!
//! Initialization always fails, so every session creation reports the
//! backend unavailable instead of linking against llama.cpp.

use std::path::Path;

use super::{Backend, BackendError, ContextParams, ModelParams, NativeContext, TokenId, TokenizeOptions};
use crate::engine::SamplerChain;

/// Uninhabited: no model or context can exist without a native engine.
pub enum Never {}

/// Placeholder backend for builds without the `gguf` feature.
pub struct UnavailableBackend {
    never: Never,
}

impl UnavailableBackend {
    pub fn init() -> Result<Self, BackendError> {
        Err(BackendError::Init(
            "no native inference backend compiled in (enable the `gguf` feature)".into(),
        ))
    }
}

impl Backend for UnavailableBackend {
    type Model = Never;
    type Context = Never;

    fn name(&self) -> &'static str {
        match self.never {}
    }

    fn supports_gpu_offload(&self) -> bool {
        match self.never {}
    }

    fn load_model(&self, _path: &Path, _params: &ModelParams) -> Result<Never, BackendError> {
        match self.never {}
    }

    fn embedding_dim(&self, model: &Never) -> usize {
        match *model {}
    }

    fn new_context(&self, model: Never, _params: &ContextParams) -> Result<Never, BackendError> {
        match model {}
    }
}

impl NativeContext for Never {
    type Sampler = Never;

    fn tokenize(&self, _: &str, _: usize, _: TokenizeOptions) -> Result<Vec<TokenId>, BackendError> {
        match *self {}
    }

    fn token_to_piece(&mut self, _: TokenId, _: usize) -> Result<String, BackendError> {
        match *self {}
    }

    fn is_end_of_generation(&self, _: TokenId) -> bool {
        match *self {}
    }

    fn clear_memory(&mut self) {
        match *self {}
    }

    fn decode(&mut self, _: &[TokenId]) -> Result<(), BackendError> {
        match *self {}
    }

    fn build_sampler(&self, _: &SamplerChain) -> Never {
        match *self {}
    }

    fn sample(&mut self, _: &mut Never) -> TokenId {
        match *self {}
    }

    fn sequence_embeddings(&self, _: i32) -> Option<Vec<f32>> {
        match *self {}
    }

    fn context_embeddings(&self) -> Option<Vec<f32>> {
        match *self {}
    }
}
