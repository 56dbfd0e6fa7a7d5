// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! llama-cpp-2 backend for GGUF inference.
//!
//! Model loading, context creation, tokenization, decode and sampling via
//! the llama-cpp-2 Rust bindings.

use std::num::NonZeroU32;
use std::path::Path;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::token::LlamaToken;
use llama_cpp_2::{send_logs_to_tracing, LogOptions};

use super::{Backend, BackendError, ContextParams, ModelParams, NativeContext, TokenId, TokenizeOptions};
use crate::engine::tokenizer::truncate_to_char_boundary;
use crate::engine::{SamplerChain, SamplerStage};

/// The process-wide llama.cpp runtime.
pub struct LlamaCppBackend {
    backend: LlamaBackend,
}

impl LlamaCppBackend {
    /// Initialize llama.cpp. Only one instance may exist per process;
    /// [`super::BackendLifecycle`] guarantees that.
    pub fn init() -> Result<Self, BackendError> {
        send_logs_to_tracing(LogOptions::default());
        let backend = LlamaBackend::init().map_err(|e| BackendError::Init(e.to_string()))?;
        Ok(Self { backend })
    }
}

impl Backend for LlamaCppBackend {
    type Model = LlamaModel;
    type Context = LlamaSession;

    fn name(&self) -> &'static str {
        "llama.cpp"
    }

    fn supports_gpu_offload(&self) -> bool {
        self.backend.supports_gpu_offload()
    }

    fn load_model(&self, path: &Path, params: &ModelParams) -> Result<LlamaModel, BackendError> {
        let model_params = LlamaModelParams::default().with_n_gpu_layers(params.n_gpu_layers);
        LlamaModel::load_from_file(&self.backend, path, &model_params)
            .map_err(|e| BackendError::ModelLoad(e.to_string()))
    }

    fn embedding_dim(&self, model: &LlamaModel) -> usize {
        usize::try_from(model.n_embd()).unwrap_or(0)
    }

    fn new_context(
        &self,
        model: LlamaModel,
        params: &ContextParams,
    ) -> Result<LlamaSession, BackendError> {
        let model = Box::new(model);
        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(params.n_ctx))
            .with_n_threads(params.n_threads)
            .with_n_threads_batch(params.n_threads_batch)
            .with_embeddings(params.embeddings);
        let ctx = model
            .new_context(&self.backend, ctx_params)
            .map_err(|e| BackendError::Context(e.to_string()))?;
        // SAFETY: the context borrows the boxed model, whose heap address is
        // stable for the life of `LlamaSession`. Field order in
        // `LlamaSession` drops the context before the model.
        let ctx = unsafe { std::mem::transmute::<LlamaContext<'_>, LlamaContext<'static>>(ctx) };
        Ok(LlamaSession {
            ctx,
            model,
            n_past: 0,
            last_batch: 0,
            embeddings: params.embeddings,
            decoder: encoding_rs::UTF_8.new_decoder(),
        })
    }
}

/// A model and the context built on it.
pub struct LlamaSession {
    // Declared first: dropped before `model`.
    ctx: LlamaContext<'static>,
    model: Box<LlamaModel>,
    n_past: i32,
    last_batch: i32,
    embeddings: bool,
    decoder: encoding_rs::Decoder,
}

// SAFETY: a session is only touched by one thread at a time (the registry
// wraps it in a mutex); llama.cpp contexts have no thread affinity.
unsafe impl Send for LlamaSession {}

impl NativeContext for LlamaSession {
    type Sampler = LlamaSampler;

    fn tokenize(
        &self,
        text: &str,
        capacity: usize,
        options: TokenizeOptions,
    ) -> Result<Vec<TokenId>, BackendError> {
        let add_bos = if options.add_special { AddBos::Always } else { AddBos::Never };
        // llama-cpp-2 always parses special tokens from the raw text.
        let tokens = self
            .model
            .str_to_token(text, add_bos)
            .map_err(|e| BackendError::Tokenize(e.to_string()))?;
        if tokens.len() > capacity {
            return Err(BackendError::TokenBufferTooSmall { needed: tokens.len(), capacity });
        }
        Ok(tokens.into_iter().map(|t| t.0).collect())
    }

    fn token_to_piece(&mut self, token: TokenId, capacity: usize) -> Result<String, BackendError> {
        let piece = self
            .model
            .token_to_piece(LlamaToken(token), &mut self.decoder, false, None)
            .map_err(|e| BackendError::Detokenize(e.to_string()))?;
        Ok(truncate_to_char_boundary(&piece, capacity).to_string())
    }

    fn is_end_of_generation(&self, token: TokenId) -> bool {
        self.model.is_eog_token(LlamaToken(token))
    }

    fn clear_memory(&mut self) {
        self.ctx.clear_kv_cache();
        self.n_past = 0;
        self.last_batch = 0;
        self.decoder = encoding_rs::UTF_8.new_decoder();
    }

    fn decode(&mut self, tokens: &[TokenId]) -> Result<(), BackendError> {
        if tokens.is_empty() {
            return Err(BackendError::Decode("empty batch".into()));
        }
        let n = tokens.len();
        let mut batch = LlamaBatch::new(n, 1);
        for (i, &tok) in tokens.iter().enumerate() {
            // Pooled embeddings need every position; generation only the last.
            let logits = self.embeddings || i == n - 1;
            batch
                .add(LlamaToken(tok), self.n_past + i as i32, &[0], logits)
                .map_err(|e| BackendError::Decode(format!("batch: {e}")))?;
        }
        self.ctx
            .decode(&mut batch)
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        self.n_past += n as i32;
        self.last_batch = n as i32;
        Ok(())
    }

    fn build_sampler(&self, chain: &SamplerChain) -> LlamaSampler {
        let stages = chain.stages().iter().map(|stage| match *stage {
            SamplerStage::Penalties { last_n, repeat, frequency, presence } => {
                LlamaSampler::penalties(last_n, repeat, frequency, presence)
            }
            SamplerStage::TopK(k) => LlamaSampler::top_k(k),
            SamplerStage::TopP { p, min_keep } => LlamaSampler::top_p(p, min_keep),
            SamplerStage::Temperature(t) => LlamaSampler::temp(t),
            SamplerStage::Distribution { seed } => LlamaSampler::dist(seed),
        });
        LlamaSampler::chain_simple(stages)
    }

    fn sample(&mut self, sampler: &mut LlamaSampler) -> TokenId {
        // -1 samples from the last position that produced logits.
        sampler.sample(&self.ctx, -1).0
    }

    fn sequence_embeddings(&self, seq: i32) -> Option<Vec<f32>> {
        self.ctx.embeddings_seq_ith(seq).ok().map(<[f32]>::to_vec)
    }

    fn context_embeddings(&self) -> Option<Vec<f32>> {
        if self.last_batch == 0 {
            return None;
        }
        // Row 0 of the output buffer: every position of an embedding batch
        // produces output, so this is the batch's first token.
        self.ctx.embeddings_ith(0).ok().map(<[f32]>::to_vec)
    }
}
