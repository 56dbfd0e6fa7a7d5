// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Scripted in-process backend.
//!
//! Replays a fixed sequence of generated pieces, tokenizes one token per
//! character, and records every native call so tests can check release
//! ordering, leak freedom and decode counts without a model file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Backend, BackendError, ContextParams, ModelParams, NativeContext, TokenId, TokenizeOptions};
use crate::engine::tokenizer::truncate_to_char_boundary;
use crate::engine::SamplerChain;

/// Beginning-of-sequence token.
pub const BOS: TokenId = 1;
/// End-of-sequence token.
pub const EOS: TokenId = 2;
/// `<|im_start|>` control token.
pub const IM_START: TokenId = 3;
/// `<|im_end|>` control token.
pub const IM_END: TokenId = 4;

const SCRIPT_BASE: TokenId = 100;
const CHAR_BASE: TokenId = 10_000;

const SPECIALS: &[(&str, TokenId)] = &[("<|im_start|>", IM_START), ("<|im_end|>", IM_END)];

/// Counters and call records shared by every object a [`MockBackend`] hands out.
#[derive(Debug, Clone, Default)]
pub struct MockStats {
    pub inits: usize,
    pub models_live: usize,
    pub contexts_live: usize,
    pub samplers_live: usize,
    pub samplers_built: usize,
    pub decode_calls: usize,
    /// GPU layer count of each load attempt, in order.
    pub load_attempts: Vec<u32>,
    pub last_context_params: Option<ContextParams>,
    pub last_sampler: Option<SamplerChain>,
    /// "context" / "model", in release order.
    pub releases: Vec<&'static str>,
}

#[derive(Debug, Clone)]
struct MockConfig {
    gpu_available: bool,
    fail_init: bool,
    fail_load: bool,
    fail_gpu_load: bool,
    fail_context: bool,
    fail_tokenize: bool,
    bos_on_empty: bool,
    script: Vec<String>,
    fail_decode_at: Option<usize>,
    embedding: Vec<f32>,
    seq_embeddings: bool,
    context_embeddings: bool,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            gpu_available: false,
            fail_init: false,
            fail_load: false,
            fail_gpu_load: false,
            fail_context: false,
            fail_tokenize: false,
            bos_on_empty: false,
            script: Vec::new(),
            fail_decode_at: None,
            embedding: Vec::new(),
            seq_embeddings: true,
            context_embeddings: true,
        }
    }
}

/// Scripted backend for tests and benches.
///
/// Clones share their counters, so a clone handed to a runtime factory can
/// be inspected from the test afterwards.
#[derive(Clone, Default)]
pub struct MockBackend {
    config: Arc<MockConfig>,
    stats: Arc<Mutex<MockStats>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn configure(mut self, f: impl FnOnce(&mut MockConfig)) -> Self {
        f(Arc::make_mut(&mut self.config));
        self
    }

    /// Report accelerated execution as available.
    pub fn with_gpu(self) -> Self {
        self.configure(|c| c.gpu_available = true)
    }

    /// Pieces produced by successive draws, followed by end-of-sequence.
    pub fn with_script<I, S>(self, pieces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let script = pieces.into_iter().map(Into::into).collect();
        self.configure(|c| c.script = script)
    }

    /// Raw (unnormalized) pooled embedding; its length is the model width.
    pub fn with_embedding(self, vector: Vec<f32>) -> Self {
        self.configure(|c| c.embedding = vector)
    }

    /// Insert BOS even for empty text.
    pub fn with_bos_on_empty(self) -> Self {
        self.configure(|c| c.bos_on_empty = true)
    }

    pub fn fail_init(self) -> Self {
        self.configure(|c| c.fail_init = true)
    }

    pub fn fail_load(self) -> Self {
        self.configure(|c| c.fail_load = true)
    }

    /// Fail any load that offloads at least one layer.
    pub fn fail_gpu_load(self) -> Self {
        self.configure(|c| c.fail_gpu_load = true)
    }

    pub fn fail_context(self) -> Self {
        self.configure(|c| c.fail_context = true)
    }

    /// Report every tokenization as a native failure.
    pub fn fail_tokenize(self) -> Self {
        self.configure(|c| c.fail_tokenize = true)
    }

    /// Fail the `n`th decode after each memory clear (0 = prompt decode).
    pub fn fail_decode_at(self, n: usize) -> Self {
        self.configure(|c| c.fail_decode_at = Some(n))
    }

    pub fn without_sequence_embeddings(self) -> Self {
        self.configure(|c| c.seq_embeddings = false)
    }

    pub fn without_embeddings(self) -> Self {
        self.configure(|c| {
            c.seq_embeddings = false;
            c.context_embeddings = false;
        })
    }

    /// Factory entry point used by [`super::BackendLifecycle`].
    pub fn init(&self) -> Result<Self, BackendError> {
        self.stats.lock().inits += 1;
        if self.config.fail_init {
            return Err(BackendError::Init("mock backend configured to fail".into()));
        }
        Ok(self.clone())
    }

    /// Snapshot of the shared counters.
    pub fn stats(&self) -> MockStats {
        self.stats.lock().clone()
    }
}

/// Weights handed out by [`MockBackend::load_model`].
pub struct MockModel {
    path: PathBuf,
    embedding_dim: usize,
    stats: Arc<Mutex<MockStats>>,
}

impl MockModel {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MockModel {
    fn drop(&mut self) {
        let mut stats = self.stats.lock();
        stats.models_live -= 1;
        stats.releases.push("model");
    }
}

/// Context handed out by [`MockBackend::new_context`].
pub struct MockContext {
    config: Arc<MockConfig>,
    stats: Arc<Mutex<MockStats>>,
    params: ContextParams,
    cursor: usize,
    decodes_since_clear: usize,
    memory: Vec<TokenId>,
    // Released after the context itself (see Drop).
    _model: MockModel,
}

impl Drop for MockContext {
    fn drop(&mut self) {
        let mut stats = self.stats.lock();
        stats.contexts_live -= 1;
        stats.releases.push("context");
    }
}

/// Sampler handed out by [`MockContext::build_sampler`].
pub struct MockSampler {
    stats: Arc<Mutex<MockStats>>,
}

impl Drop for MockSampler {
    fn drop(&mut self) {
        self.stats.lock().samplers_live -= 1;
    }
}

impl Backend for MockBackend {
    type Model = MockModel;
    type Context = MockContext;

    fn name(&self) -> &'static str {
        "mock"
    }

    fn supports_gpu_offload(&self) -> bool {
        self.config.gpu_available
    }

    fn load_model(&self, path: &Path, params: &ModelParams) -> Result<MockModel, BackendError> {
        let mut stats = self.stats.lock();
        stats.load_attempts.push(params.n_gpu_layers);
        if self.config.fail_load {
            return Err(BackendError::ModelLoad("mock backend configured to fail".into()));
        }
        if params.n_gpu_layers > 0 && self.config.fail_gpu_load {
            return Err(BackendError::ModelLoad("mock GPU offload failed".into()));
        }
        if !path.is_file() {
            return Err(BackendError::ModelLoad(format!("no such file: {}", path.display())));
        }
        stats.models_live += 1;
        Ok(MockModel {
            path: path.to_path_buf(),
            embedding_dim: self.config.embedding.len(),
            stats: self.stats.clone(),
        })
    }

    fn embedding_dim(&self, model: &MockModel) -> usize {
        model.embedding_dim
    }

    fn new_context(
        &self,
        model: MockModel,
        params: &ContextParams,
    ) -> Result<MockContext, BackendError> {
        if self.config.fail_context {
            // `model` is dropped here, releasing it.
            return Err(BackendError::Context("mock backend configured to fail".into()));
        }
        let mut stats = self.stats.lock();
        stats.contexts_live += 1;
        stats.last_context_params = Some(*params);
        Ok(MockContext {
            config: self.config.clone(),
            stats: self.stats.clone(),
            params: *params,
            cursor: 0,
            decodes_since_clear: 0,
            memory: Vec::new(),
            _model: model,
        })
    }
}

impl MockContext {
    /// Tokens decoded since the last clear.
    pub fn memory(&self) -> &[TokenId] {
        &self.memory
    }

    fn piece(&self, token: TokenId) -> Option<String> {
        match token {
            BOS | EOS => Some(String::new()),
            _ => {
                if let Some((text, _)) = SPECIALS.iter().find(|(_, id)| *id == token) {
                    return Some((*text).to_string());
                }
                if token >= CHAR_BASE {
                    return u32::try_from(token - CHAR_BASE)
                        .ok()
                        .and_then(char::from_u32)
                        .map(String::from);
                }
                let index = usize::try_from(token - SCRIPT_BASE).ok()?;
                self.config.script.get(index).cloned()
            }
        }
    }
}

impl NativeContext for MockContext {
    type Sampler = MockSampler;

    fn tokenize(
        &self,
        text: &str,
        capacity: usize,
        options: TokenizeOptions,
    ) -> Result<Vec<TokenId>, BackendError> {
        if self.config.fail_tokenize {
            return Err(BackendError::Tokenize("mock tokenizer failure".into()));
        }
        let mut tokens = Vec::new();
        if options.add_special && (!text.is_empty() || self.config.bos_on_empty) {
            tokens.push(BOS);
        }
        let mut rest = text;
        while let Some(c) = rest.chars().next() {
            let special = SPECIALS
                .iter()
                .find(|(marker, _)| options.parse_special && rest.starts_with(marker));
            match special {
                Some((marker, id)) => {
                    tokens.push(*id);
                    rest = &rest[marker.len()..];
                }
                None => {
                    tokens.push(CHAR_BASE + c as TokenId);
                    rest = &rest[c.len_utf8()..];
                }
            }
        }
        if tokens.len() > capacity {
            return Err(BackendError::TokenBufferTooSmall { needed: tokens.len(), capacity });
        }
        Ok(tokens)
    }

    fn token_to_piece(&mut self, token: TokenId, capacity: usize) -> Result<String, BackendError> {
        let piece = self
            .piece(token)
            .ok_or_else(|| BackendError::Detokenize(format!("unknown token {token}")))?;
        Ok(truncate_to_char_boundary(&piece, capacity).to_string())
    }

    fn is_end_of_generation(&self, token: TokenId) -> bool {
        token == EOS
    }

    fn clear_memory(&mut self) {
        self.memory.clear();
        self.cursor = 0;
        self.decodes_since_clear = 0;
    }

    fn decode(&mut self, tokens: &[TokenId]) -> Result<(), BackendError> {
        self.stats.lock().decode_calls += 1;
        let call = self.decodes_since_clear;
        self.decodes_since_clear += 1;
        if tokens.is_empty() {
            return Err(BackendError::Decode("empty batch".into()));
        }
        if self.config.fail_decode_at == Some(call) {
            return Err(BackendError::Decode(format!("mock decode failure at call {call}")));
        }
        self.memory.extend_from_slice(tokens);
        Ok(())
    }

    fn build_sampler(&self, chain: &SamplerChain) -> MockSampler {
        let mut stats = self.stats.lock();
        stats.samplers_live += 1;
        stats.samplers_built += 1;
        stats.last_sampler = Some(chain.clone());
        MockSampler { stats: self.stats.clone() }
    }

    fn sample(&mut self, _sampler: &mut MockSampler) -> TokenId {
        if self.cursor < self.config.script.len() {
            let token = SCRIPT_BASE + self.cursor as TokenId;
            self.cursor += 1;
            token
        } else {
            EOS
        }
    }

    fn sequence_embeddings(&self, seq: i32) -> Option<Vec<f32>> {
        let ready = self.params.embeddings && !self.memory.is_empty();
        (ready && seq == 0 && self.config.seq_embeddings).then(|| self.config.embedding.clone())
    }

    fn context_embeddings(&self) -> Option<Vec<f32>> {
        let ready = self.params.embeddings && !self.memory.is_empty();
        (ready && self.config.context_embeddings).then(|| self.config.embedding.clone())
    }
}
