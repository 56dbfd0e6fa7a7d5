// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Handle-based session runtime.
//!
//! [`Runtime`] is the boundary a host binds to. It owns the backend
//! lifecycle and one handle registry per session kind. Two flavours of every
//! operation exist:
//!
//! - sentinel-returning calls (`create_session`, `generate`, `embed`, ...)
//!   that map every failure to `0`, an empty string or `None` and log it,
//! - typed `try_*` calls that return the error.
//!
//! Calls on one handle are serialized by that session's mutex; distinct
//! handles run concurrently.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::backend::{Backend, BackendFactory, BackendLifecycle, LifecycleState};
use crate::config::EdgeConfig;
use crate::engine::{
    CancelCheck, EmbedError, GenerateError, GenerationOutcome, GenerationParams, GpuRequest,
    LoadError, TokenSink, TokenStream,
};
use crate::models::{
    EmbeddingSession, EmbeddingSessionInfo, InferenceSession, SessionHandle, SessionInfo,
    SessionOptions, SessionRegistry,
};
use crate::telemetry::{SessionSpan, SpanExt};

/// Events buffered between a blocking generator and its async consumer.
pub const STREAM_BUFFER: usize = 64;

type Generation<B> = InferenceSession<<B as Backend>::Context>;
type Embedding<B> = EmbeddingSession<<B as Backend>::Context>;

/// Session runtime over a native backend.
pub struct Runtime<B: Backend> {
    lifecycle: BackendLifecycle<B>,
    sessions: SessionRegistry<Generation<B>>,
    embedding_sessions: SessionRegistry<Embedding<B>>,
    config: EdgeConfig,
}

impl<B: Backend> Runtime<B> {
    /// Runtime with default configuration. The backend is built by `factory`
    /// on first use.
    pub fn new(factory: BackendFactory<B>) -> Self {
        Self::with_config(factory, EdgeConfig::default())
    }

    pub fn with_config(factory: BackendFactory<B>, config: EdgeConfig) -> Self {
        Self {
            lifecycle: BackendLifecycle::new(factory),
            sessions: SessionRegistry::new(),
            embedding_sessions: SessionRegistry::new(),
            config,
        }
    }

    pub fn config(&self) -> &EdgeConfig {
        &self.config
    }

    pub fn backend_state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Whether accelerated execution is available. Initializes the backend.
    pub fn gpu_available(&self) -> bool {
        self.lifecycle
            .with_backend(|backend| backend.supports_gpu_offload())
            .unwrap_or(false)
    }

    /// Generation parameters from the configured defaults.
    pub fn default_params(&self) -> GenerationParams {
        self.config.generation.params()
    }

    /// Session shape for boundary arguments; non-positive values take the
    /// configured defaults.
    pub fn session_options(&self, context_size: i32, threads: i32) -> SessionOptions {
        let context_size = u32::try_from(context_size)
            .ok()
            .filter(|&n| n > 0)
            .unwrap_or(self.config.session.n_ctx);
        let threads = if threads > 0 { threads } else { self.config.session.n_threads };
        SessionOptions::new(context_size, threads)
    }

    /// Run a session constructor against the backend. Shutdown waits until
    /// `create` has returned and its session is registered.
    fn with_backend<T>(&self, create: impl FnOnce(&B) -> Result<T, LoadError>) -> Result<T, LoadError> {
        self.lifecycle
            .with_backend(create)
            .unwrap_or_else(|e| Err(LoadError::BackendUnavailable(e.to_string())))
    }

    // ---- generation sessions ----

    pub fn try_create_session(
        &self,
        path: impl AsRef<Path>,
        options: SessionOptions,
        gpu: GpuRequest,
    ) -> Result<SessionHandle, LoadError> {
        let path = path.as_ref();
        let span = SessionSpan::create("generation", &path.display().to_string());
        let _guard = span.enter();

        let result = self.with_backend(|backend| {
            InferenceSession::create(backend, path, options, gpu).map(|session| self.sessions.insert(session))
        });
        span.record_result(&result);
        result
    }

    /// Create a generation session with the configured GPU preference.
    /// Returns 0 on failure.
    pub fn create_session(&self, path: &str, context_size: i32, threads: i32) -> u64 {
        let options = self.session_options(context_size, threads);
        self.handle_or_zero(self.try_create_session(path, options, self.config.session.gpu_request()))
    }

    /// Create a generation session, offloading `gpu_layers` layers (-1 = all)
    /// when `use_gpu` is set. Returns 0 on failure.
    pub fn create_session_with_gpu(
        &self,
        path: &str,
        context_size: i32,
        threads: i32,
        use_gpu: bool,
        gpu_layers: i32,
    ) -> u64 {
        let options = self.session_options(context_size, threads);
        let gpu = GpuRequest { enabled: use_gpu, layers: gpu_layers };
        self.handle_or_zero(self.try_create_session(path, options, gpu))
    }

    fn handle_or_zero(&self, result: Result<SessionHandle, LoadError>) -> u64 {
        match result {
            Ok(handle) => handle.id(),
            Err(e) => {
                error!(error = %e, "Session creation failed");
                0
            }
        }
    }

    pub fn is_using_gpu(&self, handle: u64) -> bool {
        self.sessions
            .get(SessionHandle::from_raw(handle))
            .is_some_and(|session| session.lock().placement().using_gpu)
    }

    pub fn gpu_layers(&self, handle: u64) -> i32 {
        self.sessions
            .get(SessionHandle::from_raw(handle))
            .map(|session| i32::try_from(session.lock().placement().gpu_layers).unwrap_or(i32::MAX))
            .unwrap_or(0)
    }

    pub fn session_info(&self, handle: u64) -> Option<SessionInfo> {
        self.sessions
            .get(SessionHandle::from_raw(handle))
            .map(|session| session.lock().info().clone())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn try_generate(
        &self,
        handle: SessionHandle,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<GenerationOutcome, GenerateError> {
        self.generate_cancellable(handle, prompt, params, None)
    }

    /// [`Self::try_generate`] with [`Self::default_params`].
    pub fn try_generate_default(
        &self,
        handle: SessionHandle,
        prompt: &str,
    ) -> Result<GenerationOutcome, GenerateError> {
        self.try_generate(handle, prompt, &self.default_params())
    }

    pub fn generate_cancellable(
        &self,
        handle: SessionHandle,
        prompt: &str,
        params: &GenerationParams,
        is_cancelled: Option<CancelCheck<'_>>,
    ) -> Result<GenerationOutcome, GenerateError> {
        let span = SessionSpan::generate(handle.id(), false);
        let _guard = span.enter();
        let start = Instant::now();

        let result = self
            .sessions
            .get(handle)
            .ok_or(GenerateError::InvalidHandle(handle.id()))
            .and_then(|session| session.lock().generate(prompt, params, is_cancelled));

        record_generation(&span, &result, start);
        result
    }

    /// Generate text. Returns an empty string on any failure.
    pub fn generate(
        &self,
        handle: u64,
        prompt: &str,
        max_tokens: i32,
        temperature: f32,
        top_p: f32,
        top_k: i32,
    ) -> String {
        let params = GenerationParams::new(max_tokens, temperature, top_p, top_k);
        match self.try_generate(SessionHandle::from_raw(handle), prompt, &params) {
            Ok(outcome) => outcome.text,
            Err(e) => {
                error!(handle, error = %e, "Generation failed");
                String::new()
            }
        }
    }

    /// Stream generated text into `sink`, which receives exactly one
    /// terminal event. An invalid handle is reported through `on_error`.
    pub fn generate_streaming_cancellable<S: TokenSink + ?Sized>(
        &self,
        handle: SessionHandle,
        prompt: &str,
        params: &GenerationParams,
        sink: &mut S,
        is_cancelled: Option<CancelCheck<'_>>,
    ) -> Result<GenerationOutcome, GenerateError> {
        let span = SessionSpan::generate(handle.id(), true);
        let _guard = span.enter();
        let start = Instant::now();

        let result = match self.sessions.get(handle) {
            Some(session) => session.lock().generate_streaming(prompt, params, sink, is_cancelled),
            None => {
                let e = GenerateError::InvalidHandle(handle.id());
                sink.on_error(&e.to_string());
                Err(e)
            }
        };

        record_generation(&span, &result, start);
        result
    }

    #[allow(clippy::too_many_arguments)]
    pub fn generate_streaming<S: TokenSink + ?Sized>(
        &self,
        handle: u64,
        prompt: &str,
        max_tokens: i32,
        temperature: f32,
        top_p: f32,
        top_k: i32,
        sink: &mut S,
    ) {
        let params = GenerationParams::new(max_tokens, temperature, top_p, top_k);
        if let Err(e) =
            self.generate_streaming_cancellable(SessionHandle::from_raw(handle), prompt, &params, sink, None)
        {
            error!(handle, error = %e, "Streaming generation failed");
        }
    }

    /// Run streaming generation on a blocking worker and return the event
    /// stream. Dropping the stream cancels generation at the next token.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_stream(
        self: &Arc<Self>,
        handle: SessionHandle,
        prompt: impl Into<String>,
        params: GenerationParams,
    ) -> TokenStream {
        let (mut sender, stream) = TokenStream::new(STREAM_BUFFER);
        let watcher = sender.clone();
        let runtime = Arc::clone(self);
        let prompt = prompt.into();

        tokio::task::spawn_blocking(move || {
            let consumer_gone = move || watcher.is_closed();
            let _ = runtime.generate_streaming_cancellable(
                handle,
                &prompt,
                &params,
                &mut sender,
                Some(&consumer_gone),
            );
        });
        stream
    }

    /// Release a generation session. Zero, unknown and already-freed
    /// handles are a logged no-op.
    pub fn free_session(&self, handle: u64) {
        match self.sessions.remove(SessionHandle::from_raw(handle)) {
            Some(_) => info!(handle, "Generation session freed"),
            None => warn!(handle, "free_session called with an invalid handle"),
        }
    }

    // ---- embedding sessions ----

    pub fn try_create_embedding_session(
        &self,
        path: impl AsRef<Path>,
        options: SessionOptions,
    ) -> Result<SessionHandle, LoadError> {
        let path = path.as_ref();
        let span = SessionSpan::create("embedding", &path.display().to_string());
        let _guard = span.enter();

        let result = self.with_backend(|backend| {
            EmbeddingSession::create(backend, path, options).map(|session| self.embedding_sessions.insert(session))
        });
        span.record_result(&result);
        result
    }

    /// Create a CPU-only embedding session. Returns 0 on failure.
    pub fn create_embedding_session(&self, path: &str, context_size: i32, threads: i32) -> u64 {
        let options = self.session_options(context_size, threads);
        self.handle_or_zero(self.try_create_embedding_session(path, options))
    }

    /// Embedding width of a session, 0 for an invalid handle.
    pub fn embedding_dimension(&self, handle: u64) -> i32 {
        self.embedding_sessions
            .get(SessionHandle::from_raw(handle))
            .map(|session| i32::try_from(session.lock().dimension()).unwrap_or(i32::MAX))
            .unwrap_or(0)
    }

    pub fn embedding_session_info(&self, handle: u64) -> Option<EmbeddingSessionInfo> {
        self.embedding_sessions
            .get(SessionHandle::from_raw(handle))
            .map(|session| session.lock().info().clone())
    }

    pub fn embedding_session_count(&self) -> usize {
        self.embedding_sessions.len()
    }

    pub fn try_embed(&self, handle: SessionHandle, text: &str) -> Result<Vec<f32>, EmbedError> {
        let span = SessionSpan::embed(handle.id());
        let _guard = span.enter();
        let start = Instant::now();

        let result = self
            .embedding_sessions
            .get(handle)
            .ok_or(EmbedError::InvalidHandle(handle.id()))
            .and_then(|session| session.lock().embed(text));

        span.record_result(&result);
        span.record("latency_ms", start.elapsed().as_millis() as u64);
        if let Ok(vector) = &result {
            span.record("dimension", vector.len() as u64);
        }
        result
    }

    /// Embed `text`. `None` signals failure.
    pub fn embed(&self, handle: u64, text: &str) -> Option<Vec<f32>> {
        match self.try_embed(SessionHandle::from_raw(handle), text) {
            Ok(vector) => Some(vector),
            Err(e) => {
                error!(handle, error = %e, "Embedding failed");
                None
            }
        }
    }

    /// Release an embedding session. Zero, unknown and already-freed
    /// handles are a logged no-op.
    pub fn free_embedding_session(&self, handle: u64) {
        match self.embedding_sessions.remove(SessionHandle::from_raw(handle)) {
            Some(_) => info!(handle, "Embedding session freed"),
            None => warn!(handle, "free_embedding_session called with an invalid handle"),
        }
    }

    // ---- lifecycle ----

    /// Free every live session, then release the backend. A later session
    /// creation initializes the backend again.
    ///
    /// Waits for in-flight session creations; their sessions are freed too.
    pub fn shutdown(&self) {
        self.lifecycle.shutdown_with(|| {
            let generation = self.sessions.drain().len();
            let embedding = self.embedding_sessions.drain().len();
            debug!(generation, embedding, "Sessions released");
        });
        info!("Runtime shut down");
    }
}

fn record_generation(
    span: &tracing::Span,
    result: &Result<GenerationOutcome, GenerateError>,
    start: Instant,
) {
    span.record_result(result);
    span.record("latency_ms", start.elapsed().as_millis() as u64);
    if let Ok(outcome) = result {
        span.record("tokens_generated", outcome.tokens_generated);
        debug!(
            tokens = outcome.tokens_generated,
            reason = ?outcome.finish_reason,
            "Generation finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;

    fn runtime() -> Runtime<MockBackend> {
        let mock = MockBackend::new();
        Runtime::new(Box::new(move || mock.init()))
    }

    #[test]
    fn test_session_options_fall_back_to_config() {
        let rt = runtime();
        let options = rt.session_options(0, -1);
        assert_eq!(options.context_size, 2048);
        assert_eq!(options.threads, 0);

        let options = rt.session_options(512, 4);
        assert_eq!(options, SessionOptions::new(512, 4));
    }

    #[test]
    fn test_backend_initialized_lazily() {
        let rt = runtime();
        assert_eq!(rt.backend_state(), LifecycleState::Uninitialized);
        assert!(!rt.gpu_available());
        assert_eq!(rt.backend_state(), LifecycleState::Ready);
    }

    #[test]
    fn test_invalid_handles_are_inert() {
        let rt = runtime();
        assert!(!rt.is_using_gpu(7));
        assert_eq!(rt.gpu_layers(7), 0);
        assert_eq!(rt.embedding_dimension(0), 0);
        assert_eq!(rt.generate(0, "hi", 8, 0.7, 0.9, 40), "");
        assert!(rt.embed(3, "hi").is_none());
        assert!(rt.session_info(1).is_none());
    }
}
