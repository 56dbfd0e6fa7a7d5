//! Generation and embedding sessions.
//!
//! A session owns one native context, which in turn owns its model, so
//! dropping a session always releases the context before the model.

use std::path::PathBuf;

use tracing::info;

use super::loader::validate_model_path;
use crate::backend::{Backend, ContextParams, NativeContext};
use crate::engine::{
    self, load_with_fallback, CancelCheck, EmbedError, GenerateError, GenerationOutcome,
    GenerationParams, GpuPlacement, GpuRequest, LoadError, TokenSink,
};

/// Upper bound for automatically chosen decode threads.
const MAX_AUTO_THREADS: usize = 16;

/// Thread count used for decode: `n <= 0` means logical CPUs, capped at 16.
pub fn resolve_threads(n: i32) -> i32 {
    if n > 0 {
        return n;
    }
    let logical = num_cpus::get().clamp(1, MAX_AUTO_THREADS);
    i32::try_from(logical).unwrap_or(4)
}

/// Caller-supplied session shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Context window in tokens (0 = model default).
    pub context_size: u32,
    /// Decode threads (`<= 0` = auto).
    pub threads: i32,
}

impl SessionOptions {
    pub fn new(context_size: u32, threads: i32) -> Self {
        Self { context_size, threads }
    }

    fn context_params(&self, embeddings: bool) -> ContextParams {
        let threads = resolve_threads(self.threads);
        ContextParams {
            n_ctx: self.context_size,
            n_threads: threads,
            n_threads_batch: threads,
            embeddings,
        }
    }
}

/// Introspection snapshot of a generation session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub model_path: PathBuf,
    pub model_name: String,
    pub context_size: u32,
    pub threads: i32,
    pub using_gpu: bool,
    pub gpu_layers: u32,
}

/// Introspection snapshot of an embedding session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingSessionInfo {
    pub model_path: PathBuf,
    pub model_name: String,
    pub context_size: u32,
    pub threads: i32,
    pub dimension: usize,
}

/// A loaded causal model ready for text generation.
pub struct InferenceSession<C: NativeContext> {
    ctx: C,
    placement: GpuPlacement,
    info: SessionInfo,
}

impl<C: NativeContext> InferenceSession<C> {
    /// Validate `path`, load it (falling back to CPU once if an accelerated
    /// load fails) and build a generation context.
    pub fn create<B>(
        backend: &B,
        path: impl Into<PathBuf>,
        options: SessionOptions,
        gpu: GpuRequest,
    ) -> Result<Self, LoadError>
    where
        B: Backend<Context = C>,
    {
        let path = path.into();
        let model_path = validate_model_path(&path)?;
        let (model, placement) = load_with_fallback(backend, model_path.as_path(), gpu)?;

        let params = options.context_params(false);
        let ctx = backend
            .new_context(model, &params)
            .map_err(|e| LoadError::Context(e.to_string()))?;

        info!(
            model = %model_path.metadata().name,
            n_ctx = params.n_ctx,
            threads = params.n_threads,
            placement = %placement,
            "Generation session created"
        );

        Ok(Self {
            ctx,
            placement,
            info: SessionInfo {
                model_path: path,
                model_name: model_path.metadata().name.clone(),
                context_size: params.n_ctx,
                threads: params.n_threads,
                using_gpu: placement.using_gpu,
                gpu_layers: placement.gpu_layers,
            },
        })
    }

    pub fn placement(&self) -> GpuPlacement {
        self.placement
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn generate(
        &mut self,
        prompt: &str,
        params: &GenerationParams,
        is_cancelled: Option<CancelCheck<'_>>,
    ) -> Result<GenerationOutcome, GenerateError> {
        engine::generate_cancellable(&mut self.ctx, prompt, params, is_cancelled)
    }

    pub fn generate_streaming<S: TokenSink + ?Sized>(
        &mut self,
        prompt: &str,
        params: &GenerationParams,
        sink: &mut S,
        is_cancelled: Option<CancelCheck<'_>>,
    ) -> Result<GenerationOutcome, GenerateError> {
        engine::generate_streaming_cancellable(&mut self.ctx, prompt, params, sink, is_cancelled)
    }

    /// Native context, for inspection in tests.
    pub fn context(&self) -> &C {
        &self.ctx
    }
}

/// A loaded model configured for pooled embedding output. Always CPU-only.
pub struct EmbeddingSession<C: NativeContext> {
    ctx: C,
    dimension: usize,
    info: EmbeddingSessionInfo,
}

impl<C: NativeContext> EmbeddingSession<C> {
    /// Validate `path`, load it on the CPU and build a pooled-output context.
    /// The embedding dimension is fixed here.
    pub fn create<B>(backend: &B, path: impl Into<PathBuf>, options: SessionOptions) -> Result<Self, LoadError>
    where
        B: Backend<Context = C>,
    {
        let path = path.into();
        let model_path = validate_model_path(&path)?;
        let (model, _) = load_with_fallback(backend, model_path.as_path(), GpuRequest::cpu())?;
        let dimension = backend.embedding_dim(&model);

        let params = options.context_params(true);
        let ctx = backend
            .new_context(model, &params)
            .map_err(|e| LoadError::Context(e.to_string()))?;

        info!(
            model = %model_path.metadata().name,
            n_ctx = params.n_ctx,
            threads = params.n_threads,
            dimension,
            "Embedding session created"
        );

        Ok(Self {
            ctx,
            dimension,
            info: EmbeddingSessionInfo {
                model_path: path,
                model_name: model_path.metadata().name.clone(),
                context_size: params.n_ctx,
                threads: params.n_threads,
                dimension,
            },
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn info(&self) -> &EmbeddingSessionInfo {
        &self.info
    }

    /// Unit-length embedding of `text`, exactly [`Self::dimension`] long.
    pub fn embed(&mut self, text: &str) -> Result<Vec<f32>, EmbedError> {
        engine::embed(&mut self.ctx, text, self.dimension)
    }
}
