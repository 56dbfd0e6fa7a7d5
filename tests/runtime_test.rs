//! Tests for the handle-based session runtime over the scripted backend.

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use gg_edge::backend::mock::{MockBackend, MockContext, MockModel};
use gg_edge::backend::{Backend, BackendError, ContextParams, LifecycleState, ModelParams};
use gg_edge::engine::{SamplerChain, TokenizeError};
use gg_edge::{
    EdgeConfig, FinishReason, GenerateError, GenerationParams, GpuRequest, LoadError, Runtime,
    SessionHandle, SessionOptions,
};
use tempfile::NamedTempFile;

fn model_file() -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".gguf").tempfile().unwrap();
    file.write_all(b"GGUF\x03\x00\x00\x00").unwrap();
    file
}

fn runtime_with(mock: &MockBackend) -> Runtime<MockBackend> {
    let mock = mock.clone();
    Runtime::new(Box::new(move || mock.init()))
}

fn path_of(file: &NamedTempFile) -> &str {
    file.path().to_str().unwrap()
}

static EXCLUSIVE_LIVE: AtomicBool = AtomicBool::new(false);

struct LoadGate {
    entered: Mutex<Option<mpsc::Sender<()>>>,
    release: Mutex<mpsc::Receiver<()>>,
}

/// One live instance per process, like llama.cpp. The first model load
/// blocks until the gate is released.
struct ExclusiveBackend {
    inner: MockBackend,
    gate: Arc<LoadGate>,
}

impl ExclusiveBackend {
    fn init(inner: &MockBackend, gate: &Arc<LoadGate>) -> Result<Self, BackendError> {
        if EXCLUSIVE_LIVE.swap(true, Ordering::SeqCst) {
            return Err(BackendError::Init("BackendAlreadyInitialized".into()));
        }
        Ok(Self { inner: inner.init()?, gate: Arc::clone(gate) })
    }
}

impl Drop for ExclusiveBackend {
    fn drop(&mut self) {
        EXCLUSIVE_LIVE.store(false, Ordering::SeqCst);
    }
}

impl Backend for ExclusiveBackend {
    type Model = MockModel;
    type Context = MockContext;

    fn name(&self) -> &'static str {
        "exclusive"
    }

    fn supports_gpu_offload(&self) -> bool {
        false
    }

    fn load_model(&self, path: &Path, params: &ModelParams) -> Result<MockModel, BackendError> {
        let entered = self.gate.entered.lock().unwrap().take();
        if let Some(entered) = entered {
            entered.send(()).unwrap();
            self.gate.release.lock().unwrap().recv().unwrap();
        }
        self.inner.load_model(path, params)
    }

    fn embedding_dim(&self, model: &MockModel) -> usize {
        self.inner.embedding_dim(model)
    }

    fn new_context(&self, model: MockModel, params: &ContextParams) -> Result<MockContext, BackendError> {
        self.inner.new_context(model, params)
    }
}

// =============================================================================
// Backend lifecycle
// =============================================================================

#[test]
fn test_backend_initialized_once_under_concurrent_creation() {
    let file = model_file();
    let mock = MockBackend::new();
    let rt = Arc::new(runtime_with(&mock));
    let path = path_of(&file).to_string();

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let rt = Arc::clone(&rt);
            let path = path.clone();
            thread::spawn(move || rt.create_session(&path, 256, 1))
        })
        .collect();
    let handles: Vec<u64> = workers.into_iter().map(|w| w.join().unwrap()).collect();

    assert!(handles.iter().all(|&h| h != 0));
    assert_eq!(mock.stats().inits, 1);
    assert_eq!(rt.session_count(), 8);
}

#[test]
fn test_failed_init_is_sticky() {
    let file = model_file();
    let mock = MockBackend::new().fail_init();
    let rt = runtime_with(&mock);

    assert_eq!(rt.create_session(path_of(&file), 256, 1), 0);
    assert_eq!(rt.create_embedding_session(path_of(&file), 256, 1), 0);
    assert!(matches!(
        rt.try_create_session(file.path(), SessionOptions::new(256, 1), GpuRequest::cpu()),
        Err(LoadError::BackendUnavailable(_))
    ));

    assert_eq!(mock.stats().inits, 1);
    assert!(matches!(rt.backend_state(), LifecycleState::Failed(_)));
}

#[test]
fn test_shutdown_frees_sessions_and_allows_restart() {
    let file = model_file();
    let mock = MockBackend::new().with_embedding(vec![1.0, 0.0]);
    let rt = runtime_with(&mock);

    let a = rt.create_session(path_of(&file), 256, 1);
    let e = rt.create_embedding_session(path_of(&file), 256, 1);
    assert!(a != 0 && e != 0);

    rt.shutdown();

    let stats = mock.stats();
    assert_eq!(stats.contexts_live, 0);
    assert_eq!(stats.models_live, 0);
    assert_eq!(rt.session_count(), 0);
    assert_eq!(rt.embedding_session_count(), 0);
    assert_eq!(rt.backend_state(), LifecycleState::Uninitialized);
    assert_eq!(rt.generate(a, "hi", 8, 0.7, 0.9, 40), "");

    assert_ne!(rt.create_session(path_of(&file), 256, 1), 0);
    assert_eq!(mock.stats().inits, 2);
}

#[test]
fn test_shutdown_waits_for_in_flight_creation() {
    let file = model_file();
    let mock = MockBackend::new().with_script(["ok"]);
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let gate = Arc::new(LoadGate {
        entered: Mutex::new(Some(entered_tx)),
        release: Mutex::new(release_rx),
    });
    let factory_mock = mock.clone();
    let rt = Arc::new(Runtime::new(Box::new(move || ExclusiveBackend::init(&factory_mock, &gate))));
    let path = file.path().to_path_buf();

    let creator = {
        let rt = Arc::clone(&rt);
        let path = path.clone();
        thread::spawn(move || rt.try_create_session(&path, SessionOptions::new(256, 1), GpuRequest::cpu()))
    };
    entered_rx.recv().unwrap();

    let stopper = {
        let rt = Arc::clone(&rt);
        thread::spawn(move || rt.shutdown())
    };
    thread::sleep(Duration::from_millis(50));
    assert!(!stopper.is_finished());

    release_tx.send(()).unwrap();
    assert!(creator.join().unwrap().is_ok());
    stopper.join().unwrap();

    // The in-flight session was registered before the drain and freed by it.
    assert_eq!(rt.backend_state(), LifecycleState::Uninitialized);
    assert_eq!(rt.session_count(), 0);
    assert_eq!(mock.stats().models_live, 0);

    let handle = rt
        .try_create_session(&path, SessionOptions::new(256, 1), GpuRequest::cpu())
        .unwrap();
    assert_eq!(rt.backend_state(), LifecycleState::Ready);
    assert_eq!(rt.try_generate(handle, "hi", &GenerationParams::default()).unwrap().text, "ok");
}

#[test]
fn test_failed_init_message_has_single_prefix() {
    let file = model_file();
    let rt = runtime_with(&MockBackend::new().fail_init());

    for _ in 0..2 {
        let err = rt
            .try_create_session(file.path(), SessionOptions::new(256, 1), GpuRequest::cpu())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Inference backend unavailable: backend init failed: mock backend configured to fail"
        );
    }
}

// =============================================================================
// Handles
// =============================================================================

#[test]
fn test_handles_are_nonzero_and_unique() {
    let file = model_file();
    let rt = runtime_with(&MockBackend::new().with_embedding(vec![1.0]));

    let a = rt.create_session(path_of(&file), 256, 1);
    let b = rt.create_session(path_of(&file), 256, 1);
    let e = rt.create_embedding_session(path_of(&file), 256, 1);

    assert!(a != 0 && b != 0 && e != 0);
    assert_ne!(a, b);
}

#[test]
fn test_free_is_idempotent_and_accepts_zero() {
    let file = model_file();
    let mock = MockBackend::new().with_script(["x"]);
    let rt = runtime_with(&mock);
    let handle = rt.create_session(path_of(&file), 256, 1);

    rt.free_session(handle);
    rt.free_session(handle);
    rt.free_session(0);
    rt.free_embedding_session(0);
    rt.free_embedding_session(handle);

    assert_eq!(mock.stats().releases, vec!["context", "model"]);
    assert_eq!(rt.generate(handle, "hi", 8, 0.7, 0.9, 40), "");
    assert!(rt.session_info(handle).is_none());
}

#[test]
fn test_freed_handle_is_not_reused() {
    let file = model_file();
    let rt = runtime_with(&MockBackend::new());

    let first = rt.create_session(path_of(&file), 256, 1);
    rt.free_session(first);
    let second = rt.create_session(path_of(&file), 256, 1);

    assert_ne!(first, second);
}

#[test]
fn test_session_kinds_have_independent_handles() {
    let file = model_file();
    let rt = runtime_with(&MockBackend::new().with_script(["ok"]).with_embedding(vec![1.0, 1.0]));

    let g = rt.create_session(path_of(&file), 256, 1);
    let e = rt.create_embedding_session(path_of(&file), 256, 1);
    rt.free_embedding_session(e);

    assert_eq!(rt.generate(g, "hi", 8, 0.7, 0.9, 40), "ok");
    assert_eq!(rt.embedding_dimension(e), 0);
    assert!(matches!(
        rt.try_generate(SessionHandle::from_raw(g + 100), "hi", &GenerationParams::default()),
        Err(GenerateError::InvalidHandle(_))
    ));
}

// =============================================================================
// Creation failures
// =============================================================================

#[test]
fn test_missing_model_yields_zero_without_leaks() {
    let mock = MockBackend::new().with_embedding(vec![1.0]);
    let rt = runtime_with(&mock);

    for _ in 0..5 {
        assert_eq!(rt.create_session("/nonexistent/model.gguf", 256, 1), 0);
        assert_eq!(rt.create_session_with_gpu("/nonexistent/model.gguf", 256, 1, true, -1), 0);
        assert_eq!(rt.create_embedding_session("/nonexistent/model.gguf", 256, 1), 0);
    }

    let stats = mock.stats();
    assert_eq!(stats.models_live, 0);
    assert_eq!(stats.contexts_live, 0);
    assert_eq!(rt.session_count(), 0);
    assert_eq!(rt.embedding_session_count(), 0);
}

#[test]
fn test_native_load_failure_yields_zero() {
    let file = model_file();
    let mock = MockBackend::new().fail_load();
    let rt = runtime_with(&mock);

    assert_eq!(rt.create_session(path_of(&file), 256, 1), 0);
    assert!(matches!(
        rt.try_create_embedding_session(file.path(), SessionOptions::new(256, 1)),
        Err(LoadError::ModelLoad { .. })
    ));
    assert_eq!(mock.stats().models_live, 0);
}

#[test]
fn test_context_failure_releases_model() {
    let file = model_file();
    let mock = MockBackend::new().fail_context();
    let rt = runtime_with(&mock);

    for _ in 0..3 {
        assert_eq!(rt.create_session(path_of(&file), 256, 1), 0);
    }

    let stats = mock.stats();
    assert_eq!(stats.models_live, 0);
    assert_eq!(stats.releases, vec!["model", "model", "model"]);
}

#[test]
fn test_non_gguf_file_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"not a model").unwrap();
    let mock = MockBackend::new();
    let rt = runtime_with(&mock);

    assert!(matches!(
        rt.try_create_session(file.path(), SessionOptions::new(256, 1), GpuRequest::cpu()),
        Err(LoadError::InvalidFormat(_))
    ));
    assert!(mock.stats().load_attempts.is_empty());
}

// =============================================================================
// Generation through handles
// =============================================================================

#[test]
fn test_generate_returns_script_text() {
    let file = model_file();
    let rt = runtime_with(&MockBackend::new().with_script(["Hello", "!"]));
    let handle = rt.create_session(path_of(&file), 256, 1);

    assert_eq!(rt.generate(handle, "<|im_start|>user\nhi<|im_end|>", 32, 0.7, 0.9, 40), "Hello!");
}

#[test]
fn test_non_positive_max_tokens_only_decodes_prompt() {
    let file = model_file();
    let mock = MockBackend::new().with_script(["never"]);
    let rt = runtime_with(&mock);
    let handle = rt.create_session(path_of(&file), 256, 1);

    assert_eq!(rt.generate(handle, "hi", 0, 0.7, 0.9, 40), "");
    assert_eq!(rt.generate(handle, "hi", -3, 0.7, 0.9, 40), "");
    assert_eq!(mock.stats().decode_calls, 2);
}

#[test]
fn test_prompt_decode_failure_returns_empty_text() {
    let file = model_file();
    let mock = MockBackend::new().with_script(["x"]).fail_decode_at(0);
    let rt = runtime_with(&mock);
    let handle = rt.create_session(path_of(&file), 256, 1);

    assert_eq!(rt.generate(handle, "hi", 8, 0.7, 0.9, 40), "");
    assert_eq!(mock.stats().samplers_live, 0);
}

#[test]
fn test_typed_generate_reports_finish_reason() {
    let file = model_file();
    let rt = runtime_with(&MockBackend::new().with_script(["a", "b", "c"]));
    let handle = rt
        .try_create_session(file.path(), SessionOptions::new(256, 1), GpuRequest::cpu())
        .unwrap();

    let params = GenerationParams::new(2, 0.7, 0.9, 40);
    let outcome = rt.try_generate(handle, "hi", &params).unwrap();

    assert_eq!(outcome.text, "ab");
    assert_eq!(outcome.tokens_generated, 2);
    assert_eq!(outcome.finish_reason, FinishReason::MaxTokens);
}

#[test]
fn test_cancellation_through_runtime() {
    let file = model_file();
    let rt = runtime_with(&MockBackend::new().with_script(["a", "b"]));
    let handle = rt
        .try_create_session(file.path(), SessionOptions::new(256, 1), GpuRequest::cpu())
        .unwrap();
    let cancel = || true;

    let outcome = rt
        .generate_cancellable(handle, "hi", &GenerationParams::default(), Some(&cancel))
        .unwrap();

    assert_eq!(outcome.text, "");
    assert_eq!(outcome.finish_reason, FinishReason::Cancelled);
}

#[test]
fn test_distinct_handles_generate_concurrently() {
    let file = model_file();
    let rt = Arc::new(runtime_with(&MockBackend::new().with_script(["one", " two"])));
    let handles: Vec<u64> = (0..4).map(|_| rt.create_session(path_of(&file), 256, 1)).collect();

    let workers: Vec<_> = handles
        .into_iter()
        .map(|h| {
            let rt = Arc::clone(&rt);
            thread::spawn(move || rt.generate(h, "go", 16, 0.7, 0.9, 40))
        })
        .collect();

    for worker in workers {
        assert_eq!(worker.join().unwrap(), "one two");
    }
}

#[test]
fn test_same_handle_calls_are_serialized() {
    let file = model_file();
    let rt = Arc::new(runtime_with(&MockBackend::new().with_script(["a", "b", "c"])));
    let handle = rt.create_session(path_of(&file), 256, 1);

    let workers: Vec<_> = (0..6)
        .map(|_| {
            let rt = Arc::clone(&rt);
            thread::spawn(move || rt.generate(handle, "go", 16, 0.7, 0.9, 40))
        })
        .collect();

    // Interleaved calls would corrupt the shared script cursor.
    for worker in workers {
        assert_eq!(worker.join().unwrap(), "abc");
    }
}

#[test]
fn test_tokenize_failure_returns_empty_text() {
    let file = model_file();
    let mock = MockBackend::new().with_script(["never"]).fail_tokenize();
    let rt = runtime_with(&mock);
    let handle = rt.create_session(path_of(&file), 256, 1);

    assert_eq!(rt.generate(handle, "hi", 16, 0.7, 0.9, 40), "");
    assert!(matches!(
        rt.try_generate(SessionHandle::from_raw(handle), "hi", &GenerationParams::default()),
        Err(GenerateError::Tokenize(TokenizeError::Failed(_)))
    ));

    let stats = mock.stats();
    assert_eq!(stats.samplers_built, 0);
    assert_eq!(stats.decode_calls, 0);
}

#[test]
fn test_generate_with_configured_defaults() {
    let file = model_file();
    let mock = MockBackend::new().with_script(["a", "b", "c", "d"]);
    let factory_mock = mock.clone();
    let mut config = EdgeConfig::default();
    config.generation.max_tokens = 2;
    config.generation.top_k = 7;
    let rt = Runtime::with_config(Box::new(move || factory_mock.init()), config);
    let handle = SessionHandle::from_raw(rt.create_session(path_of(&file), 256, 1));

    assert_eq!(rt.default_params().max_tokens, 2);
    let outcome = rt.try_generate_default(handle, "hi").unwrap();

    assert_eq!(outcome.text, "ab");
    assert_eq!(outcome.finish_reason, FinishReason::MaxTokens);
    assert_eq!(mock.stats().last_sampler, Some(SamplerChain::for_generation(&rt.default_params())));
}

// =============================================================================
// Introspection
// =============================================================================

#[test]
fn test_session_info_reports_shape() {
    let file = model_file();
    let rt = runtime_with(&MockBackend::new());
    let handle = rt.create_session(path_of(&file), 1024, 3);

    let info = rt.session_info(handle).unwrap();
    assert_eq!(info.model_path, file.path());
    assert_eq!(info.context_size, 1024);
    assert_eq!(info.threads, 3);
    assert!(!info.using_gpu);
    assert_eq!(info.gpu_layers, 0);
}

#[test]
fn test_zero_context_size_uses_configured_default() {
    let file = model_file();
    let rt = runtime_with(&MockBackend::new());
    let handle = rt.create_session(path_of(&file), 0, 0);

    let info = rt.session_info(handle).unwrap();
    assert_eq!(info.context_size, rt.config().session.n_ctx);
    assert!(info.threads >= 1);
}
