//! GG-EDGE Session Runtime
//!
//! On-device text generation and sentence embeddings over llama.cpp, exposed
//! through opaque integer handles so a managed host runtime can drive it
//! across a foreign-function boundary.
//!
//! # Components
//!
//! - **Backend lifecycle**: process-wide, once-only native initialization
//!   ([`backend::BackendLifecycle`]).
//! - **Session registry**: handles bound to exclusively locked sessions
//!   ([`models::SessionRegistry`]).
//! - **GPU negotiation**: layer-count resolution and one-shot CPU fallback
//!   ([`engine::load_with_fallback`]).
//! - **Generation engine**: blocking and streaming decode/sample loops
//!   ([`engine::generate`], [`engine::generate_streaming`]).
//! - **Embedding engine**: tokenize, decode, pool, L2-normalize
//!   ([`engine::embed`]).
//!
//! # Usage
//!
//! ```no_run
//! use gg_edge::backend::DefaultBackend;
//! use gg_edge::Runtime;
//!
//! let runtime = Runtime::new(Box::new(DefaultBackend::init));
//! let handle = runtime.create_session_with_gpu("models/chat.gguf", 2048, 0, true, -1);
//! if handle != 0 {
//!     let prompt = "<|im_start|>user\nHello<|im_end|>\n<|im_start|>assistant\n";
//!     let reply = runtime.generate(handle, prompt, 128, 0.7, 0.9, 40);
//!     println!("{reply}");
//!     runtime.free_session(handle);
//! }
//! ```
//!
//! Hosts linking the shared library use the `gg_edge_*` C functions in
//! [`ffi`] instead.

pub mod backend;
pub mod config;
pub mod engine;
pub mod ffi;
pub mod models;
mod runtime;
pub mod telemetry;

pub use backend::{Backend, BackendError, DefaultBackend, NativeContext};
pub use config::EdgeConfig;
pub use engine::{
    EmbedError, FinishReason, GenerateError, GenerationOutcome, GenerationParams, GpuPlacement,
    GpuRequest, LoadError, StreamEvent, TokenSink, TokenStream,
};
pub use models::{SessionHandle, SessionInfo, SessionOptions};
pub use runtime::{Runtime, STREAM_BUFFER};
